// ==========================================
// 订单生命周期集成测试
// ==========================================
// 覆盖: 创建 → 开始 → 收尾 (直接/人工收尾两条路径) 的状态机
// 以及唯一编码 / 非法迁移 / 单一 EN_PROCESO 不变量
// ==========================================

mod test_helpers;

use packline_mes::engine::{AcumulaFinish, OrderFinish};
use packline_mes::logging;
use packline_mes::EstadoOrder;

#[tokio::test]
async fn test_flujo_feliz_sin_acumulacion() {
    logging::init_test();

    let (_archivo, estado) = test_helpers::crear_estado();

    // 创建: 派生字段按公式计算
    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-1"))
        .expect("crear orden");
    assert_eq!(view.order.estado, EstadoOrder::Creada);
    assert_eq!(view.order.cajas_previstas, 100.0);
    assert_eq!(view.order.tiempo_estimado, 50.0);
    assert_eq!(view.formato_bote.as_deref(), Some("500ml"));
    assert!(view.order.hora_inicio.is_none());
    let id = view.order.id_order;

    // 开始: EN_PROCESO + hora_inicio + 计数器激活
    let order = estado.order_engine.iniciar(id).expect("iniciar orden");
    assert_eq!(order.estado, EstadoOrder::EnProceso);
    assert!(order.hora_inicio.is_some());

    let counter = estado
        .counter_engine
        .obtener_por_order(id)
        .expect("leer contador")
        .expect("el contador debe existir tras iniciar");
    assert!(counter.is_active);
    assert_eq!(counter.quantity, 0);

    // 收尾 (acumula=false): FINALIZADA + 指标 + 计数器去激活
    let order = estado
        .order_engine
        .finalizar(
            id,
            OrderFinish {
                botes_buenos: Some(900),
                botes_malos: Some(100),
                total_cajas_cierre: Some(90),
                acumula: Some(false),
            },
        )
        .expect("finalizar orden");
    assert_eq!(order.estado, EstadoOrder::Finalizada);
    assert!(order.hora_fin.is_some());
    assert_eq!(order.botes_buenos, Some(900));
    assert!(!order.acumula);

    let metricas = estado
        .metricas_engine
        .obtener(id)
        .expect("leer métricas")
        .expect("las métricas deben existir tras finalizar");
    assert!((metricas.calidad - 0.9).abs() < 1e-9);

    let counter = estado
        .counter_engine
        .obtener_por_order(id)
        .unwrap()
        .unwrap();
    assert!(!counter.is_active);

    // 再次收尾 → InvalidState
    let err = estado
        .order_engine
        .finalizar(id, OrderFinish::default())
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");
}

#[tokio::test]
async fn test_flujo_con_acumulacion_manual() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-ACU"))
        .unwrap();
    let id = view.order.id_order;
    estado.order_engine.iniciar(id).unwrap();

    // 收尾 (acumula=true): ESPERA_MANUAL, 指标此刻已写入
    let order = estado
        .order_engine
        .finalizar(
            id,
            OrderFinish {
                botes_buenos: Some(500),
                botes_malos: Some(10),
                total_cajas_cierre: Some(50),
                acumula: Some(true),
            },
        )
        .unwrap();
    assert_eq!(order.estado, EstadoOrder::EsperaManual);
    assert!(order.acumula);

    let metricas_antes = estado.metricas_engine.obtener(id).unwrap().unwrap();

    // ESPERA_MANUAL → PROCESO_MANUAL
    let acumula = estado.acumula_engine.iniciar_manual(id).unwrap();
    assert!(acumula.en_proceso());
    assert_eq!(
        estado.order_engine.obtener(id).unwrap().estado,
        EstadoOrder::ProcesoManual
    );

    // 重复开始 → InvalidState
    let err = estado.acumula_engine.iniciar_manual(id).unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");

    // PROCESO_MANUAL → FINALIZADA
    let acumula = estado
        .acumula_engine
        .finalizar_manual(id, AcumulaFinish { num_cajas_manual: 7 })
        .unwrap();
    assert!(!acumula.en_proceso());
    assert_eq!(acumula.num_cajas_manual, 7);
    assert!(acumula.tiempo_total.is_some());
    assert_eq!(
        estado.order_engine.obtener(id).unwrap().estado,
        EstadoOrder::Finalizada
    );

    // 人工阶段不得重算指标: 行必须逐字段一致
    let metricas_despues = estado.metricas_engine.obtener(id).unwrap().unwrap();
    assert_eq!(metricas_antes, metricas_despues);
}

#[tokio::test]
async fn test_codigo_duplicado() {
    let (_archivo, estado) = test_helpers::crear_estado();

    estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-DUP"))
        .unwrap();
    let err = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-DUP"))
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_EXISTS");
}

#[tokio::test]
async fn test_validaciones_de_entrada() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let mut dto = test_helpers::orden_basica("OF-V1");
    dto.cantidad = 0;
    assert_eq!(estado.order_engine.crear(dto).unwrap_err().code(), "INVALID_INPUT");

    let mut dto = test_helpers::orden_basica("OF-V2");
    dto.botes_caja = 0;
    assert_eq!(estado.order_engine.crear(dto).unwrap_err().code(), "INVALID_INPUT");

    let mut dto = test_helpers::orden_basica("OF-V3");
    dto.std_referencia = 0.0;
    assert_eq!(estado.order_engine.crear(dto).unwrap_err().code(), "INVALID_INPUT");

    let mut dto = test_helpers::orden_basica("OF-V4");
    dto.operario = "   ".to_string();
    assert_eq!(estado.order_engine.crear(dto).unwrap_err().code(), "INVALID_INPUT");

    // 收尾负数校验
    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-V5"))
        .unwrap();
    estado.order_engine.iniciar(view.order.id_order).unwrap();
    let err = estado
        .order_engine
        .finalizar(
            view.order.id_order,
            OrderFinish {
                botes_buenos: Some(-1),
                ..OrderFinish::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
}

#[tokio::test]
async fn test_transiciones_invalidas() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-T"))
        .unwrap();
    let id = view.order.id_order;

    // CREADA 不能收尾
    assert_eq!(
        estado
            .order_engine
            .finalizar(id, OrderFinish::default())
            .unwrap_err()
            .code(),
        "INVALID_STATE"
    );

    // CREADA 不能进入人工收尾
    assert_eq!(
        estado.acumula_engine.iniciar_manual(id).unwrap_err().code(),
        "INVALID_STATE"
    );

    estado.order_engine.iniciar(id).unwrap();

    // EN_PROCESO 不能再次开始
    assert_eq!(
        estado.order_engine.iniciar(id).unwrap_err().code(),
        "INVALID_STATE"
    );

    // 不存在的订单
    assert_eq!(
        estado.order_engine.iniciar(9999).unwrap_err().code(),
        "NOT_FOUND"
    );
}

#[tokio::test]
async fn test_una_sola_orden_en_proceso() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let a = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-A"))
        .unwrap();
    let b = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-B"))
        .unwrap();

    estado.order_engine.iniciar(a.order.id_order).unwrap();

    // A 在 EN_PROCESO 时 B 不能开始
    let err = estado.order_engine.iniciar(b.order.id_order).unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");

    // A 收尾后 B 可以开始
    estado
        .order_engine
        .finalizar(
            a.order.id_order,
            OrderFinish {
                botes_buenos: Some(100),
                botes_malos: Some(0),
                total_cajas_cierre: Some(10),
                acumula: Some(false),
            },
        )
        .unwrap();
    estado.order_engine.iniciar(b.order.id_order).unwrap();
    assert_eq!(
        estado.order_engine.obtener(b.order.id_order).unwrap().estado,
        EstadoOrder::EnProceso
    );
}

#[tokio::test]
async fn test_consultas_y_estadisticas() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let a = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-Q1"))
        .unwrap();
    estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-Q2"))
        .unwrap();
    estado.order_engine.iniciar(a.order.id_order).unwrap();

    // 按编码查询
    let por_cod = estado.order_engine.obtener_por_cod("OF-Q1").unwrap();
    assert_eq!(por_cod.id_order, a.order.id_order);
    assert_eq!(
        estado.order_engine.obtener_por_cod("OF-NO").unwrap_err().code(),
        "NOT_FOUND"
    );

    // 统计: 每个状态都有条目
    let stats = estadisticas(&estado);
    assert_eq!(stats["EN_PROCESO"], 1);
    assert_eq!(stats["CREADA"], 1);
    assert_eq!(stats["FINALIZADA"], 0);

    // 过滤查询
    let filtro = packline_mes::repository::OrderFiltro {
        estado: Some(EstadoOrder::EnProceso),
        ..Default::default()
    };
    let lista = estado.order_engine.listar(&filtro).unwrap();
    assert_eq!(lista.len(), 1);
    assert_eq!(lista[0].cod_order, "OF-Q1");

    // 完整读取与表格投影
    let completa = estado.order_engine.obtener_completa(a.order.id_order).unwrap();
    assert!(completa.metricas.is_none());
    assert!(completa.extra_data.is_some());

    let tabla = estado.order_engine.listar_tabla().unwrap();
    assert_eq!(tabla.len(), 2);
}

fn estadisticas(estado: &packline_mes::AppState) -> std::collections::HashMap<String, i64> {
    estado.order_engine.estadisticas().unwrap()
}
