// ==========================================
// 暂停引擎集成测试
// ==========================================
// 覆盖: 开启/关闭, 两段式补全, 描述拼接, 收尾级联关闭,
// 以及 "每订单最多一条未关闭暂停" 不变量
// ==========================================

mod test_helpers;

use packline_mes::engine::{OrderFinish, PauseClose, PauseOpen};
use packline_mes::{EstadoOrder, TipoPausa};

fn orden_en_proceso(estado: &packline_mes::AppState, cod: &str) -> i64 {
    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica(cod))
        .unwrap();
    estado.order_engine.iniciar(view.order.id_order).unwrap();
    view.order.id_order
}

#[tokio::test]
async fn test_abrir_y_cerrar_pausa() {
    let (archivo, estado) = test_helpers::crear_estado();
    let id = orden_en_proceso(&estado, "OF-P1");

    // 开启: 订单转 PAUSADA, computa 由 tipo 派生
    let pausa = estado
        .pause_engine
        .abrir(
            id,
            PauseOpen {
                tipo: Some(TipoPausa::FaltaMaterial),
                descripcion: Some("sin tapas".to_string()),
                operario: Some("B".to_string()),
            },
        )
        .unwrap();
    assert!(pausa.es_activa());
    assert_eq!(pausa.computa, Some(true));
    assert_eq!(
        estado.order_engine.obtener(id).unwrap().estado,
        EstadoOrder::Pausada
    );

    // 重复开启 → InvalidState
    assert_eq!(
        estado
            .pause_engine
            .abrir(id, PauseOpen::default())
            .unwrap_err()
            .code(),
        "INVALID_STATE"
    );

    // 关闭: 回到 EN_PROCESO, 时长已计算
    let cerrada = estado
        .pause_engine
        .cerrar(id, pausa.id_pausa, PauseClose::default())
        .unwrap();
    assert!(cerrada.hora_fin.is_some());
    assert!(cerrada.tiempo_total_pausa.is_some());
    assert_eq!(
        estado.order_engine.obtener(id).unwrap().estado,
        EstadoOrder::EnProceso
    );

    // 再次关闭 → InvalidState
    assert_eq!(
        estado
            .pause_engine
            .cerrar(id, pausa.id_pausa, PauseClose::default())
            .unwrap_err()
            .code(),
        "INVALID_STATE"
    );

    // 不变量: 任何提交状态下, 该订单最多一条未关闭暂停
    let conn = test_helpers::abrir_conexion(&archivo.path().to_string_lossy());
    let abiertas = test_helpers::contar_filas(
        &conn,
        "pauses",
        &format!("id_order = {id} AND hora_fin IS NULL"),
    );
    assert_eq!(abiertas, 0);
}

#[tokio::test]
async fn test_pausa_dos_fases() {
    let (_archivo, estado) = test_helpers::crear_estado();
    let id = orden_en_proceso(&estado, "OF-P2");

    // 模式2: 创建时不带 tipo
    let pausa = estado.pause_engine.abrir(id, PauseOpen::default()).unwrap();
    assert_eq!(pausa.tipo, None);
    assert_eq!(pausa.computa, None);

    // 关闭时仍不带 tipo → InvalidInput
    let err = estado
        .pause_engine
        .cerrar(id, pausa.id_pausa, PauseClose::default())
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    // 补齐 tipo → 成功, computa 派生
    let cerrada = estado
        .pause_engine
        .cerrar(
            id,
            pausa.id_pausa,
            PauseClose {
                tipo: Some(TipoPausa::FaltaMaterial),
                ..PauseClose::default()
            },
        )
        .unwrap();
    assert_eq!(cerrada.tipo, Some(TipoPausa::FaltaMaterial));
    assert_eq!(cerrada.computa, Some(true));
}

#[tokio::test]
async fn test_cerrar_con_tipo_distinto_y_descripcion() {
    let (_archivo, estado) = test_helpers::crear_estado();
    let id = orden_en_proceso(&estado, "OF-P3");

    let pausa = estado
        .pause_engine
        .abrir(
            id,
            PauseOpen {
                tipo: Some(TipoPausa::LimpiezaEnProceso),
                descripcion: Some("limpieza inicial".to_string()),
                operario: None,
            },
        )
        .unwrap();

    // 覆盖 tipo 为不可计入类型, 描述以 " | " 拼接
    let cerrada = estado
        .pause_engine
        .cerrar(
            id,
            pausa.id_pausa,
            PauseClose {
                tipo: Some(TipoPausa::CambioTurno),
                descripcion: Some("cambio de turno".to_string()),
                operario: Some("C".to_string()),
            },
        )
        .unwrap();
    assert_eq!(cerrada.tipo, Some(TipoPausa::CambioTurno));
    assert_eq!(cerrada.computa, Some(false));
    assert_eq!(
        cerrada.descripcion.as_deref(),
        Some("limpieza inicial | cambio de turno")
    );
    assert_eq!(cerrada.operario.as_deref(), Some("C"));
}

#[tokio::test]
async fn test_cerrar_pausa_de_otra_orden() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let id_a = orden_en_proceso(&estado, "OF-P4A");
    let pausa = estado
        .pause_engine
        .abrir(
            id_a,
            PauseOpen {
                tipo: Some(TipoPausa::Parada),
                ..PauseOpen::default()
            },
        )
        .unwrap();

    let b = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-P4B"))
        .unwrap();

    let err = estado
        .pause_engine
        .cerrar(b.order.id_order, pausa.id_pausa, PauseClose::default())
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    // 不存在的暂停
    let err = estado
        .pause_engine
        .cerrar(id_a, 9999, PauseClose::default())
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_abrir_requiere_en_proceso() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-P5"))
        .unwrap();

    // CREADA 不能开启暂停
    assert_eq!(
        estado
            .pause_engine
            .abrir(view.order.id_order, PauseOpen::default())
            .unwrap_err()
            .code(),
        "INVALID_STATE"
    );
}

#[tokio::test]
async fn test_finalizar_cierra_pausa_activa() {
    // 收尾路径: PAUSADA 订单的未关闭暂停被级联关闭
    let (archivo, estado) = test_helpers::crear_estado();
    let id = orden_en_proceso(&estado, "OF-P6");

    let pausa = estado
        .pause_engine
        .abrir(
            id,
            PauseOpen {
                tipo: Some(TipoPausa::ParadaCalidad),
                ..PauseOpen::default()
            },
        )
        .unwrap();

    let order = estado
        .order_engine
        .finalizar(
            id,
            OrderFinish {
                botes_buenos: Some(50),
                botes_malos: Some(0),
                total_cajas_cierre: Some(5),
                acumula: Some(true),
            },
        )
        .unwrap();
    assert_eq!(order.estado, EstadoOrder::EsperaManual);

    let conn = test_helpers::abrir_conexion(&archivo.path().to_string_lossy());
    let abiertas = test_helpers::contar_filas(
        &conn,
        "pauses",
        &format!("id_order = {id} AND hora_fin IS NULL"),
    );
    assert_eq!(abiertas, 0);

    // 级联关闭的暂停保留其 tipo 与 computa
    let pausas = estado.pause_engine.listar_por_order(id).unwrap();
    assert_eq!(pausas.len(), 1);
    assert_eq!(pausas[0].pause.id_pausa, pausa.id_pausa);
    assert_eq!(pausas[0].pause.tipo, Some(TipoPausa::ParadaCalidad));
    assert_eq!(pausas[0].pause.computa, Some(true));
    assert!(pausas[0].pause.tiempo_total_pausa.is_some());
}

#[tokio::test]
async fn test_finalizar_clasifica_pausa_sin_tipo() {
    // 级联关闭未分类暂停: 归为 PARADA (不计入)
    let (_archivo, estado) = test_helpers::crear_estado();
    let id = orden_en_proceso(&estado, "OF-P7");

    estado.pause_engine.abrir(id, PauseOpen::default()).unwrap();
    estado
        .order_engine
        .finalizar(
            id,
            OrderFinish {
                botes_buenos: Some(10),
                botes_malos: Some(0),
                total_cajas_cierre: Some(1),
                acumula: Some(false),
            },
        )
        .unwrap();

    let pausas = estado.pause_engine.listar_por_order(id).unwrap();
    assert_eq!(pausas[0].pause.tipo, Some(TipoPausa::Parada));
    assert_eq!(pausas[0].pause.computa, Some(false));
}

#[tokio::test]
async fn test_listados_de_pausas() {
    let (_archivo, estado) = test_helpers::crear_estado();
    let id = orden_en_proceso(&estado, "OF-P8");

    // 非局部制造的未关闭暂停进入看板列表
    let pausa = estado
        .pause_engine
        .abrir(
            id,
            PauseOpen {
                tipo: Some(TipoPausa::MantenimientoEnProceso),
                ..PauseOpen::default()
            },
        )
        .unwrap();

    let activa = estado.pause_engine.activa(id).unwrap().unwrap();
    assert_eq!(activa.pause.id_pausa, pausa.id_pausa);
    assert_eq!(activa.cod_order.as_deref(), Some("OF-P8"));

    let sin_parcial = estado.pause_engine.activas_sin_parcial().unwrap();
    assert_eq!(sin_parcial.len(), 1);

    assert!(estado
        .pause_engine
        .ordenes_con_parcial_activa()
        .unwrap()
        .is_empty());

    estado
        .pause_engine
        .cerrar(id, pausa.id_pausa, PauseClose::default())
        .unwrap();

    // 局部制造暂停只进入 parcial 列表
    let parcial = estado
        .pause_engine
        .abrir(
            id,
            PauseOpen {
                tipo: Some(TipoPausa::FabricacionParcial),
                ..PauseOpen::default()
            },
        )
        .unwrap();
    assert_eq!(parcial.computa, Some(false));

    assert!(estado.pause_engine.activas_sin_parcial().unwrap().is_empty());
    let parciales = estado.pause_engine.ordenes_con_parcial_activa().unwrap();
    assert_eq!(parciales.len(), 1);
    assert_eq!(parciales[0].id_order, id);
}
