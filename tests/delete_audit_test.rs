// ==========================================
// 订单删除与审计集成测试
// ==========================================
// 规则: 删除前先写审计快照; EN_PROCESO / PROCESO_MANUAL 禁止删除;
// 关联数据级联清理; 批量删除跳过无法删除的订单
// ==========================================

mod test_helpers;

use packline_mes::engine::{OrderDeleteRequest, OrderFinish};
use packline_mes::EstadoOrder;

fn solicitud() -> OrderDeleteRequest {
    OrderDeleteRequest {
        deleted_by: "supervisor".to_string(),
        motivo: Some("orden duplicada".to_string()),
        ip_address: Some("10.0.0.5".to_string()),
    }
}

#[tokio::test]
async fn test_eliminar_orden_con_auditoria() {
    let (archivo, estado) = test_helpers::crear_estado();
    let db_path = archivo.path().to_string_lossy().to_string();

    // 完整生命周期后删除: 所有关联行都应被清理
    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-D1"))
        .unwrap();
    let id = view.order.id_order;
    estado.order_engine.iniciar(id).unwrap();
    estado.counter_engine.registrar_pulso().unwrap();
    estado
        .order_engine
        .finalizar(
            id,
            OrderFinish {
                botes_buenos: Some(300),
                botes_malos: Some(5),
                total_cajas_cierre: Some(30),
                acumula: Some(false),
            },
        )
        .unwrap();

    let audit = estado.delete_engine.eliminar(id, &solicitud()).unwrap();
    assert_eq!(audit.id_order_deleted, id);
    assert_eq!(audit.cod_order, "OF-D1");
    assert_eq!(audit.estado_al_eliminar, EstadoOrder::Finalizada);
    assert_eq!(audit.botes_buenos, Some(300));
    assert_eq!(audit.deleted_by, "supervisor");
    assert_eq!(audit.ip_address.as_deref(), Some("10.0.0.5"));

    // 订单与关联数据已清理, 审计保留
    let conn = test_helpers::abrir_conexion(&db_path);
    for tabla in ["orders", "pauses", "metricas", "acumula", "extra_data", "bottle_counter"] {
        assert_eq!(
            test_helpers::contar_filas(&conn, tabla, &format!("id_order = {id}")),
            0,
            "la tabla {tabla} debe quedar limpia"
        );
    }
    assert_eq!(
        test_helpers::contar_filas(&conn, "order_delete_audit", "1=1"),
        1
    );

    assert_eq!(
        estado.order_engine.obtener(id).unwrap_err().code(),
        "NOT_FOUND"
    );
}

#[tokio::test]
async fn test_no_se_elimina_en_proceso() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-D2"))
        .unwrap();
    let id = view.order.id_order;
    estado.order_engine.iniciar(id).unwrap();

    let err = estado.delete_engine.eliminar(id, &solicitud()).unwrap_err();
    assert_eq!(err.code(), "INVALID_STATE");

    // 审计不应有残留
    assert!(estado.delete_engine.auditoria_reciente(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_validacion_de_usuario() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-D3"))
        .unwrap();

    let err = estado
        .delete_engine
        .eliminar(
            view.order.id_order,
            &OrderDeleteRequest {
                deleted_by: "  ".to_string(),
                motivo: None,
                ip_address: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
}

#[tokio::test]
async fn test_eliminacion_multiple_salta_invalidas() {
    let (_archivo, estado) = test_helpers::crear_estado();

    let a = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-D4A"))
        .unwrap();
    let b = estado
        .order_engine
        .crear(test_helpers::orden_basica("OF-D4B"))
        .unwrap();
    // B 在 EN_PROCESO, 不可删除
    estado.order_engine.iniciar(b.order.id_order).unwrap();

    let audits = estado
        .delete_engine
        .eliminar_varias(&[a.order.id_order, b.order.id_order, 9999], &solicitud())
        .unwrap();

    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].cod_order, "OF-D4A");

    // B 仍然存在
    assert_eq!(
        estado.order_engine.obtener(b.order.id_order).unwrap().estado,
        EstadoOrder::EnProceso
    );

    let recientes = estado.delete_engine.auditoria_reciente(10).unwrap();
    assert_eq!(recientes.len(), 1);
}
