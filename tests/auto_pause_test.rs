// ==========================================
// 自动暂停检测器集成测试
// ==========================================
// 用缩短的时序驱动完整链路: 帧 → 链路 → 检测器 → 暂停引擎 → 存储
// 时序: T_OPEN 200ms / T_CLOSE 100ms / T_COOLDOWN 600ms
// ==========================================

mod test_helpers;

use std::time::Duration;

use packline_mes::engine::{PauseClose, PauseOpen};
use packline_mes::gpio::AutoPauseDetector;
use packline_mes::{AppState, EstadoOrder, TipoPausa};
use tempfile::NamedTempFile;
use tokio::time::sleep;

const PIN_PONDERAL: u8 = 22;
const PIN_ETIQUETA: u8 = 19;

fn crear_estado_rapido() -> (NamedTempFile, AppState) {
    let archivo = NamedTempFile::new().expect("crear archivo temporal");
    let db_path = archivo.path().to_string_lossy().to_string();
    let mut config = test_helpers::config_de_prueba(&db_path);
    config.t_open = Duration::from_millis(200);
    config.t_close = Duration::from_millis(100);
    config.t_cooldown = Duration::from_millis(600);
    config.reconcile_interval = Duration::from_millis(100);
    config.observer_interval = Duration::from_millis(100);
    let estado = AppState::new(&config).expect("crear AppState");
    (archivo, estado)
}

fn orden_en_proceso(estado: &AppState, cod: &str) -> i64 {
    let view = estado
        .order_engine
        .crear(test_helpers::orden_basica(cod))
        .unwrap();
    estado.order_engine.iniciar(view.order.id_order).unwrap();
    view.order.id_order
}

async fn snapshot_ok(estado: &AppState) {
    estado
        .gpio_link
        .procesar_frame(r#"[{"pin": 22, "value": 1}, {"pin": 19, "value": 1}, {"pin": 23, "value": 1}]"#)
        .await;
}

async fn pin(estado: &AppState, pin: u8, valor: u8) {
    estado
        .gpio_link
        .procesar_frame(&format!(r#"{{"pin": {pin}, "value": {valor}}}"#))
        .await;
}

fn pausas_de(estado: &AppState, id_order: i64) -> Vec<packline_mes::Pause> {
    estado
        .pause_engine
        .listar_por_order(id_order)
        .unwrap()
        .into_iter()
        .map(|v| v.pause)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_debounce_por_debajo_del_umbral_no_abre() {
    let (_archivo, estado) = crear_estado_rapido();
    let id = orden_en_proceso(&estado, "OF-AP1");
    snapshot_ok(&estado).await;

    // FALLO 100ms (< T_OPEN 200ms) 后恢复: 不开启
    pin(&estado, PIN_PONDERAL, 0).await;
    sleep(Duration::from_millis(100)).await;
    pin(&estado, PIN_PONDERAL, 1).await;
    sleep(Duration::from_millis(300)).await;

    assert!(pausas_de(&estado, id).is_empty());
    assert!(!estado.auto_pause.tiene_pausa_activa());
    assert_eq!(
        estado.order_engine.obtener(id).unwrap().estado,
        EstadoOrder::EnProceso
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_apertura_cierre_y_cooldown() {
    let (_archivo, estado) = crear_estado_rapido();
    let id = orden_en_proceso(&estado, "OF-AP2");
    snapshot_ok(&estado).await;

    // FALLO 保持超过 T_OPEN: 开启 AVERIA_PONDERAL
    pin(&estado, PIN_PONDERAL, 0).await;
    sleep(Duration::from_millis(400)).await;

    let pausas = pausas_de(&estado, id);
    assert_eq!(pausas.len(), 1);
    assert_eq!(pausas[0].tipo, Some(TipoPausa::AveriaPonderal));
    assert_eq!(pausas[0].operario.as_deref(), Some("SISTEMA AUTOMATICO"));
    assert!(pausas[0].es_activa());
    assert!(estado.auto_pause.tiene_pausa_activa());
    assert_eq!(
        estado.order_engine.obtener(id).unwrap().estado,
        EstadoOrder::Pausada
    );

    // OK 保持超过 T_CLOSE: 关闭并进入冷却
    pin(&estado, PIN_PONDERAL, 1).await;
    sleep(Duration::from_millis(300)).await;

    let pausas = pausas_de(&estado, id);
    assert_eq!(pausas.len(), 1);
    assert!(!pausas[0].es_activa());
    assert!(!estado.auto_pause.tiene_pausa_activa());
    assert!(estado.auto_pause.en_cooldown());
    assert_eq!(
        estado.order_engine.obtener(id).unwrap().estado,
        EstadoOrder::EnProceso
    );

    // 冷却期内引脚再次 FALLO: 不开启新暂停
    pin(&estado, PIN_PONDERAL, 0).await;
    sleep(Duration::from_millis(250)).await;
    assert_eq!(pausas_de(&estado, id).len(), 1);

    // 冷却结束后重新评估: 引脚仍 FALLO → 第二条自动暂停
    sleep(Duration::from_millis(900)).await;
    let pausas = pausas_de(&estado, id);
    assert_eq!(pausas.len(), 2);
    assert!(estado.auto_pause.tiene_pausa_activa());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exclusion_mutua_entre_pines() {
    let (_archivo, estado) = crear_estado_rapido();
    let id = orden_en_proceso(&estado, "OF-AP3");
    snapshot_ok(&estado).await;

    // 两个引脚同时 FALLO: 仅开启一条 (首个命中者)
    pin(&estado, PIN_PONDERAL, 0).await;
    pin(&estado, PIN_ETIQUETA, 0).await;
    sleep(Duration::from_millis(400)).await;

    let pausas = pausas_de(&estado, id);
    assert_eq!(pausas.len(), 1);
    assert_eq!(pausas[0].tipo, Some(TipoPausa::AveriaPonderal));
    assert!(estado.auto_pause.tiene_pausa_activa());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sin_orden_en_proceso_no_abre() {
    let (archivo, estado) = crear_estado_rapido();
    snapshot_ok(&estado).await;

    pin(&estado, PIN_ETIQUETA, 0).await;
    sleep(Duration::from_millis(400)).await;

    assert!(!estado.auto_pause.tiene_pausa_activa());
    let conn = test_helpers::abrir_conexion(&archivo.path().to_string_lossy());
    assert_eq!(test_helpers::contar_filas(&conn, "pauses", "1=1"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conciliacion_con_cierre_manual() {
    // 操作员手工关闭自动暂停: 对账任务清理检测器状态并进入冷却
    let (_archivo, estado) = crear_estado_rapido();
    let id = orden_en_proceso(&estado, "OF-AP4");
    AutoPauseDetector::iniciar_tareas(&estado.auto_pause);
    snapshot_ok(&estado).await;

    pin(&estado, PIN_ETIQUETA, 0).await;
    sleep(Duration::from_millis(400)).await;

    let pausas = pausas_de(&estado, id);
    assert_eq!(pausas.len(), 1);
    assert_eq!(pausas[0].tipo, Some(TipoPausa::AveriaEtiqueta));
    assert!(estado.auto_pause.tiene_pausa_activa());

    // 手工关闭 (引脚仍在 FALLO)
    estado
        .pause_engine
        .cerrar(id, pausas[0].id_pausa, PauseClose::default())
        .unwrap();

    // 对账周期后: 状态清理 + 冷却
    sleep(Duration::from_millis(400)).await;
    assert!(!estado.auto_pause.tiene_pausa_activa());
    assert!(estado.auto_pause.en_cooldown());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pausa_manual_bloquea_deteccion() {
    // 订单处于人工暂停 (PAUSADA): 检测器不得开启自动暂停
    let (_archivo, estado) = crear_estado_rapido();
    let id = orden_en_proceso(&estado, "OF-AP5");
    snapshot_ok(&estado).await;

    estado
        .pause_engine
        .abrir(
            id,
            PauseOpen {
                tipo: Some(TipoPausa::LimpiezaEnProceso),
                ..PauseOpen::default()
            },
        )
        .unwrap();

    pin(&estado, PIN_PONDERAL, 0).await;
    sleep(Duration::from_millis(400)).await;

    // 仅存在手工暂停
    let pausas = pausas_de(&estado, id);
    assert_eq!(pausas.len(), 1);
    assert_eq!(pausas[0].tipo, Some(TipoPausa::LimpiezaEnProceso));
    assert!(!estado.auto_pause.tiene_pausa_activa());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_observador_rearma_tras_pausa_manual() {
    // 人工暂停期间引脚已在 FALLO; 关闭人工暂停回到 EN_PROCESO 后,
    // 观察任务重新评估并开启自动暂停
    let (_archivo, estado) = crear_estado_rapido();
    let id = orden_en_proceso(&estado, "OF-AP6");
    AutoPauseDetector::iniciar_tareas(&estado.auto_pause);
    snapshot_ok(&estado).await;

    let manual = estado
        .pause_engine
        .abrir(
            id,
            PauseOpen {
                tipo: Some(TipoPausa::FaltaMaterial),
                ..PauseOpen::default()
            },
        )
        .unwrap();

    pin(&estado, PIN_ETIQUETA, 0).await;
    sleep(Duration::from_millis(300)).await;
    assert!(!estado.auto_pause.tiene_pausa_activa());

    // 恢复生产: 观察周期 (100ms) + T_OPEN (200ms) 后应开启自动暂停
    estado
        .pause_engine
        .cerrar(id, manual.id_pausa, PauseClose::default())
        .unwrap();
    sleep(Duration::from_millis(700)).await;

    assert!(estado.auto_pause.tiene_pausa_activa());
    let pausas = pausas_de(&estado, id);
    assert_eq!(pausas.len(), 2);
    let automatica = pausas.iter().find(|p| p.es_activa()).unwrap();
    assert_eq!(automatica.tipo, Some(TipoPausa::AveriaEtiqueta));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_cancela_timers() {
    let (_archivo, estado) = crear_estado_rapido();
    let id = orden_en_proceso(&estado, "OF-AP7");
    snapshot_ok(&estado).await;

    // 武装开启定时器后立即关闭检测器: 定时器不得再触发
    pin(&estado, PIN_PONDERAL, 0).await;
    estado.auto_pause.shutdown();
    estado.auto_pause.shutdown(); // 幂等

    sleep(Duration::from_millis(400)).await;
    assert!(pausas_de(&estado, id).is_empty());
}
