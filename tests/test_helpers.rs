// ==========================================
// 集成测试辅助
// ==========================================
// 每个测试使用独立的临时 SQLite 文件库
// ==========================================

use std::time::Duration;

use packline_mes::engine::OrderCreate;
use packline_mes::{AppConfig, AppState};
use rusqlite::{params, Connection};
use tempfile::NamedTempFile;

/// 创建指向临时库的配置 (检测器时序缩短, 便于定时测试)
pub fn config_de_prueba(db_path: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.db_path = db_path.to_string();
    // 本地不可达端口: 链路任务在测试中不启动
    config.gpio_host = "127.0.0.1".to_string();
    config.gpio_port = 1;
    config.t_open = Duration::from_millis(200);
    config.t_close = Duration::from_millis(100);
    config.t_cooldown = Duration::from_millis(400);
    config.reconcile_interval = Duration::from_millis(100);
    config.observer_interval = Duration::from_millis(100);
    config
}

/// 创建临时数据库上的完整 AppState
pub fn crear_estado() -> (NamedTempFile, AppState) {
    let archivo = NamedTempFile::new().expect("crear archivo temporal");
    let db_path = archivo.path().to_string_lossy().to_string();
    let config = config_de_prueba(&db_path);
    let estado = AppState::new(&config).expect("crear AppState");
    (archivo, estado)
}

/// 标准测试订单: 1000 瓶, 每箱 10, 20 瓶/分
pub fn orden_basica(cod_order: &str) -> OrderCreate {
    OrderCreate {
        cod_order: cod_order.to_string(),
        operario: "A".to_string(),
        lote: "L1".to_string(),
        articulo: "X".to_string(),
        descripcion: None,
        cantidad: 1000,
        botes_caja: 10,
        std_referencia: 20.0,
        formato_bote: Some("500ml".to_string()),
        tipo: Some("Conserva".to_string()),
        uds_bote: Some(500),
    }
}

/// 打开指向同一临时库的辅助连接 (用于直接校验/改写行)
pub fn abrir_conexion(db_path: &str) -> Connection {
    packline_mes::db::open_sqlite_connection(db_path).expect("abrir conexión auxiliar")
}

/// 把订单的 hora_inicio 向过去平移指定分钟数 (构造确定的生产时长)
pub fn retroceder_inicio(conn: &Connection, id_order: i64, minutos: f64) {
    let actual: String = conn
        .query_row(
            "SELECT hora_inicio FROM orders WHERE id_order = ?",
            params![id_order],
            |row| row.get(0),
        )
        .expect("leer hora_inicio");
    let parsed = packline_mes::db::parse_datetime(&actual).expect("parsear hora_inicio");
    let nueva = parsed - chrono::Duration::milliseconds((minutos * 60_000.0) as i64);
    conn.execute(
        "UPDATE orders SET hora_inicio = ? WHERE id_order = ?",
        params![packline_mes::db::fmt_datetime(nueva), id_order],
    )
    .expect("retroceder hora_inicio");
}

/// 固定一条已关闭暂停的区间与时长 (分钟)
pub fn fijar_pausa_cerrada(conn: &Connection, id_pausa: i64, duracion_min: f64) {
    let fin: String = conn
        .query_row(
            "SELECT hora_fin FROM pauses WHERE id_pausa = ?",
            params![id_pausa],
            |row| row.get(0),
        )
        .expect("leer hora_fin de la pausa");
    let fin = packline_mes::db::parse_datetime(&fin).expect("parsear hora_fin");
    let inicio = fin - chrono::Duration::milliseconds((duracion_min * 60_000.0) as i64);
    conn.execute(
        "UPDATE pauses SET hora_inicio = ?, tiempo_total_pausa = ? WHERE id_pausa = ?",
        params![
            packline_mes::db::fmt_datetime(inicio),
            duracion_min,
            id_pausa
        ],
    )
    .expect("fijar duración de la pausa");
}

/// 统计表行数
pub fn contar_filas(conn: &Connection, tabla: &str, filtro: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {tabla} WHERE {filtro}");
    conn.query_row(&sql, [], |row| row.get(0)).expect("contar filas")
}
