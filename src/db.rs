// ==========================================
// 灌装线生产执行系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表 (所有实体见 schema 常量)
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 数据库日期时间存储格式（毫秒精度, 暂停时长校验依赖该精度）
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 幂等初始化全部业务表
///
/// 实体布局: 每订单一行 orders; pauses 多行但同一时刻最多一条未关闭;
/// metricas / acumula / bottle_counter / extra_data 与订单 1:1;
/// order_delete_audit 仅追加 (审计行在订单删除后仍需存在, 不设外键)。
/// 子表均以外键挂到 orders; 删除引擎自行先清子表再删订单,
/// 因此不用 ON DELETE CASCADE。
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id_order            INTEGER PRIMARY KEY AUTOINCREMENT,
            hora_creacion       TEXT NOT NULL,
            hora_inicio         TEXT,
            hora_fin            TEXT,
            operario            TEXT NOT NULL,
            cod_order           TEXT NOT NULL UNIQUE,
            lote                TEXT NOT NULL,
            articulo            TEXT NOT NULL,
            descripcion         TEXT,
            estado              TEXT NOT NULL,
            cantidad            INTEGER NOT NULL,
            botes_caja          INTEGER NOT NULL,
            repercap            INTEGER NOT NULL DEFAULT 0,
            botes_buenos        INTEGER,
            botes_malos         INTEGER,
            cajas_previstas     REAL NOT NULL,
            total_cajas_cierre  INTEGER,
            acumula             INTEGER NOT NULL DEFAULT 0,
            std_referencia      REAL NOT NULL,
            tiempo_estimado     REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_orders_estado ON orders(estado);
        CREATE INDEX IF NOT EXISTS idx_orders_hora_inicio ON orders(hora_inicio);

        CREATE TABLE IF NOT EXISTS extra_data (
            id_extra_data  INTEGER PRIMARY KEY AUTOINCREMENT,
            id_order       INTEGER NOT NULL REFERENCES orders(id_order),
            formato_bote   TEXT,
            tipo           TEXT,
            uds_bote       INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_extra_data_order ON extra_data(id_order);

        CREATE TABLE IF NOT EXISTS pauses (
            id_pausa            INTEGER PRIMARY KEY AUTOINCREMENT,
            id_order            INTEGER NOT NULL REFERENCES orders(id_order),
            tipo                TEXT,
            descripcion         TEXT,
            operario            TEXT,
            computa             INTEGER,
            hora_inicio         TEXT NOT NULL,
            hora_fin            TEXT,
            tiempo_total_pausa  REAL
        );
        CREATE INDEX IF NOT EXISTS idx_pauses_order ON pauses(id_order);
        CREATE INDEX IF NOT EXISTS idx_pauses_abiertas ON pauses(id_order) WHERE hora_fin IS NULL;

        CREATE TABLE IF NOT EXISTS metricas (
            id_metricas      INTEGER PRIMARY KEY AUTOINCREMENT,
            id_order         INTEGER NOT NULL UNIQUE REFERENCES orders(id_order),
            tiempo_total     REAL NOT NULL,
            tiempo_pausado   REAL NOT NULL,
            tiempo_activo    REAL NOT NULL,
            disponibilidad   REAL NOT NULL,
            rendimiento      REAL NOT NULL,
            calidad          REAL NOT NULL,
            oee              REAL NOT NULL,
            std_real         REAL NOT NULL,
            por_cump_pedido  REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS acumula (
            id_acumula        INTEGER PRIMARY KEY AUTOINCREMENT,
            id_order          INTEGER NOT NULL UNIQUE REFERENCES orders(id_order),
            hora_inicio       TEXT NOT NULL,
            hora_fin          TEXT,
            tiempo_total      REAL,
            num_cajas_manual  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS bottle_counter (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            id_order                INTEGER NOT NULL UNIQUE REFERENCES orders(id_order),
            quantity                INTEGER NOT NULL DEFAULT 0,
            is_active               INTEGER NOT NULL DEFAULT 0,
            created_at              TEXT NOT NULL,
            last_updated            TEXT NOT NULL,
            last_bottle_counted_at  TEXT
        );

        CREATE TABLE IF NOT EXISTS order_delete_audit (
            id_audit              INTEGER PRIMARY KEY AUTOINCREMENT,
            id_order_deleted      INTEGER NOT NULL,
            cod_order             TEXT NOT NULL,
            operario              TEXT NOT NULL,
            lote                  TEXT NOT NULL,
            articulo              TEXT NOT NULL,
            estado_al_eliminar    TEXT NOT NULL,
            fecha_creacion_order  TEXT NOT NULL,
            cantidad              INTEGER NOT NULL,
            botes_buenos          INTEGER,
            botes_malos           INTEGER,
            deleted_by            TEXT NOT NULL,
            motivo                TEXT,
            deleted_at            TEXT NOT NULL,
            ip_address            TEXT
        );
        "#,
    )?;
    Ok(())
}

// ==========================================
// 日期时间辅助
// ==========================================
// 部署约定: 主机时钟固定为 Europe/Madrid, 库内统一存本地时间

/// 当前本地时间
pub fn ahora() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// 两个时间点之间的分钟数 (浮点)
pub fn minutos_entre(inicio: NaiveDateTime, fin: NaiveDateTime) -> f64 {
    let delta = fin.signed_duration_since(inicio);
    delta.num_milliseconds() as f64 / 60_000.0
}

/// 格式化日期时间为数据库字符串
pub fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

/// 从数据库字符串解析日期时间
///
/// 兼容带毫秒与不带毫秒两种历史格式
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_init_schema_idempotente() {
        let conn = Connection::open_in_memory().expect("abrir db");
        init_schema(&conn).expect("primera vez");
        init_schema(&conn).expect("segunda vez");
    }

    #[test]
    fn test_datetime_roundtrip() {
        let dt = NaiveDate::from_ymd_opt(2024, 11, 25)
            .unwrap()
            .and_hms_milli_opt(8, 30, 15, 250)
            .unwrap();
        let parsed = parse_datetime(&fmt_datetime(dt)).unwrap();
        assert_eq!(parsed, dt);

        // 无毫秒的历史格式也能解析
        let legado = parse_datetime("2024-11-25 08:30:15").unwrap();
        assert_eq!(legado.and_utc().timestamp_subsec_millis(), 0);
    }

    #[test]
    fn test_minutos_entre() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 15, 0).unwrap();
        assert_eq!(minutos_entre(a, b), 15.0);
        assert_eq!(minutos_entre(b, a), -15.0);

        let c = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_milli_opt(10, 0, 30, 0).unwrap();
        assert!((minutos_entre(a, c) - 0.5).abs() < 1e-9);
    }
}
