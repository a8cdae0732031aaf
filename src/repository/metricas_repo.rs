// ==========================================
// 灌装线生产执行系统 - 生产指标数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 每订单最多一行 (id_order UNIQUE)
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::metricas::Metricas;
use crate::repository::error::RepositoryResult;

const METRICAS_COLS: &str = "id_metricas, id_order, tiempo_total, tiempo_pausado, tiempo_activo, \
                             disponibilidad, rendimiento, calidad, oee, std_real, por_cump_pedido";

// ==========================================
// MetricasRepository - 指标仓储
// ==========================================
pub struct MetricasRepository;

impl MetricasRepository {
    /// 插入指标, 返回自增主键
    pub fn insert(&self, conn: &Connection, metricas: &Metricas) -> RepositoryResult<i64> {
        conn.execute(
            r#"INSERT INTO metricas (
                id_order, tiempo_total, tiempo_pausado, tiempo_activo, disponibilidad,
                rendimiento, calidad, oee, std_real, por_cump_pedido
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                metricas.id_order,
                metricas.tiempo_total,
                metricas.tiempo_pausado,
                metricas.tiempo_activo,
                metricas.disponibilidad,
                metricas.rendimiento,
                metricas.calidad,
                metricas.oee,
                metricas.std_real,
                metricas.por_cump_pedido,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按订单查询
    pub fn find_by_order(
        &self,
        conn: &Connection,
        id_order: i64,
    ) -> RepositoryResult<Option<Metricas>> {
        let sql = format!("SELECT {METRICAS_COLS} FROM metricas WHERE id_order = ?");
        conn.query_row(&sql, params![id_order], map_metricas_row)
            .optional()
            .map_err(Into::into)
    }

    /// 判断订单是否已有指标
    pub fn exists_by_order(&self, conn: &Connection, id_order: i64) -> RepositoryResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM metricas WHERE id_order = ?",
            params![id_order],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 删除订单的指标 (仅供显式重算与删除引擎调用)
    pub fn delete_by_order(&self, conn: &Connection, id_order: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM metricas WHERE id_order = ?", params![id_order])?;
        Ok(())
    }
}

/// 映射数据库行到 Metricas 对象
fn map_metricas_row(row: &rusqlite::Row) -> rusqlite::Result<Metricas> {
    Ok(Metricas {
        id_metricas: row.get(0)?,
        id_order: row.get(1)?,
        tiempo_total: row.get(2)?,
        tiempo_pausado: row.get(3)?,
        tiempo_activo: row.get(4)?,
        disponibilidad: row.get(5)?,
        rendimiento: row.get(6)?,
        calidad: row.get(7)?,
        oee: row.get(8)?,
        std_real: row.get(9)?,
        por_cump_pedido: row.get(10)?,
    })
}
