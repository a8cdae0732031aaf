// ==========================================
// 灌装线生产执行系统 - 人工收尾数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::fmt_datetime;
use crate::domain::acumula::Acumula;
use crate::repository::error::RepositoryResult;
use crate::repository::order_repo::{parse_dt_col, parse_dt_col_opt};

const ACUMULA_COLS: &str = "id_acumula, id_order, hora_inicio, hora_fin, tiempo_total, num_cajas_manual";

// ==========================================
// AcumulaRepository - 人工收尾仓储
// ==========================================
pub struct AcumulaRepository;

impl AcumulaRepository {
    /// 插入人工收尾记录, 返回自增主键
    pub fn insert(&self, conn: &Connection, acumula: &Acumula) -> RepositoryResult<i64> {
        conn.execute(
            r#"INSERT INTO acumula (id_order, hora_inicio, hora_fin, tiempo_total, num_cajas_manual)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                acumula.id_order,
                fmt_datetime(acumula.hora_inicio),
                acumula.hora_fin.map(fmt_datetime),
                acumula.tiempo_total,
                acumula.num_cajas_manual,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按订单查询
    pub fn find_by_order(
        &self,
        conn: &Connection,
        id_order: i64,
    ) -> RepositoryResult<Option<Acumula>> {
        let sql = format!("SELECT {ACUMULA_COLS} FROM acumula WHERE id_order = ?");
        conn.query_row(&sql, params![id_order], map_acumula_row)
            .optional()
            .map_err(Into::into)
    }

    /// 查询订单的进行中记录 (hora_fin 为空)
    pub fn find_activa_by_order(
        &self,
        conn: &Connection,
        id_order: i64,
    ) -> RepositoryResult<Option<Acumula>> {
        let sql = format!(
            "SELECT {ACUMULA_COLS} FROM acumula WHERE id_order = ? AND hora_fin IS NULL"
        );
        conn.query_row(&sql, params![id_order], map_acumula_row)
            .optional()
            .map_err(Into::into)
    }

    /// 判断订单是否有进行中的人工收尾
    pub fn has_activo(&self, conn: &Connection, id_order: i64) -> RepositoryResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM acumula WHERE id_order = ? AND hora_fin IS NULL",
            params![id_order],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 全字段更新 (按主键)
    pub fn update(&self, conn: &Connection, acumula: &Acumula) -> RepositoryResult<()> {
        conn.execute(
            r#"UPDATE acumula
               SET hora_fin = ?, tiempo_total = ?, num_cajas_manual = ?
               WHERE id_acumula = ?"#,
            params![
                acumula.hora_fin.map(fmt_datetime),
                acumula.tiempo_total,
                acumula.num_cajas_manual,
                acumula.id_acumula,
            ],
        )?;
        Ok(())
    }

    /// 删除订单的人工收尾记录
    pub fn delete_by_order(&self, conn: &Connection, id_order: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM acumula WHERE id_order = ?", params![id_order])?;
        Ok(())
    }
}

/// 映射数据库行到 Acumula 对象
fn map_acumula_row(row: &rusqlite::Row) -> rusqlite::Result<Acumula> {
    Ok(Acumula {
        id_acumula: row.get(0)?,
        id_order: row.get(1)?,
        hora_inicio: parse_dt_col(row, 2)?,
        hora_fin: parse_dt_col_opt(row, 3)?,
        tiempo_total: row.get(4)?,
        num_cajas_manual: row.get(5)?,
    })
}
