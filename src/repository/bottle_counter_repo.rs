// ==========================================
// 灌装线生产执行系统 - 瓶计数器数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 不变量由引擎保证: 激活前先 deactivate_all
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::fmt_datetime;
use crate::domain::bottle_counter::BottleCounter;
use crate::repository::error::RepositoryResult;
use crate::repository::order_repo::{parse_dt_col, parse_dt_col_opt};

const COUNTER_COLS: &str = "id, id_order, quantity, is_active, created_at, last_updated, \
                            last_bottle_counted_at";

// ==========================================
// BottleCounterRepository - 瓶计数器仓储
// ==========================================
pub struct BottleCounterRepository;

impl BottleCounterRepository {
    /// 插入计数器, 返回自增主键
    pub fn insert(&self, conn: &Connection, counter: &BottleCounter) -> RepositoryResult<i64> {
        conn.execute(
            r#"INSERT INTO bottle_counter (
                id_order, quantity, is_active, created_at, last_updated, last_bottle_counted_at
            ) VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                counter.id_order,
                counter.quantity,
                counter.is_active,
                fmt_datetime(counter.created_at),
                fmt_datetime(counter.last_updated),
                counter.last_bottle_counted_at.map(fmt_datetime),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按订单查询
    pub fn find_by_order(
        &self,
        conn: &Connection,
        id_order: i64,
    ) -> RepositoryResult<Option<BottleCounter>> {
        let sql = format!("SELECT {COUNTER_COLS} FROM bottle_counter WHERE id_order = ?");
        conn.query_row(&sql, params![id_order], map_counter_row)
            .optional()
            .map_err(Into::into)
    }

    /// 查询当前激活的计数器
    pub fn find_activo(&self, conn: &Connection) -> RepositoryResult<Option<BottleCounter>> {
        let sql = format!(
            "SELECT {COUNTER_COLS} FROM bottle_counter WHERE is_active = 1 LIMIT 1"
        );
        conn.query_row(&sql, [], map_counter_row)
            .optional()
            .map_err(Into::into)
    }

    /// 全字段更新 (按主键)
    pub fn update(&self, conn: &Connection, counter: &BottleCounter) -> RepositoryResult<()> {
        conn.execute(
            r#"UPDATE bottle_counter
               SET quantity = ?, is_active = ?, last_updated = ?, last_bottle_counted_at = ?
               WHERE id = ?"#,
            params![
                counter.quantity,
                counter.is_active,
                fmt_datetime(counter.last_updated),
                counter.last_bottle_counted_at.map(fmt_datetime),
                counter.id,
            ],
        )?;
        Ok(())
    }

    /// 一次性去激活全部计数器
    pub fn deactivate_all(&self, conn: &Connection) -> RepositoryResult<()> {
        conn.execute("UPDATE bottle_counter SET is_active = 0 WHERE is_active = 1", [])?;
        Ok(())
    }

    /// 统计激活中的计数器数量
    pub fn count_activos(&self, conn: &Connection) -> RepositoryResult<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bottle_counter WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 删除订单的计数器
    pub fn delete_by_order(&self, conn: &Connection, id_order: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM bottle_counter WHERE id_order = ?", params![id_order])?;
        Ok(())
    }
}

/// 映射数据库行到 BottleCounter 对象
fn map_counter_row(row: &rusqlite::Row) -> rusqlite::Result<BottleCounter> {
    Ok(BottleCounter {
        id: row.get(0)?,
        id_order: row.get(1)?,
        quantity: row.get(2)?,
        is_active: row.get(3)?,
        created_at: parse_dt_col(row, 4)?,
        last_updated: parse_dt_col(row, 5)?,
        last_bottle_counted_at: parse_dt_col_opt(row, 6)?,
    })
}
