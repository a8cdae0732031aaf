// ==========================================
// 灌装线生产执行系统 - 删除审计数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 仅追加表, 不提供更新与删除
// ==========================================

use rusqlite::{params, Connection};

use crate::db::fmt_datetime;
use crate::domain::delete_audit::OrderDeleteAudit;
use crate::domain::types::EstadoOrder;
use crate::repository::error::RepositoryResult;
use crate::repository::order_repo::parse_dt_col;

const AUDIT_COLS: &str = "id_audit, id_order_deleted, cod_order, operario, lote, articulo, \
                          estado_al_eliminar, fecha_creacion_order, cantidad, botes_buenos, \
                          botes_malos, deleted_by, motivo, deleted_at, ip_address";

// ==========================================
// DeleteAuditRepository - 删除审计仓储
// ==========================================
pub struct DeleteAuditRepository;

impl DeleteAuditRepository {
    /// 插入审计快照, 返回自增主键
    pub fn insert(&self, conn: &Connection, audit: &OrderDeleteAudit) -> RepositoryResult<i64> {
        conn.execute(
            r#"INSERT INTO order_delete_audit (
                id_order_deleted, cod_order, operario, lote, articulo, estado_al_eliminar,
                fecha_creacion_order, cantidad, botes_buenos, botes_malos,
                deleted_by, motivo, deleted_at, ip_address
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                audit.id_order_deleted,
                &audit.cod_order,
                &audit.operario,
                &audit.lote,
                &audit.articulo,
                audit.estado_al_eliminar.to_db_str(),
                fmt_datetime(audit.fecha_creacion_order),
                audit.cantidad,
                audit.botes_buenos,
                audit.botes_malos,
                &audit.deleted_by,
                &audit.motivo,
                fmt_datetime(audit.deleted_at),
                &audit.ip_address,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 查询最近的审计记录 (删除时间倒序)
    pub fn find_recientes(
        &self,
        conn: &Connection,
        limit: i64,
    ) -> RepositoryResult<Vec<OrderDeleteAudit>> {
        let sql = format!(
            "SELECT {AUDIT_COLS} FROM order_delete_audit \
             ORDER BY deleted_at DESC, id_audit DESC LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let audits = stmt
            .query_map(params![limit], map_audit_row)?
            .collect::<Result<Vec<OrderDeleteAudit>, _>>()?;
        Ok(audits)
    }
}

/// 映射数据库行到 OrderDeleteAudit 对象
fn map_audit_row(row: &rusqlite::Row) -> rusqlite::Result<OrderDeleteAudit> {
    let estado_str: String = row.get(6)?;
    let estado = EstadoOrder::from_db_str(&estado_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("estado desconocido: {estado_str}").into(),
        )
    })?;

    Ok(OrderDeleteAudit {
        id_audit: row.get(0)?,
        id_order_deleted: row.get(1)?,
        cod_order: row.get(2)?,
        operario: row.get(3)?,
        lote: row.get(4)?,
        articulo: row.get(5)?,
        estado_al_eliminar: estado,
        fecha_creacion_order: parse_dt_col(row, 7)?,
        cantidad: row.get(8)?,
        botes_buenos: row.get(9)?,
        botes_malos: row.get(10)?,
        deleted_by: row.get(11)?,
        motivo: row.get(12)?,
        deleted_at: parse_dt_col(row, 13)?,
        ip_address: row.get(14)?,
    })
}
