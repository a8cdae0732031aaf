// ==========================================
// 灌装线生产执行系统 - 暂停数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::fmt_datetime;
use crate::domain::pause::Pause;
use crate::domain::types::TipoPausa;
use crate::repository::error::RepositoryResult;
use crate::repository::order_repo::{parse_dt_col, parse_dt_col_opt};

const PAUSE_COLS: &str = "id_pausa, id_order, tipo, descripcion, operario, computa, \
                          hora_inicio, hora_fin, tiempo_total_pausa";

// ==========================================
// PauseRepository - 暂停仓储
// ==========================================
pub struct PauseRepository;

impl PauseRepository {
    /// 插入暂停, 返回自增主键
    pub fn insert(&self, conn: &Connection, pause: &Pause) -> RepositoryResult<i64> {
        conn.execute(
            r#"INSERT INTO pauses (
                id_order, tipo, descripcion, operario, computa,
                hora_inicio, hora_fin, tiempo_total_pausa
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                pause.id_order,
                pause.tipo.map(|t| t.to_db_str()),
                &pause.descripcion,
                &pause.operario,
                pause.computa,
                fmt_datetime(pause.hora_inicio),
                pause.hora_fin.map(fmt_datetime),
                pause.tiempo_total_pausa,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按主键查询
    pub fn find_by_id(&self, conn: &Connection, id_pausa: i64) -> RepositoryResult<Option<Pause>> {
        let sql = format!("SELECT {PAUSE_COLS} FROM pauses WHERE id_pausa = ?");
        conn.query_row(&sql, params![id_pausa], map_pause_row)
            .optional()
            .map_err(Into::into)
    }

    /// 查询订单的未关闭暂停
    pub fn find_activa_by_order(
        &self,
        conn: &Connection,
        id_order: i64,
    ) -> RepositoryResult<Option<Pause>> {
        let sql = format!(
            "SELECT {PAUSE_COLS} FROM pauses WHERE id_order = ? AND hora_fin IS NULL"
        );
        conn.query_row(&sql, params![id_order], map_pause_row)
            .optional()
            .map_err(Into::into)
    }

    /// 判断订单是否存在未关闭暂停
    pub fn has_activa(&self, conn: &Connection, id_order: i64) -> RepositoryResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pauses WHERE id_order = ? AND hora_fin IS NULL",
            params![id_order],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 查询订单的全部暂停 (开始时间倒序)
    pub fn find_by_order(&self, conn: &Connection, id_order: i64) -> RepositoryResult<Vec<Pause>> {
        let sql = format!(
            "SELECT {PAUSE_COLS} FROM pauses WHERE id_order = ? \
             ORDER BY hora_inicio DESC, id_pausa DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let pauses = stmt
            .query_map(params![id_order], map_pause_row)?
            .collect::<Result<Vec<Pause>, _>>()?;
        Ok(pauses)
    }

    /// 全字段更新 (按主键)
    pub fn update(&self, conn: &Connection, pause: &Pause) -> RepositoryResult<()> {
        conn.execute(
            r#"UPDATE pauses
               SET tipo = ?, descripcion = ?, operario = ?, computa = ?,
                   hora_fin = ?, tiempo_total_pausa = ?
               WHERE id_pausa = ?"#,
            params![
                pause.tipo.map(|t| t.to_db_str()),
                &pause.descripcion,
                &pause.operario,
                pause.computa,
                pause.hora_fin.map(fmt_datetime),
                pause.tiempo_total_pausa,
                pause.id_pausa,
            ],
        )?;
        Ok(())
    }

    /// 已关闭暂停按 computa 分区求时长之和 (分钟)
    pub fn suma_tiempo_por_computa(
        &self,
        conn: &Connection,
        id_order: i64,
        computa: bool,
    ) -> RepositoryResult<f64> {
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(tiempo_total_pausa), 0.0) FROM pauses \
             WHERE id_order = ? AND hora_fin IS NOT NULL AND computa = ?",
            params![id_order, computa],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// 查询全部未关闭暂停, 排除指定类型 (用于非局部制造暂停看板)
    pub fn find_activas_excluyendo_tipo(
        &self,
        conn: &Connection,
        tipo: TipoPausa,
    ) -> RepositoryResult<Vec<Pause>> {
        let sql = format!(
            "SELECT {PAUSE_COLS} FROM pauses \
             WHERE hora_fin IS NULL AND (tipo IS NULL OR tipo != ?) \
             ORDER BY hora_inicio DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let pauses = stmt
            .query_map(params![tipo.to_db_str()], map_pause_row)?
            .collect::<Result<Vec<Pause>, _>>()?;
        Ok(pauses)
    }

    /// 查询存在指定类型未关闭暂停的订单 id 列表
    pub fn find_order_ids_con_tipo_activo(
        &self,
        conn: &Connection,
        tipo: TipoPausa,
    ) -> RepositoryResult<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT id_order FROM pauses WHERE hora_fin IS NULL AND tipo = ?",
        )?;
        let ids = stmt
            .query_map(params![tipo.to_db_str()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// 删除订单的全部暂停
    pub fn delete_by_order(&self, conn: &Connection, id_order: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM pauses WHERE id_order = ?", params![id_order])?;
        Ok(())
    }
}

/// 映射数据库行到 Pause 对象
fn map_pause_row(row: &rusqlite::Row) -> rusqlite::Result<Pause> {
    let tipo_str: Option<String> = row.get(2)?;
    let tipo = match tipo_str {
        Some(s) => Some(TipoPausa::from_db_str(&s).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("tipo de pausa desconocido: {s}").into(),
            )
        })?),
        None => None,
    };

    Ok(Pause {
        id_pausa: row.get(0)?,
        id_order: row.get(1)?,
        tipo,
        descripcion: row.get(3)?,
        operario: row.get(4)?,
        computa: row.get(5)?,
        hora_inicio: parse_dt_col(row, 6)?,
        hora_fin: parse_dt_col_opt(row, 7)?,
        tiempo_total_pausa: row.get(8)?,
    })
}
