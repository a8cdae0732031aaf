// ==========================================
// 灌装线生产执行系统 - 订单数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 所有方法显式接收连接/事务句柄, 由引擎层决定事务边界
// ==========================================

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::db::{fmt_datetime, parse_datetime};
use crate::domain::order::{ExtraData, Order};
use crate::domain::types::EstadoOrder;
use crate::repository::error::{RepositoryError, RepositoryResult};

/// 订单列表查询过滤器 (全部可选)
#[derive(Debug, Clone, Default)]
pub struct OrderFiltro {
    pub estado: Option<EstadoOrder>,
    pub operario: Option<String>,
    pub lote: Option<String>,
    pub articulo: Option<String>,
}

impl OrderFiltro {
    /// 判断是否应用了任意过滤条件
    pub fn tiene_filtros(&self) -> bool {
        self.estado.is_some()
            || self.operario.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.lote.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.articulo.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

const ORDER_COLS: &str = "id_order, hora_creacion, hora_inicio, hora_fin, operario, cod_order, \
                          lote, articulo, descripcion, estado, cantidad, botes_caja, repercap, \
                          botes_buenos, botes_malos, cajas_previstas, total_cajas_cierre, \
                          acumula, std_referencia, tiempo_estimado";

// ==========================================
// OrderRepository - 订单仓储
// ==========================================
pub struct OrderRepository;

impl OrderRepository {
    /// 插入订单, 返回自增主键
    pub fn insert(&self, conn: &Connection, order: &Order) -> RepositoryResult<i64> {
        conn.execute(
            r#"INSERT INTO orders (
                hora_creacion, hora_inicio, hora_fin, operario, cod_order, lote, articulo,
                descripcion, estado, cantidad, botes_caja, repercap, botes_buenos, botes_malos,
                cajas_previstas, total_cajas_cierre, acumula, std_referencia, tiempo_estimado
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                fmt_datetime(order.hora_creacion),
                order.hora_inicio.map(fmt_datetime),
                order.hora_fin.map(fmt_datetime),
                &order.operario,
                &order.cod_order,
                &order.lote,
                &order.articulo,
                &order.descripcion,
                order.estado.to_db_str(),
                order.cantidad,
                order.botes_caja,
                order.repercap,
                order.botes_buenos,
                order.botes_malos,
                order.cajas_previstas,
                order.total_cajas_cierre,
                order.acumula,
                order.std_referencia,
                order.tiempo_estimado,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// 按主键查询
    pub fn find_by_id(&self, conn: &Connection, id_order: i64) -> RepositoryResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLS} FROM orders WHERE id_order = ?");
        conn.query_row(&sql, params![id_order], map_order_row)
            .optional()
            .map_err(Into::into)
    }

    /// 按业务编码查询
    pub fn find_by_cod(&self, conn: &Connection, cod_order: &str) -> RepositoryResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLS} FROM orders WHERE cod_order = ?");
        conn.query_row(&sql, params![cod_order], map_order_row)
            .optional()
            .map_err(Into::into)
    }

    /// 判断业务编码是否已存在
    pub fn exists_by_cod(&self, conn: &Connection, cod_order: &str) -> RepositoryResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE cod_order = ?",
            params![cod_order],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 全字段更新 (按主键)
    pub fn update(&self, conn: &Connection, order: &Order) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE orders
               SET hora_inicio = ?, hora_fin = ?, operario = ?, lote = ?, articulo = ?,
                   descripcion = ?, estado = ?, cantidad = ?, botes_caja = ?, repercap = ?,
                   botes_buenos = ?, botes_malos = ?, cajas_previstas = ?,
                   total_cajas_cierre = ?, acumula = ?, std_referencia = ?, tiempo_estimado = ?
               WHERE id_order = ?"#,
            params![
                order.hora_inicio.map(fmt_datetime),
                order.hora_fin.map(fmt_datetime),
                &order.operario,
                &order.lote,
                &order.articulo,
                &order.descripcion,
                order.estado.to_db_str(),
                order.cantidad,
                order.botes_caja,
                order.repercap,
                order.botes_buenos,
                order.botes_malos,
                order.cajas_previstas,
                order.total_cajas_cierre,
                order.acumula,
                order.std_referencia,
                order.tiempo_estimado,
                order.id_order,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Order".to_string(),
                id: order.id_order.to_string(),
            });
        }
        Ok(())
    }

    /// 查询指定状态集合的订单
    pub fn find_by_estados(
        &self,
        conn: &Connection,
        estados: &[EstadoOrder],
    ) -> RepositoryResult<Vec<Order>> {
        if estados.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; estados.len()].join(", ");
        let sql = format!(
            "SELECT {ORDER_COLS} FROM orders WHERE estado IN ({placeholders}) \
             ORDER BY hora_inicio IS NULL, hora_inicio DESC, id_order ASC"
        );

        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(
                params_from_iter(estados.iter().map(|e| e.to_db_str())),
                map_order_row,
            )?
            .collect::<Result<Vec<Order>, _>>()?;

        Ok(orders)
    }

    /// 条件查询订单列表 (创建时间倒序)
    ///
    /// 文本过滤为大小写不敏感的子串匹配
    pub fn listar(&self, conn: &Connection, filtro: &OrderFiltro) -> RepositoryResult<Vec<Order>> {
        let mut sql = format!("SELECT {ORDER_COLS} FROM orders WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(estado) = filtro.estado {
            sql.push_str(" AND estado = ?");
            args.push(estado.to_db_str().to_string());
        }
        if let Some(operario) = filtro.operario.as_deref().filter(|s| !s.trim().is_empty()) {
            sql.push_str(" AND LOWER(operario) LIKE ?");
            args.push(format!("%{}%", operario.trim().to_lowercase()));
        }
        if let Some(lote) = filtro.lote.as_deref().filter(|s| !s.trim().is_empty()) {
            sql.push_str(" AND LOWER(lote) LIKE ?");
            args.push(format!("%{}%", lote.trim().to_lowercase()));
        }
        if let Some(articulo) = filtro.articulo.as_deref().filter(|s| !s.trim().is_empty()) {
            sql.push_str(" AND LOWER(articulo) LIKE ?");
            args.push(format!("%{}%", articulo.trim().to_lowercase()));
        }

        sql.push_str(" ORDER BY hora_creacion DESC, id_order DESC");

        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(params_from_iter(args.iter()), map_order_row)?
            .collect::<Result<Vec<Order>, _>>()?;

        Ok(orders)
    }

    /// 查询全部订单
    pub fn find_all(&self, conn: &Connection) -> RepositoryResult<Vec<Order>> {
        self.listar(conn, &OrderFiltro::default())
    }

    /// 按状态统计订单数量
    pub fn count_por_estado(&self, conn: &Connection) -> RepositoryResult<HashMap<String, i64>> {
        // 先置零, 保证每个状态都有条目
        let mut stats: HashMap<String, i64> = EstadoOrder::TODOS
            .iter()
            .map(|e| (e.to_db_str().to_string(), 0))
            .collect();

        let mut stmt = conn.prepare("SELECT estado, COUNT(*) FROM orders GROUP BY estado")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (estado, count) = row?;
            stats.insert(estado, count);
        }

        Ok(stats)
    }

    /// 删除订单 (仅供删除引擎在审计之后调用)
    pub fn delete(&self, conn: &Connection, id_order: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM orders WHERE id_order = ?", params![id_order])?;
        Ok(())
    }
}

/// 映射数据库行到 Order 对象
fn map_order_row(row: &rusqlite::Row) -> rusqlite::Result<Order> {
    let estado_str: String = row.get(9)?;
    let estado = EstadoOrder::from_db_str(&estado_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("estado desconocido: {estado_str}").into(),
        )
    })?;

    Ok(Order {
        id_order: row.get(0)?,
        hora_creacion: parse_dt_col(row, 1)?,
        hora_inicio: parse_dt_col_opt(row, 2)?,
        hora_fin: parse_dt_col_opt(row, 3)?,
        operario: row.get(4)?,
        cod_order: row.get(5)?,
        lote: row.get(6)?,
        articulo: row.get(7)?,
        descripcion: row.get(8)?,
        estado,
        cantidad: row.get(10)?,
        botes_caja: row.get(11)?,
        repercap: row.get(12)?,
        botes_buenos: row.get(13)?,
        botes_malos: row.get(14)?,
        cajas_previstas: row.get(15)?,
        total_cajas_cierre: row.get(16)?,
        acumula: row.get(17)?,
        std_referencia: row.get(18)?,
        tiempo_estimado: row.get(19)?,
    })
}

/// 解析非空日期时间列
pub(crate) fn parse_dt_col(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<chrono::NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// 解析可空日期时间列
pub(crate) fn parse_dt_col_opt(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<chrono::NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(s) => parse_datetime(&s)
            .map(Some)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
        None => Ok(None),
    }
}

// ==========================================
// ExtraDataRepository - 订单附加数据仓储
// ==========================================
pub struct ExtraDataRepository;

impl ExtraDataRepository {
    /// 插入附加数据, 返回自增主键
    pub fn insert(&self, conn: &Connection, extra: &ExtraData) -> RepositoryResult<i64> {
        conn.execute(
            "INSERT INTO extra_data (id_order, formato_bote, tipo, uds_bote) VALUES (?, ?, ?, ?)",
            params![extra.id_order, &extra.formato_bote, &extra.tipo, extra.uds_bote],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 按订单查询
    pub fn find_by_order(
        &self,
        conn: &Connection,
        id_order: i64,
    ) -> RepositoryResult<Option<ExtraData>> {
        conn.query_row(
            "SELECT id_extra_data, id_order, formato_bote, tipo, uds_bote \
             FROM extra_data WHERE id_order = ?",
            params![id_order],
            |row| {
                Ok(ExtraData {
                    id_extra_data: row.get(0)?,
                    id_order: row.get(1)?,
                    formato_bote: row.get(2)?,
                    tipo: row.get(3)?,
                    uds_bote: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// 删除订单的附加数据
    pub fn delete_by_order(&self, conn: &Connection, id_order: i64) -> RepositoryResult<()> {
        conn.execute("DELETE FROM extra_data WHERE id_order = ?", params![id_order])?;
        Ok(())
    }
}
