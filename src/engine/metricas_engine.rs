// ==========================================
// 灌装线生产执行系统 - 生产指标计算引擎
// ==========================================
// OEE = disponibilidad × rendimiento × calidad
// 幂等: 指标行已存在则直接返回, 不重算
// 唯一写入点: 订单首次离开 EN_PROCESO (订单引擎收尾事务内)
// 显式 recalcular 例外: 同一事务内删除旧行并重建
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::db::{ahora, minutos_entre};
use crate::domain::metricas::Metricas;
use crate::domain::order::Order;
use crate::engine::error::{EngineError, EngineResult};
use crate::repository::{MetricasRepository, OrderRepository, PauseRepository};

// ==========================================
// 纯计算核心
// ==========================================

/// 指标计算结果 (未持久化)
#[derive(Debug, Clone, PartialEq)]
pub struct ValoresMetricas {
    pub tiempo_total: f64,
    pub tiempo_pausado: f64,
    pub tiempo_activo: f64,
    pub disponibilidad: f64,
    pub rendimiento: f64,
    pub calidad: f64,
    pub oee: f64,
    pub std_real: f64,
    pub por_cump_pedido: f64,
}

/// 按公式计算一张订单的指标
///
/// 时间单位: 分钟
/// - tiempo_total = (hora_fin - hora_inicio) - 不可计入暂停
/// - tiempo_activo = tiempo_total - 可计入暂停, 下限 1 分钟 (避免除零)
/// - std_real 与 std_referencia 同单位 (瓶/分钟)
pub fn calcular_valores(
    order: &Order,
    hora_inicio: NaiveDateTime,
    hora_fin: NaiveDateTime,
    pausas_no_computables: f64,
    pausas_computables: f64,
) -> ValoresMetricas {
    let tiempo_bruto = minutos_entre(hora_inicio, hora_fin);
    let tiempo_total = tiempo_bruto - pausas_no_computables;
    let tiempo_pausado = pausas_computables;
    let tiempo_activo = (tiempo_total - tiempo_pausado).max(1.0);

    let disponibilidad = if tiempo_total > 0.0 {
        tiempo_activo / tiempo_total
    } else {
        0.0
    };

    let botes_buenos = order.botes_buenos.unwrap_or(0);
    let total_producido = botes_buenos + order.botes_malos.unwrap_or(0);

    let produccion_esperada = tiempo_activo * order.std_referencia;
    let rendimiento = if produccion_esperada > 0.0 {
        total_producido as f64 / produccion_esperada
    } else {
        0.0
    };

    let calidad = if total_producido > 0 {
        botes_buenos as f64 / total_producido as f64
    } else {
        0.0
    };

    let oee = disponibilidad * rendimiento * calidad;

    let std_real = if tiempo_activo > 0.0 {
        total_producido as f64 / tiempo_activo
    } else {
        0.0
    };

    let por_cump_pedido = botes_buenos as f64 / order.cantidad.max(1) as f64;

    ValoresMetricas {
        tiempo_total,
        tiempo_pausado,
        tiempo_activo,
        disponibilidad,
        rendimiento,
        calidad,
        oee,
        std_real,
        por_cump_pedido,
    }
}

impl ValoresMetricas {
    /// 组装为待插入的实体
    fn a_entidad(&self, id_order: i64) -> Metricas {
        Metricas {
            id_metricas: 0,
            id_order,
            tiempo_total: self.tiempo_total,
            tiempo_pausado: self.tiempo_pausado,
            tiempo_activo: self.tiempo_activo,
            disponibilidad: self.disponibilidad,
            rendimiento: self.rendimiento,
            calidad: self.calidad,
            oee: self.oee,
            std_real: self.std_real,
            por_cump_pedido: self.por_cump_pedido,
        }
    }
}

// ==========================================
// 重算汇总
// ==========================================

/// 单订单重算结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetalleRecalculo {
    pub id_order: i64,
    pub cod_order: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 批量重算汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumenRecalculo {
    pub total_candidatas: usize,
    pub recalculadas: usize,
    pub saltadas: usize,
    pub detalles: Vec<DetalleRecalculo>,
}

// ==========================================
// MetricasEngine - 指标引擎
// ==========================================
pub struct MetricasEngine {
    conn: Arc<Mutex<Connection>>,
    orders: OrderRepository,
    pauses: PauseRepository,
    metricas: MetricasRepository,
}

impl MetricasEngine {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            orders: OrderRepository,
            pauses: PauseRepository,
            metricas: MetricasRepository,
        }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("锁获取失败: {e}")))
    }

    /// 在收尾事务内计算并写入指标 (由订单引擎调用)
    ///
    /// 幂等: 已有指标行时原样返回, 不重算。
    /// 订单无 hora_inicio 时无法计算, 返回 None。
    pub fn calcular_y_guardar(
        &self,
        conn: &Connection,
        order: &Order,
        ahora_op: NaiveDateTime,
    ) -> EngineResult<Option<Metricas>> {
        if let Some(existentes) = self.metricas.find_by_order(conn, order.id_order)? {
            info!(
                id_order = order.id_order,
                "指标已存在, 不重算 (orden {})", order.cod_order
            );
            return Ok(Some(existentes));
        }

        let Some(hora_inicio) = order.hora_inicio else {
            warn!(
                id_order = order.id_order,
                "订单无 hora_inicio, 无法计算指标 (orden {})", order.cod_order
            );
            return Ok(None);
        };

        // 收尾路径订单必有 hora_fin; 兜底取操作时刻
        let hora_fin = order.hora_fin.unwrap_or(ahora_op);

        let no_computables = self
            .pauses
            .suma_tiempo_por_computa(conn, order.id_order, false)?;
        let computables = self
            .pauses
            .suma_tiempo_por_computa(conn, order.id_order, true)?;

        let valores = calcular_valores(order, hora_inicio, hora_fin, no_computables, computables);
        let mut entidad = valores.a_entidad(order.id_order);
        entidad.id_metricas = self.metricas.insert(conn, &entidad)?;

        info!(
            id_order = order.id_order,
            oee = entidad.oee,
            disponibilidad = entidad.disponibilidad,
            rendimiento = entidad.rendimiento,
            calidad = entidad.calidad,
            "指标计算完成 (orden {})",
            order.cod_order
        );

        Ok(Some(entidad))
    }

    /// 显式重算单订单指标: 删除旧行并在同一事务内重建
    ///
    /// 仅允许 FINALIZADA / ESPERA_MANUAL / PROCESO_MANUAL 状态
    pub fn recalcular(&self, id_order: i64) -> EngineResult<Metricas> {
        info!(id_order, "重算订单指标");

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

        let order = self
            .orders
            .find_by_id(&tx, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

        if !order.estado.es_cerrado() {
            return Err(EngineError::InvalidState(format!(
                "solo se pueden recalcular métricas de órdenes FINALIZADAS, ESPERA_MANUAL o \
                 PROCESO_MANUAL. Estado actual: {}",
                order.estado
            )));
        }

        let Some(hora_inicio) = order.hora_inicio else {
            return Err(EngineError::InvalidState(format!(
                "la orden {} no tiene hora de inicio; no se pueden calcular métricas",
                order.cod_order
            )));
        };

        self.metricas.delete_by_order(&tx, id_order)?;

        let hora_fin = order.hora_fin.unwrap_or_else(ahora);
        let no_computables = self.pauses.suma_tiempo_por_computa(&tx, id_order, false)?;
        let computables = self.pauses.suma_tiempo_por_computa(&tx, id_order, true)?;

        let valores = calcular_valores(&order, hora_inicio, hora_fin, no_computables, computables);
        let mut entidad = valores.a_entidad(id_order);
        entidad.id_metricas = self.metricas.insert(&tx, &entidad)?;

        tx.commit()
            .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;

        info!(id_order, oee = entidad.oee, "指标重算完成 (orden {})", order.cod_order);
        Ok(entidad)
    }

    /// 批量重算全部已关闭订单的指标
    pub fn recalcular_todas(&self) -> EngineResult<ResumenRecalculo> {
        info!("批量重算全部已关闭订单的指标");

        let candidatas: Vec<Order> = {
            let conn = self.get_conn()?;
            self.orders
                .find_all(&conn)?
                .into_iter()
                .filter(|o| o.estado.es_cerrado())
                .collect()
        };

        let mut resumen = ResumenRecalculo {
            total_candidatas: candidatas.len(),
            recalculadas: 0,
            saltadas: 0,
            detalles: Vec::new(),
        };

        for order in candidatas {
            if order.hora_inicio.is_none() {
                resumen.saltadas += 1;
                resumen.detalles.push(DetalleRecalculo {
                    id_order: order.id_order,
                    cod_order: order.cod_order,
                    status: "SKIPPED_NO_START_TIME".to_string(),
                    error: None,
                });
                continue;
            }

            match self.recalcular(order.id_order) {
                Ok(_) => {
                    resumen.recalculadas += 1;
                    resumen.detalles.push(DetalleRecalculo {
                        id_order: order.id_order,
                        cod_order: order.cod_order,
                        status: "OK".to_string(),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(id_order = order.id_order, "重算失败: {}", e);
                    resumen.saltadas += 1;
                    resumen.detalles.push(DetalleRecalculo {
                        id_order: order.id_order,
                        cod_order: order.cod_order,
                        status: "ERROR".to_string(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            total = resumen.total_candidatas,
            recalculadas = resumen.recalculadas,
            saltadas = resumen.saltadas,
            "批量重算完成"
        );
        Ok(resumen)
    }

    /// 查询订单指标
    pub fn obtener(&self, id_order: i64) -> EngineResult<Option<Metricas>> {
        let conn = self.get_conn()?;
        Ok(self.metricas.find_by_order(&conn, id_order)?)
    }

    /// 实时模拟指标 (不持久化)
    ///
    /// 用于活动订单的实时看板: 与持久化路径公式一致, hora_fin 取当前时刻。
    /// 订单已有持久化指标时直接返回持久化行。
    pub fn simuladas(&self, id_order: i64) -> EngineResult<Metricas> {
        let conn = self.get_conn()?;

        let order = self
            .orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

        if let Some(existentes) = self.metricas.find_by_order(&conn, id_order)? {
            return Ok(existentes);
        }

        let Some(hora_inicio) = order.hora_inicio else {
            // 未开始生产: 全零指标
            return Ok(Metricas {
                id_metricas: 0,
                id_order,
                tiempo_total: 0.0,
                tiempo_pausado: 0.0,
                tiempo_activo: 0.0,
                disponibilidad: 0.0,
                rendimiento: 0.0,
                calidad: 0.0,
                oee: 0.0,
                std_real: 0.0,
                por_cump_pedido: 0.0,
            });
        };

        let hora_fin = order.hora_fin.unwrap_or_else(ahora);
        let no_computables = self.pauses.suma_tiempo_por_computa(&conn, id_order, false)?;
        let computables = self.pauses.suma_tiempo_por_computa(&conn, id_order, true)?;

        let valores = calcular_valores(&order, hora_inicio, hora_fin, no_computables, computables);
        Ok(valores.a_entidad(id_order))
    }
}
