// ==========================================
// 灌装线生产执行系统 - 人工收尾引擎
// ==========================================
// ESPERA_MANUAL --iniciar_manual--> PROCESO_MANUAL
// PROCESO_MANUAL --finalizar_manual--> FINALIZADA
// 指标在人工阶段不重算 (订单离开 EN_PROCESO 时已写入)
// ==========================================

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::db::{ahora, minutos_entre};
use crate::domain::acumula::Acumula;
use crate::domain::types::EstadoOrder;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::locks::{bloquear, OrderLockRegistry};
use crate::engine::order_engine::OrderEngine;
use crate::repository::{AcumulaRepository, OrderRepository};

// ==========================================
// 输入 / 输出结构
// ==========================================

/// 结束人工收尾入参
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcumulaFinish {
    pub num_cajas_manual: i64,
}

/// 人工收尾查询视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcumulaView {
    pub id_order: i64,
    pub cod_order: String,
    pub en_proceso: bool,
    #[serde(flatten)]
    pub acumula: Option<Acumula>,
}

// ==========================================
// AcumulaEngine - 人工收尾引擎
// ==========================================
pub struct AcumulaEngine {
    conn: Arc<Mutex<Connection>>,
    locks: Arc<OrderLockRegistry>,
    order_engine: Arc<OrderEngine>,
    acumulas: AcumulaRepository,
    orders: OrderRepository,
}

impl AcumulaEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        locks: Arc<OrderLockRegistry>,
        order_engine: Arc<OrderEngine>,
    ) -> Self {
        Self {
            conn,
            locks,
            order_engine,
            acumulas: AcumulaRepository,
            orders: OrderRepository,
        }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("锁获取失败: {e}")))
    }

    // ==========================================
    // 开始人工收尾
    // ==========================================

    /// 开始人工收尾: ESPERA_MANUAL → PROCESO_MANUAL
    pub fn iniciar_manual(&self, id_order: i64) -> EngineResult<Acumula> {
        info!(id_order, "开始人工收尾");

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let momento = ahora();
        let (acumula, order, estado_anterior) = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let mut order = self
                .orders
                .find_by_id(&tx, id_order)?
                .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

            if order.estado != EstadoOrder::EsperaManual {
                return Err(EngineError::InvalidState(format!(
                    "solo se puede iniciar proceso manual en órdenes con estado ESPERA_MANUAL. \
                     Estado actual: {}",
                    order.estado
                )));
            }

            if self.acumulas.has_activo(&tx, id_order)? {
                return Err(EngineError::InvalidState(
                    "ya existe un proceso manual activo para esta orden".to_string(),
                ));
            }

            let mut acumula = Acumula {
                id_acumula: 0,
                id_order,
                hora_inicio: momento,
                hora_fin: None,
                tiempo_total: None,
                num_cajas_manual: 0,
            };
            acumula.id_acumula = self.acumulas.insert(&tx, &acumula)?;

            let estado_anterior = order.estado;
            order.estado = EstadoOrder::ProcesoManual;
            order.acumula = true;
            self.orders.update(&tx, &order)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
            (acumula, order, estado_anterior)
        };

        info!(
            id_order,
            cod_order = %order.cod_order,
            "人工收尾已开始"
        );

        self.order_engine
            .notificar_cambio_estado(&order, estado_anterior, EstadoOrder::ProcesoManual);

        Ok(acumula)
    }

    // ==========================================
    // 结束人工收尾
    // ==========================================

    /// 结束人工收尾: PROCESO_MANUAL → FINALIZADA
    ///
    /// 指标不在此处重算
    pub fn finalizar_manual(&self, id_order: i64, dto: AcumulaFinish) -> EngineResult<Acumula> {
        info!(id_order, num_cajas = dto.num_cajas_manual, "结束人工收尾");

        if dto.num_cajas_manual < 0 {
            return Err(EngineError::InvalidInput(format!(
                "el número de cajas no puede ser negativo (recibido: {})",
                dto.num_cajas_manual
            )));
        }

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let momento = ahora();
        let (acumula, order, estado_anterior) = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let mut order = self
                .orders
                .find_by_id(&tx, id_order)?
                .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

            if order.estado != EstadoOrder::ProcesoManual {
                return Err(EngineError::InvalidState(format!(
                    "solo se puede finalizar proceso manual en órdenes con estado PROCESO_MANUAL. \
                     Estado actual: {}",
                    order.estado
                )));
            }

            let mut acumula = self
                .acumulas
                .find_activa_by_order(&tx, id_order)?
                .ok_or_else(|| {
                    EngineError::InvalidState(format!(
                        "no se encontró proceso manual activo para la orden: {id_order}"
                    ))
                })?;

            acumula.hora_fin = Some(momento);
            acumula.tiempo_total = Some(minutos_entre(acumula.hora_inicio, momento));
            acumula.num_cajas_manual = dto.num_cajas_manual;
            self.acumulas.update(&tx, &acumula)?;

            let estado_anterior = order.estado;
            order.estado = EstadoOrder::Finalizada;
            self.orders.update(&tx, &order)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
            (acumula, order, estado_anterior)
        };

        info!(
            id_order,
            cod_order = %order.cod_order,
            tiempo_min = ?acumula.tiempo_total,
            cajas = acumula.num_cajas_manual,
            "人工收尾完成"
        );

        self.order_engine
            .notificar_cambio_estado(&order, estado_anterior, EstadoOrder::Finalizada);

        Ok(acumula)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 查询订单的人工收尾信息
    pub fn obtener(&self, id_order: i64) -> EngineResult<AcumulaView> {
        let conn = self.get_conn()?;

        let order = self
            .orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

        let acumula = self.acumulas.find_by_order(&conn, id_order)?;
        let en_proceso = acumula.as_ref().is_some_and(|a| a.en_proceso());

        Ok(AcumulaView {
            id_order,
            cod_order: order.cod_order,
            en_proceso,
            acumula,
        })
    }

    /// 判断订单是否有进行中的人工收尾
    pub fn tiene_activo(&self, id_order: i64) -> EngineResult<bool> {
        let conn = self.get_conn()?;
        Ok(self.acumulas.has_activo(&conn, id_order)?)
    }
}
