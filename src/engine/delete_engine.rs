// ==========================================
// 灌装线生产执行系统 - 订单删除引擎
// ==========================================
// 删除前必须在同一事务内先写入审计快照 (仅追加)
// EN_PROCESO / PROCESO_MANUAL 状态的订单禁止删除
// 级联清理: pausas, metricas, acumula, extra_data, bottle_counter
// ==========================================

use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::db::ahora;
use crate::domain::delete_audit::OrderDeleteAudit;
use crate::domain::types::EstadoOrder;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EventEnvelope, EventSink, EventType, TOPIC_ORDERS};
use crate::engine::locks::{bloquear, OrderLockRegistry};
use crate::repository::{
    AcumulaRepository, BottleCounterRepository, DeleteAuditRepository, ExtraDataRepository,
    MetricasRepository, OrderRepository, PauseRepository,
};

// ==========================================
// 输入结构
// ==========================================

/// 删除订单入参
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDeleteRequest {
    pub deleted_by: String,
    #[serde(default)]
    pub motivo: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

// ==========================================
// DeleteEngine - 删除引擎
// ==========================================
pub struct DeleteEngine {
    conn: Arc<Mutex<rusqlite::Connection>>,
    locks: Arc<OrderLockRegistry>,
    bus: Arc<dyn EventSink>,
    orders: OrderRepository,
    pauses: PauseRepository,
    metricas: MetricasRepository,
    acumulas: AcumulaRepository,
    extra: ExtraDataRepository,
    counters: BottleCounterRepository,
    audits: DeleteAuditRepository,
}

impl DeleteEngine {
    pub fn new(
        conn: Arc<Mutex<rusqlite::Connection>>,
        locks: Arc<OrderLockRegistry>,
        bus: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            conn,
            locks,
            bus,
            orders: OrderRepository,
            pauses: PauseRepository,
            metricas: MetricasRepository,
            acumulas: AcumulaRepository,
            extra: ExtraDataRepository,
            counters: BottleCounterRepository,
            audits: DeleteAuditRepository,
        }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("锁获取失败: {e}")))
    }

    /// 删除订单并写入审计快照
    pub fn eliminar(
        &self,
        id_order: i64,
        dto: &OrderDeleteRequest,
    ) -> EngineResult<OrderDeleteAudit> {
        info!(id_order, deleted_by = %dto.deleted_by, "删除订单");

        if dto.deleted_by.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "el usuario que elimina es obligatorio".to_string(),
            ));
        }

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let (audit, cod_order) = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let order = self
                .orders
                .find_by_id(&tx, id_order)?
                .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

            if matches!(
                order.estado,
                EstadoOrder::EnProceso | EstadoOrder::ProcesoManual
            ) {
                return Err(EngineError::InvalidState(format!(
                    "no se puede eliminar una orden en estado {}. \
                     Finalice o cancele la orden primero",
                    order.estado
                )));
            }

            // 审计快照先行
            let mut audit = OrderDeleteAudit {
                id_audit: 0,
                id_order_deleted: order.id_order,
                cod_order: order.cod_order.clone(),
                operario: order.operario.clone(),
                lote: order.lote.clone(),
                articulo: order.articulo.clone(),
                estado_al_eliminar: order.estado,
                fecha_creacion_order: order.hora_creacion,
                cantidad: order.cantidad,
                botes_buenos: order.botes_buenos,
                botes_malos: order.botes_malos,
                deleted_by: dto.deleted_by.trim().to_string(),
                motivo: dto.motivo.clone(),
                deleted_at: ahora(),
                ip_address: dto.ip_address.clone(),
            };
            audit.id_audit = self.audits.insert(&tx, &audit)?;

            // 级联清理关联数据
            self.pauses.delete_by_order(&tx, id_order)?;
            self.metricas.delete_by_order(&tx, id_order)?;
            self.acumulas.delete_by_order(&tx, id_order)?;
            self.extra.delete_by_order(&tx, id_order)?;
            self.counters.delete_by_order(&tx, id_order)?;

            self.orders.delete(&tx, id_order)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
            (audit, order.cod_order)
        };

        info!(
            id_order,
            cod_order = %cod_order,
            id_audit = audit.id_audit,
            "订单已删除并写入审计"
        );

        let event = EventEnvelope::nuevo(
            EventType::OrderDeleted,
            format!("Orden {} eliminada por {}", cod_order, audit.deleted_by),
            &audit,
        );
        self.bus.publish(TOPIC_ORDERS, event);

        Ok(audit)
    }

    /// 批量删除: 逐单删除, 无法删除的记录告警并跳过
    pub fn eliminar_varias(
        &self,
        ids: &[i64],
        dto: &OrderDeleteRequest,
    ) -> EngineResult<Vec<OrderDeleteAudit>> {
        info!(total = ids.len(), deleted_by = %dto.deleted_by, "批量删除订单");

        let mut audits = Vec::new();
        for &id in ids {
            match self.eliminar(id, dto) {
                Ok(audit) => audits.push(audit),
                Err(e @ (EngineError::NotFound { .. } | EngineError::InvalidState(_))) => {
                    warn!(id_order = id, "跳过无法删除的订单: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(audits)
    }

    /// 查询最近的删除审计记录
    pub fn auditoria_reciente(&self, limit: i64) -> EngineResult<Vec<OrderDeleteAudit>> {
        let conn = self.get_conn()?;
        Ok(self.audits.find_recientes(&conn, limit)?)
    }
}
