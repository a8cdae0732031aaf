// ==========================================
// 灌装线生产执行系统 - 可见订单投影器
// ==========================================
// 定义: 当前可见订单 = 满足以下任一条件且开始时间最新的订单
//   - estado = EN_PROCESO
//   - estado = PAUSADA 且其未关闭暂停的 tipo ≠ FABRICACION_PARCIAL
// 引擎在提交后调用 refresh() 发布 ACTIVE_ORDER_CHANGED
// ==========================================

use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::domain::order::Order;
use crate::domain::types::{EstadoOrder, TipoPausa};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{EventEnvelope, EventSink, EventType, TOPIC_ACTIVE_ORDER};
use crate::repository::{OrderRepository, PauseRepository};

// ==========================================
// VisibilityProjector - 可见订单投影器
// ==========================================
pub struct VisibilityProjector {
    conn: Arc<Mutex<Connection>>,
    bus: Arc<dyn EventSink>,
    orders: OrderRepository,
    pauses: PauseRepository,
}

impl VisibilityProjector {
    pub fn new(conn: Arc<Mutex<Connection>>, bus: Arc<dyn EventSink>) -> Self {
        Self {
            conn,
            bus,
            orders: OrderRepository,
            pauses: PauseRepository,
        }
    }

    /// 计算当前可见订单 (排除局部制造暂停)
    pub fn orden_visible(&self) -> EngineResult<Option<Order>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("锁获取失败: {e}")))?;
        self.orden_visible_con(&conn)
    }

    /// 在给定连接上计算可见订单 (供同事务复用)
    pub fn orden_visible_con(&self, conn: &Connection) -> EngineResult<Option<Order>> {
        // 仓储已按 hora_inicio 倒序 (NULL 最后) 排序
        let activas = self
            .orders
            .find_by_estados(conn, &[EstadoOrder::EnProceso, EstadoOrder::Pausada])?;

        for order in activas {
            match order.estado {
                // EN_PROCESO 永远可见
                EstadoOrder::EnProceso => {
                    debug!(id_order = order.id_order, "可见订单: {} (EN_PROCESO)", order.cod_order);
                    return Ok(Some(order));
                }
                EstadoOrder::Pausada => {
                    let pausa = self.pauses.find_activa_by_order(conn, order.id_order)?;
                    match pausa {
                        None => {
                            // 状态为 PAUSADA 但无未关闭暂停: 数据异常, 仍按可见处理
                            warn!(
                                id_order = order.id_order,
                                "订单 {} 为 PAUSADA 但无未关闭暂停", order.cod_order
                            );
                            return Ok(Some(order));
                        }
                        Some(p) if p.tipo == Some(TipoPausa::FabricacionParcial) => {
                            debug!(
                                id_order = order.id_order,
                                "订单 {} 处于局部制造暂停, 不可见", order.cod_order
                            );
                            continue;
                        }
                        Some(_) => {
                            debug!(
                                id_order = order.id_order,
                                "可见订单: {} (PAUSADA)", order.cod_order
                            );
                            return Ok(Some(order));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(None)
    }

    /// 重新计算投影并发布 ACTIVE_ORDER_CHANGED
    ///
    /// 提交后调用; 失败只记日志, 不影响已提交状态
    pub fn refresh(&self) {
        match self.orden_visible() {
            Ok(visible) => {
                let message = match &visible {
                    Some(order) => format!("Orden activa visible: {}", order.cod_order),
                    None => "No hay órdenes activas visibles".to_string(),
                };
                let event = EventEnvelope::nuevo(EventType::ActiveOrderChanged, message, &visible);
                self.bus.publish(TOPIC_ACTIVE_ORDER, event);
            }
            Err(e) => {
                warn!("可见订单投影计算失败: {}", e);
            }
        }
    }
}
