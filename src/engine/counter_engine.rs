// ==========================================
// 灌装线生产执行系统 - 瓶计数引擎
// ==========================================
// 脉冲归属: 仅计入当前 EN_PROCESO 且开始时间最新的订单
// 无 EN_PROCESO 订单时脉冲丢弃 (不报错)
// 事务失败丢弃脉冲; 提交后的发布失败不回滚计数
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::db::ahora;
use crate::domain::bottle_counter::BottleCounter;
use crate::domain::types::EstadoOrder;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{
    topic_counter_detalle, EventEnvelope, EventSink, EventType, TOPIC_BOTTLE_COUNTER,
};
use crate::engine::locks::{bloquear, OrderLockRegistry};
use crate::repository::{BottleCounterRepository, OrderRepository};

/// 计数器事件载荷 (附订单业务编码)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterView {
    #[serde(flatten)]
    pub counter: BottleCounter,
    pub cod_order: Option<String>,
}

// ==========================================
// CounterEngine - 瓶计数引擎
// ==========================================
pub struct CounterEngine {
    conn: Arc<Mutex<Connection>>,
    locks: Arc<OrderLockRegistry>,
    bus: Arc<dyn EventSink>,
    counters: BottleCounterRepository,
    orders: OrderRepository,
}

impl CounterEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        locks: Arc<OrderLockRegistry>,
        bus: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            conn,
            locks,
            bus,
            counters: BottleCounterRepository,
            orders: OrderRepository,
        }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("锁获取失败: {e}")))
    }

    // ==========================================
    // 脉冲入账 (GPIO 下降沿回调)
    // ==========================================

    /// 将一个计数脉冲入账到当前 EN_PROCESO 订单
    ///
    /// 返回 None 表示脉冲被丢弃 (无 EN_PROCESO 订单)。
    /// 锁顺序约定: 先读候选订单并释放连接, 再取订单锁, 写事务内复核状态。
    pub fn registrar_pulso(&self) -> EngineResult<Option<BottleCounter>> {
        // 第一阶段: 只读选择归属订单
        let candidata = {
            let conn = self.get_conn()?;
            // 仓储已按 hora_inicio 倒序 (NULL 最后), 首元素即最新开始的订单
            self.orders
                .find_by_estados(&conn, &[EstadoOrder::EnProceso])?
                .into_iter()
                .next()
        };

        let Some(candidata) = candidata else {
            debug!("无 EN_PROCESO 订单, 脉冲丢弃");
            return Ok(None);
        };

        let id_order = candidata.id_order;
        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        // 第二阶段: 写事务, 复核归属订单仍为 EN_PROCESO
        let (counter, cod_order) = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let Some(order) = self.orders.find_by_id(&tx, id_order)? else {
                debug!(id_order, "归属订单已删除, 脉冲丢弃");
                return Ok(None);
            };
            if order.estado != EstadoOrder::EnProceso {
                debug!(
                    id_order,
                    estado = %order.estado,
                    "归属订单已离开 EN_PROCESO, 脉冲丢弃"
                );
                return Ok(None);
            }

            let momento = ahora();
            let mut counter = match self.counters.find_by_order(&tx, id_order)? {
                Some(counter) => counter,
                None => self.crear_contador(&tx, id_order, momento)?,
            };

            counter.is_active = true;
            counter.quantity += 1;
            counter.last_updated = momento;
            counter.last_bottle_counted_at = Some(momento);
            self.counters.update(&tx, &counter)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;

            (counter, order.cod_order)
        };

        info!(
            id_order,
            quantity = counter.quantity,
            "计数器更新 (orden {})",
            cod_order
        );

        // 提交后发布; 失败只记日志
        self.notificar(&counter, Some(cod_order));

        Ok(Some(counter))
    }

    // ==========================================
    // 激活 / 去激活 / 重置
    // ==========================================

    /// 事务内激活订单计数器 (订单引擎 iniciar 时调用)
    ///
    /// 先全表去激活, 保证同一提交状态下最多一个激活计数器
    pub fn activar_en_tx(
        &self,
        conn: &Connection,
        id_order: i64,
        momento: NaiveDateTime,
    ) -> EngineResult<BottleCounter> {
        self.counters.deactivate_all(conn)?;

        let mut counter = match self.counters.find_by_order(conn, id_order)? {
            Some(counter) => counter,
            None => self.crear_contador(conn, id_order, momento)?,
        };

        counter.is_active = true;
        counter.last_updated = momento;
        self.counters.update(conn, &counter)?;

        info!(id_order, "计数器已激活");
        Ok(counter)
    }

    /// 事务内去激活订单计数器 (订单引擎 finalizar→FINALIZADA 时调用)
    pub fn desactivar_en_tx(
        &self,
        conn: &Connection,
        id_order: i64,
        momento: NaiveDateTime,
    ) -> EngineResult<()> {
        if let Some(mut counter) = self.counters.find_by_order(conn, id_order)? {
            counter.is_active = false;
            counter.last_updated = momento;
            self.counters.update(conn, &counter)?;
            info!(id_order, quantity = counter.quantity, "计数器已去激活");
        }
        Ok(())
    }

    /// 独立事务激活 (维护入口)
    pub fn activar(&self, id_order: i64) -> EngineResult<BottleCounter> {
        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

        if self.orders.find_by_id(&tx, id_order)?.is_none() {
            return Err(EngineError::order_no_encontrada(id_order));
        }

        let counter = self.activar_en_tx(&tx, id_order, ahora())?;
        tx.commit()
            .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
        Ok(counter)
    }

    /// 独立事务去激活 (维护入口)
    pub fn desactivar(&self, id_order: i64) -> EngineResult<()> {
        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;
        self.desactivar_en_tx(&tx, id_order, ahora())?;
        tx.commit()
            .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
        Ok(())
    }

    /// 重置订单计数器到 0
    pub fn reset(&self, id_order: i64) -> EngineResult<BottleCounter> {
        warn!(id_order, "重置计数器");

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

        let mut counter = self.counters.find_by_order(&tx, id_order)?.ok_or_else(|| {
            EngineError::NotFound {
                entity: "BottleCounter".to_string(),
                id: id_order.to_string(),
            }
        })?;

        counter.quantity = 0;
        counter.last_bottle_counted_at = None;
        counter.last_updated = ahora();
        self.counters.update(&tx, &counter)?;

        tx.commit()
            .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
        Ok(counter)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按订单查询计数器
    pub fn obtener_por_order(&self, id_order: i64) -> EngineResult<Option<BottleCounter>> {
        let conn = self.get_conn()?;
        Ok(self.counters.find_by_order(&conn, id_order)?)
    }

    /// 查询当前激活的计数器
    pub fn activo(&self) -> EngineResult<Option<BottleCounter>> {
        let conn = self.get_conn()?;
        Ok(self.counters.find_activo(&conn)?)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn crear_contador(
        &self,
        conn: &Connection,
        id_order: i64,
        momento: NaiveDateTime,
    ) -> EngineResult<BottleCounter> {
        let mut counter = BottleCounter {
            id: 0,
            id_order,
            quantity: 0,
            is_active: true,
            created_at: momento,
            last_updated: momento,
            last_bottle_counted_at: None,
        };
        counter.id = self.counters.insert(conn, &counter)?;
        Ok(counter)
    }

    fn notificar(&self, counter: &BottleCounter, cod_order: Option<String>) {
        let view = CounterView {
            counter: counter.clone(),
            cod_order,
        };
        let event = EventEnvelope::nuevo(
            EventType::BottleCounterUpdate,
            format!("Contador actualizado: {} botellas", counter.quantity),
            &view,
        );
        self.bus.publish(TOPIC_BOTTLE_COUNTER, event.clone());
        self.bus
            .publish(&topic_counter_detalle(counter.id_order), event);
    }
}
