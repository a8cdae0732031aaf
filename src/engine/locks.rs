// ==========================================
// 灌装线生产执行系统 - 订单级串行化锁
// ==========================================
// 同一订单的状态变更在操作入口加锁, 事务提交/回滚后释放
// 跨订单操作不持全局锁, 互不相关的订单可并行变更
// 锁顺序约定: 先取订单锁, 再取数据库连接锁 (禁止反向)
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::error::{EngineError, EngineResult};

// ==========================================
// OrderLockRegistry - 订单锁注册表
// ==========================================
pub struct OrderLockRegistry {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl OrderLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 获取指定订单的锁句柄
    pub fn lock_de(&self, id_order: i64) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(id_order)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for OrderLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 对 Arc<Mutex<()>> 加锁, 锁中毒映射为 Internal
pub fn bloquear(candado: &Arc<Mutex<()>>) -> EngineResult<MutexGuard<'_, ()>> {
    candado
        .lock()
        .map_err(|e| EngineError::Internal(format!("candado de orden envenenado: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismo_id_mismo_lock() {
        let registro = OrderLockRegistry::new();
        let a = registro.lock_de(1);
        let b = registro.lock_de(1);
        let c = registro.lock_de(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_bloquear() {
        let registro = OrderLockRegistry::new();
        let candado = registro.lock_de(9);
        let _guardia = bloquear(&candado).unwrap();
        // 其他订单不受影响
        let otro = registro.lock_de(10);
        let _guardia2 = bloquear(&otro).unwrap();
    }
}
