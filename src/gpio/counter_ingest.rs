// ==========================================
// 灌装线生产执行系统 - 瓶计数脉冲入账
// ==========================================
// 监听计数引脚, 下降沿 (1→0) = +1 瓶
// 入账事务失败丢弃脉冲 (记日志, 不上抛)
// ==========================================

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::counter_engine::CounterEngine;
use crate::gpio::link::PinListener;

// ==========================================
// CounterPinListener - 计数引脚订阅者
// ==========================================
pub struct CounterPinListener {
    pin_contador: u8,
    contador: Arc<CounterEngine>,
}

impl CounterPinListener {
    pub fn new(pin_contador: u8, contador: Arc<CounterEngine>) -> Self {
        Self {
            pin_contador,
            contador,
        }
    }
}

#[async_trait]
impl PinListener for CounterPinListener {
    async fn on_inicializado(&self, estados: &HashMap<u8, u8>) {
        info!(
            pin = self.pin_contador,
            valor = ?estados.get(&self.pin_contador),
            "计数引脚初始状态已知"
        );
    }

    async fn on_cambio(&self, pin: u8, anterior: u8, valor: u8) {
        if pin != self.pin_contador {
            return;
        }

        // 只认下降沿
        if !(anterior == 1 && valor == 0) {
            debug!(pin, "非下降沿 ({} -> {}), 忽略", anterior, valor);
            return;
        }

        debug!(pin, "检测到下降沿, 瓶计数 +1");
        match self.contador.registrar_pulso() {
            Ok(Some(counter)) => {
                debug!(
                    id_order = counter.id_order,
                    quantity = counter.quantity,
                    "脉冲已入账"
                );
            }
            Ok(None) => {
                debug!("脉冲被丢弃 (无 EN_PROCESO 订单)");
            }
            Err(e) => {
                // 事务失败 = 丢弃该脉冲, 不中断链路
                warn!("脉冲入账失败, 丢弃: {}", e);
            }
        }
    }
}
