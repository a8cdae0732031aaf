// ==========================================
// 灌装线生产执行系统 - 事件总线
// ==========================================
// 职责: 按主题进程内扇出事件, 供订阅的操作端 UI 桥接层消费
// 契约:
// - publish 永不在事务内调用: 引擎先提交, 后发布
// - 发布失败只记日志并吞掉, 不回滚持久状态
// - 单一发布者下同主题保序; 跨主题无全局顺序
// ==========================================

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::db;

// ==========================================
// 主题定义
// ==========================================

/// 订单总主题
pub const TOPIC_ORDERS: &str = "orders";
/// 非局部制造暂停看板主题
pub const TOPIC_PAUSES_NON_PARTIAL: &str = "pauses-non-partial";
/// 局部制造 (fabricación parcial) 看板主题
pub const TOPIC_FABRICACION_PARCIAL: &str = "fabricacion-parcial";
/// 瓶计数器总主题
pub const TOPIC_BOTTLE_COUNTER: &str = "bottle-counter";
/// 当前可见订单主题
pub const TOPIC_ACTIVE_ORDER: &str = "active-order";

/// 单订单明细主题
pub fn topic_order_detalle(id_order: i64) -> String {
    format!("{TOPIC_ORDERS}/{id_order}")
}

/// 单订单计数器主题
pub fn topic_counter_detalle(id_order: i64) -> String {
    format!("{TOPIC_BOTTLE_COUNTER}/{id_order}")
}

// ==========================================
// 事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    OrderCreated,
    OrderStateChanged,
    OrderDeleted,
    PauseCreated,
    PauseFinished,
    FabricacionParcialUpdate,
    PausesNonPartialUpdate,
    BottleCounterUpdate,
    ActiveOrderChanged,
}

impl EventType {
    /// 转换为线上字符串标识
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::OrderStateChanged => "ORDER_STATE_CHANGED",
            EventType::OrderDeleted => "ORDER_DELETED",
            EventType::PauseCreated => "PAUSE_CREATED",
            EventType::PauseFinished => "PAUSE_FINISHED",
            EventType::FabricacionParcialUpdate => "FABRICACION_PARCIAL_UPDATE",
            EventType::PausesNonPartialUpdate => "PAUSES_NON_PARTIAL_UPDATE",
            EventType::BottleCounterUpdate => "BOTTLE_COUNTER_UPDATE",
            EventType::ActiveOrderChanged => "ACTIVE_ORDER_CHANGED",
        }
    }
}

// ==========================================
// 事件信封
// ==========================================

/// 发布到总线的事件信封
///
/// 线上 JSON 形如:
/// `{"eventType": ..., "message": ..., "data": ..., "timestamp": ISO-8601 本地时间}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    pub message: String,
    pub data: serde_json::Value,
    pub timestamp: String,
}

impl EventEnvelope {
    /// 构造事件信封, 时间戳取当前本地时间
    ///
    /// 载荷序列化失败时退化为 null (发布路径不允许失败上抛)
    pub fn nuevo<T: Serialize>(tipo: EventType, message: impl Into<String>, data: &T) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("事件载荷序列化失败, 退化为 null: {}", e);
                serde_json::Value::Null
            }
        };

        Self {
            event_type: tipo.as_str().to_string(),
            message: message.into(),
            data,
            timestamp: db::ahora().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        }
    }
}

// ==========================================
// 发布能力 Trait
// ==========================================

/// 事件发布能力
///
/// 引擎层依赖该 trait, WebSocket/STOMP 桥接属于外部协作方
pub trait EventSink: Send + Sync {
    /// 发布事件到主题 (失败只记日志, 永不上抛)
    fn publish(&self, topic: &str, event: EventEnvelope);
}

/// 空操作发布者 (单元测试用)
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn publish(&self, topic: &str, event: EventEnvelope) {
        tracing::debug!(topic, event_type = %event.event_type, "NoOpEventSink: 跳过事件发布");
    }
}

// ==========================================
// EventBus - 进程内事件总线
// ==========================================

/// 每订阅者的缓冲上限, 超出后最旧事件被丢弃 (broadcast lagged)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub struct EventBus {
    canales: Mutex<HashMap<String, broadcast::Sender<EventEnvelope>>>,
    capacidad: usize,
}

impl EventBus {
    /// 创建默认容量的总线
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// 创建指定容量的总线
    pub fn with_capacity(capacidad: usize) -> Self {
        Self {
            canales: Mutex::new(HashMap::new()),
            capacidad,
        }
    }

    /// 订阅主题 (主题通道按需创建)
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<EventEnvelope> {
        self.sender_de(topic).subscribe()
    }

    fn sender_de(&self, topic: &str) -> broadcast::Sender<EventEnvelope> {
        let mut canales = match self.canales.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        canales
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacidad).0)
            .clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn publish(&self, topic: &str, event: EventEnvelope) {
        let sender = self.sender_de(topic);
        match sender.send(event) {
            Ok(receptores) => {
                tracing::trace!(topic, receptores, "事件已发布");
            }
            Err(_) => {
                // 无订阅者不是错误: UI 可能尚未连接
                tracing::debug!(topic, "事件发布时无订阅者");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Payload {
        valor: i64,
    }

    #[test]
    fn test_envelope_shape() {
        let event = EventEnvelope::nuevo(EventType::OrderCreated, "msg", &Payload { valor: 7 });
        assert_eq!(event.event_type, "ORDER_CREATED");
        assert_eq!(event.data["valor"], 7);

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("eventType").is_some());
        assert!(json.get("message").is_some());
        assert!(json.get("data").is_some());
        assert!(json.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn test_publish_orden_por_topic() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TOPIC_ORDERS);

        for i in 0..5 {
            bus.publish(
                TOPIC_ORDERS,
                EventEnvelope::nuevo(EventType::OrderStateChanged, format!("m{i}"), &Payload { valor: i }),
            );
        }

        // 同主题按发布顺序接收
        for i in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.data["valor"], i);
        }
    }

    #[test]
    fn test_publish_sin_suscriptores_no_falla() {
        let bus = EventBus::new();
        bus.publish(
            "topic-vacio",
            EventEnvelope::nuevo(EventType::OrderDeleted, "m", &Payload { valor: 0 }),
        );
    }
}
