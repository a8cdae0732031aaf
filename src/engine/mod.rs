// ==========================================
// 灌装线生产执行系统 - 引擎层
// ==========================================
// 业务规则所在层: 状态机 / 指标 / 暂停 / 人工收尾 / 删除 / 计数 / 可见投影
// 每个写操作 = 一个订单锁 + 一个数据库事务; 提交后才发布事件
// ==========================================

pub mod acumula_engine;
pub mod counter_engine;
pub mod delete_engine;
pub mod error;
pub mod events;
pub mod locks;
pub mod metricas_engine;
pub mod order_engine;
pub mod pause_engine;
pub mod visibility;

pub use acumula_engine::{AcumulaEngine, AcumulaFinish, AcumulaView};
pub use counter_engine::{CounterEngine, CounterView};
pub use delete_engine::{DeleteEngine, OrderDeleteRequest};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, EventEnvelope, EventSink, EventType, NoOpEventSink};
pub use locks::OrderLockRegistry;
pub use metricas_engine::{MetricasEngine, ResumenRecalculo, ValoresMetricas};
pub use order_engine::{
    OrderCompleta, OrderCreate, OrderEngine, OrderFinish, OrderTabla, OrderView, ResumenTiempos,
};
pub use pause_engine::{PauseClose, PauseEngine, PauseOpen, PauseView};
pub use visibility::VisibilityProjector;
