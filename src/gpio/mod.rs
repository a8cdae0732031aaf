// ==========================================
// 灌装线生产执行系统 - GPIO 现场接入层
// ==========================================
// link: 单一持久连接 + 引脚缓存 + 心跳/重连
// counter_ingest: 计数引脚下降沿 → 计数引擎
// auto_pause: 双引脚去抖 → 暂停引擎
// ==========================================

pub mod auto_pause;
pub mod counter_ingest;
pub mod link;

pub use auto_pause::{AutoPauseDetector, AutoPausePinListener, AutoPauseSettings};
pub use counter_ingest::CounterPinListener;
pub use link::{GpioLink, GpioLinkConfig, PinListener, PinReading, PinStateCache};
