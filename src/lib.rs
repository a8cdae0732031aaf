// ==========================================
// 灌装包装线生产执行系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 产线订单/暂停状态引擎 + GPIO 现场接入
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// GPIO 层 - 现场信号接入
pub mod gpio;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    Acumula, BottleCounter, EstadoOrder, ExtraData, Metricas, Order, OrderDeleteAudit, Pause,
    TipoPausa,
};

// 引擎
pub use engine::{
    AcumulaEngine, CounterEngine, DeleteEngine, EngineError, EngineResult, EventBus, EventEnvelope,
    EventSink, EventType, MetricasEngine, OrderEngine, OrderLockRegistry, PauseEngine,
    VisibilityProjector,
};

// 应用
pub use app::AppState;
pub use config::AppConfig;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "灌装包装线生产执行系统";
