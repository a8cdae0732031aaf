// ==========================================
// 灌装线生产执行系统 - 应用状态
// ==========================================
// 职责: 组装共享连接 / 事件总线 / 各引擎 / GPIO 链路与检测器
// ==========================================

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use crate::config::{AppConfig, PIN_CONTADOR};
use crate::db;
use crate::engine::{
    AcumulaEngine, CounterEngine, DeleteEngine, EventBus, MetricasEngine, OrderEngine,
    OrderLockRegistry, PauseEngine, VisibilityProjector,
};
use crate::gpio::{
    AutoPauseDetector, AutoPausePinListener, AutoPauseSettings, CounterPinListener, GpioLink,
    GpioLinkConfig, PinStateCache,
};

/// 应用状态
///
/// 包含所有引擎实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 事件总线 (操作端 UI 桥接层订阅)
    pub event_bus: Arc<EventBus>,

    /// 订单状态引擎
    pub order_engine: Arc<OrderEngine>,

    /// 暂停引擎
    pub pause_engine: Arc<PauseEngine>,

    /// 指标引擎
    pub metricas_engine: Arc<MetricasEngine>,

    /// 人工收尾引擎
    pub acumula_engine: Arc<AcumulaEngine>,

    /// 删除引擎
    pub delete_engine: Arc<DeleteEngine>,

    /// 瓶计数引擎
    pub counter_engine: Arc<CounterEngine>,

    /// 可见订单投影器
    pub visibilidad: Arc<VisibilityProjector>,

    /// GPIO 链路
    pub gpio_link: Arc<GpioLink>,

    /// 自动暂停检测器
    pub auto_pause: Arc<AutoPauseDetector>,
}

impl AppState {
    /// 创建 AppState 实例
    ///
    /// # 说明
    /// 该方法会:
    /// 1. 打开共享数据库连接并初始化 schema
    /// 2. 初始化事件总线与订单锁注册表
    /// 3. 创建所有引擎实例
    /// 4. 组装 GPIO 链路及其两个订阅者
    pub fn new(config: &AppConfig) -> Result<Self, String> {
        tracing::info!("初始化 AppState, 数据库路径: {}", config.db_path);

        // 共享数据库连接
        let conn = db::open_sqlite_connection(&config.db_path)
            .map_err(|e| format!("无法打开数据库: {e}"))?;
        db::init_schema(&conn).map_err(|e| format!("schema 初始化失败: {e}"))?;
        let conn = Arc::new(Mutex::new(conn));

        Self::ensamblar(config, conn)
    }

    /// 在已有连接上组装 (测试入口)
    pub fn with_connection(config: &AppConfig, conn: Connection) -> Result<Self, String> {
        db::configure_sqlite_connection(&conn).map_err(|e| format!("PRAGMA 配置失败: {e}"))?;
        db::init_schema(&conn).map_err(|e| format!("schema 初始化失败: {e}"))?;
        Self::ensamblar(config, Arc::new(Mutex::new(conn)))
    }

    fn ensamblar(config: &AppConfig, conn: Arc<Mutex<Connection>>) -> Result<Self, String> {
        // ==========================================
        // 共享基础设施
        // ==========================================
        let event_bus = Arc::new(EventBus::new());
        let locks = Arc::new(OrderLockRegistry::new());

        // ==========================================
        // 初始化引擎层
        // ==========================================
        let visibilidad = Arc::new(VisibilityProjector::new(conn.clone(), event_bus.clone()));

        let counter_engine = Arc::new(CounterEngine::new(
            conn.clone(),
            locks.clone(),
            event_bus.clone(),
        ));

        let metricas_engine = Arc::new(MetricasEngine::new(conn.clone()));

        let order_engine = Arc::new(OrderEngine::new(
            conn.clone(),
            locks.clone(),
            event_bus.clone(),
            visibilidad.clone(),
            counter_engine.clone(),
            metricas_engine.clone(),
        ));

        let pause_engine = Arc::new(PauseEngine::new(
            conn.clone(),
            locks.clone(),
            event_bus.clone(),
            visibilidad.clone(),
            order_engine.clone(),
        ));

        let acumula_engine = Arc::new(AcumulaEngine::new(
            conn.clone(),
            locks.clone(),
            order_engine.clone(),
        ));

        let delete_engine = Arc::new(DeleteEngine::new(
            conn.clone(),
            locks.clone(),
            event_bus.clone(),
        ));

        // ==========================================
        // 组装 GPIO 链路与订阅者
        // ==========================================
        let pin_cache = Arc::new(PinStateCache::new());
        let mut gpio_link = GpioLink::new(
            GpioLinkConfig {
                endpoint: config.gpio_endpoint(),
                heartbeat: config.gpio_heartbeat,
                watchdog: config.gpio_watchdog,
            },
            pin_cache.clone(),
        );

        // C8: 计数引脚下降沿入账
        gpio_link.agregar_listener(Arc::new(CounterPinListener::new(
            PIN_CONTADOR,
            counter_engine.clone(),
        )));

        // C9: 自动暂停检测 (定时器挂接链路令牌的子令牌)
        let auto_pause = AutoPauseDetector::new(
            AutoPauseSettings::desde_config(config),
            pin_cache,
            pause_engine.clone(),
            visibilidad.clone(),
            conn.clone(),
            gpio_link.cancel_token().child_token(),
        );
        gpio_link.agregar_listener(Arc::new(AutoPausePinListener(auto_pause.clone())));

        let gpio_link = Arc::new(gpio_link);

        tracing::info!("AppState 初始化完成");

        Ok(Self {
            db_path: config.db_path.clone(),
            event_bus,
            order_engine,
            pause_engine,
            metricas_engine,
            acumula_engine,
            delete_engine,
            counter_engine,
            visibilidad,
            gpio_link,
            auto_pause,
        })
    }

    /// 启动后台任务: GPIO 链路 + 检测器周期任务
    pub fn iniciar_tareas(&self) {
        tokio::spawn(self.gpio_link.clone().run());
        AutoPauseDetector::iniciar_tareas(&self.auto_pause);
    }

    /// 优雅关闭: 级联取消链路与全部定时器 (幂等)
    pub fn shutdown(&self) {
        self.auto_pause.shutdown();
        self.gpio_link.shutdown();
    }

    /// 获取数据库路径
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}
