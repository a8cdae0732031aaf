// ==========================================
// 灌装线生产执行系统 - 配置层
// ==========================================
// 职责: 数据库路径 / GPIO 链路端点 / 引脚分配 / 检测器时序
// 默认值可被环境变量覆写（便于调试/测试/CI）
// ==========================================

use std::time::Duration;

// ==========================================
// 引脚分配 (固定, 与现场接线一致)
// ==========================================

/// 计数引脚: 下降沿 = +1 瓶
pub const PIN_CONTADOR: u8 = 23;
/// 称重故障引脚 → AVERIA_PONDERAL
pub const PIN_PONDERAL: u8 = 22;
/// 贴标故障引脚 → AVERIA_ETIQUETA
pub const PIN_ETIQUETA: u8 = 19;

// ==========================================
// 自动暂停检测时序 (固定, 秒)
// ==========================================

/// 信号保持 0 多久后开启自动暂停
pub const T_OPEN_SECS: u64 = 20;
/// 信号恢复 1 多久后关闭本引脚的自动暂停
pub const T_CLOSE_SECS: u64 = 5;
/// 任意自动关闭 (含人工对账) 之后的冷却期
pub const T_COOLDOWN_SECS: u64 = 30;

// ==========================================
// AppConfig - 应用配置
// ==========================================
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite 数据库文件路径
    pub db_path: String,
    /// GPIO 服务端主机
    pub gpio_host: String,
    /// GPIO 服务端端口
    pub gpio_port: u16,
    /// 无消息多久判定链路死亡
    pub gpio_heartbeat: Duration,
    /// 重连看门狗周期 (≤ 15s)
    pub gpio_watchdog: Duration,
    /// 自动暂停: 开启去抖
    pub t_open: Duration,
    /// 自动暂停: 关闭去抖
    pub t_close: Duration,
    /// 自动暂停: 冷却期
    pub t_cooldown: Duration,
    /// 人工对账轮询周期 (≤ 5s)
    pub reconcile_interval: Duration,
    /// 订单回到 EN_PROCESO 的观察周期 (≤ 3s)
    pub observer_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            gpio_host: "192.168.20.30".to_string(),
            gpio_port: 8765,
            gpio_heartbeat: Duration::from_secs(60),
            gpio_watchdog: Duration::from_secs(15),
            t_open: Duration::from_secs(T_OPEN_SECS),
            t_close: Duration::from_secs(T_CLOSE_SECS),
            t_cooldown: Duration::from_secs(T_COOLDOWN_SECS),
            reconcile_interval: Duration::from_secs(5),
            observer_interval: Duration::from_secs(3),
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置 (缺省回退默认值)
    ///
    /// # 环境变量
    /// - PACKLINE_DB_PATH: 数据库路径
    /// - PACKLINE_GPIO_HOST / PACKLINE_GPIO_PORT: GPIO 服务端
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PACKLINE_DB_PATH") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                config.db_path = trimmed.to_string();
            }
        }

        if let Ok(host) = std::env::var("PACKLINE_GPIO_HOST") {
            let trimmed = host.trim();
            if !trimmed.is_empty() {
                config.gpio_host = trimmed.to_string();
            }
        }

        if let Ok(port) = std::env::var("PACKLINE_GPIO_PORT") {
            if let Ok(parsed) = port.trim().parse::<u16>() {
                config.gpio_port = parsed;
            }
        }

        config
    }

    /// GPIO 服务端地址 (host:port)
    pub fn gpio_endpoint(&self) -> String {
        format!("{}:{}", self.gpio_host, self.gpio_port)
    }
}

/// 获取默认数据库路径
///
/// # 返回
/// - 优先使用用户数据目录下的 packline-mes/packline_mes.db
/// - 拿不到数据目录时回退到当前目录
pub fn default_db_path() -> String {
    use std::path::PathBuf;

    let mut path = PathBuf::from("./packline_mes.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("packline-mes");
        // 确保目录存在
        std::fs::create_dir_all(&dir).ok();
        path = dir.join("packline_mes.db");
    }

    path.to_string_lossy().to_string()
}
