// ==========================================
// 日志系统初始化
// ==========================================
// 过滤优先级: PACKLINE_LOG > RUST_LOG > 默认 info
// 产线部署以无人值守服务方式运行, 输出保留 target 与行号便于远程排障
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 本系统专用的日志级别环境变量 (优先于 RUST_LOG)
///
/// 现场主机通常已有全局 RUST_LOG; 单独的变量允许只调本系统的级别,
/// 例如 PACKLINE_LOG=packline_mes::gpio=trace
pub const LOG_ENV: &str = "PACKLINE_LOG";

/// 默认过滤指令
const FILTRO_DEFECTO: &str = "info";

/// 初始化日志系统
pub fn init() {
    fmt()
        .with_env_filter(filtro_desde_env(FILTRO_DEFECTO))
        .with_target(true)
        .with_line_number(true)
        .init();
}

/// 初始化测试环境的日志系统
///
/// 输出到测试捕获器, 默认 debug 级别便于调试
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(filtro_desde_env("debug"))
        .with_test_writer()
        .try_init();
}

/// 按优先级解析过滤器: PACKLINE_LOG > RUST_LOG > 缺省指令
fn filtro_desde_env(defecto: &str) -> EnvFilter {
    if let Ok(directivas) = std::env::var(LOG_ENV) {
        match EnvFilter::try_new(&directivas) {
            Ok(filtro) => return filtro,
            // 此刻日志系统尚未就绪, 只能走标准错误
            Err(e) => eprintln!("{LOG_ENV} 过滤指令无效 ({directivas}): {e}, 回退默认"),
        }
    }

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(defecto))
}
