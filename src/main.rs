// ==========================================
// 灌装包装线生产执行系统 - 服务入口
// ==========================================
// 启动顺序: 日志 → 配置 → AppState → GPIO 链路/检测器 → 等待退出信号
// HTTP/REST 面板与 WebSocket 桥接属于外部协作方, 不在本进程内
// ==========================================

use packline_mes::{logging, AppConfig, AppState};

#[tokio::main]
async fn main() {
    logging::init();

    let config = AppConfig::from_env();
    tracing::info!(
        version = packline_mes::VERSION,
        db_path = %config.db_path,
        gpio = %config.gpio_endpoint(),
        "启动 {}",
        packline_mes::APP_NAME
    );

    let state = match AppState::new(&config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("初始化失败: {}", e);
            std::process::exit(1);
        }
    };

    state.iniciar_tareas();
    tracing::info!("后台任务已启动, 等待退出信号 (Ctrl-C)");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("退出信号监听失败: {}", e);
    }

    tracing::info!("收到退出信号, 开始优雅关闭");
    state.shutdown();
    tracing::info!("已退出");
}
