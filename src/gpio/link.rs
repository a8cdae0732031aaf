// ==========================================
// 灌装线生产执行系统 - GPIO 现场链路
// ==========================================
// 单一持久客户端连接, 文本 JSON 帧 (每行一帧):
// - 初始快照: [{"pin": <int>, "value": 0|1}, ...]
// - 单引脚更新: {"pin": <int>, "value": 0|1}
// 心跳: 60s 无任何消息判定死链, 即使 socket 仍然 open
// 重连: 断开/死链后清空引脚缓存与初始化标志, 再建新连接
// 订阅者仅在初始状态已知后收到变化事件; 之前的消息只播种状态
// ==========================================

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ==========================================
// 引脚状态缓存
// ==========================================
// 单写者 (链路任务), C8/C9 按引脚原子读取

pub struct PinStateCache {
    estados: RwLock<HashMap<u8, u8>>,
    inicializado: AtomicBool,
}

impl PinStateCache {
    pub fn new() -> Self {
        Self {
            estados: RwLock::new(HashMap::new()),
            inicializado: AtomicBool::new(false),
        }
    }

    /// 读取单引脚电平 (未知引脚返回 None)
    pub fn get(&self, pin: u8) -> Option<u8> {
        match self.estados.read() {
            Ok(estados) => estados.get(&pin).copied(),
            Err(poisoned) => poisoned.into_inner().get(&pin).copied(),
        }
    }

    /// 全量快照
    pub fn snapshot(&self) -> HashMap<u8, u8> {
        match self.estados.read() {
            Ok(estados) => estados.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 初始状态是否已知
    pub fn esta_inicializado(&self) -> bool {
        self.inicializado.load(Ordering::Acquire)
    }

    fn set(&self, pin: u8, valor: u8) -> Option<u8> {
        let mut estados = match self.estados.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        estados.insert(pin, valor)
    }

    fn marcar_inicializado(&self) {
        self.inicializado.store(true, Ordering::Release);
    }

    fn limpiar(&self) {
        let mut estados = match self.estados.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        estados.clear();
        self.inicializado.store(false, Ordering::Release);
    }
}

impl Default for PinStateCache {
    fn default() -> Self {
        Self::new()
    }
}

// ==========================================
// 线协议帧
// ==========================================

/// 单引脚读数
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PinReading {
    pub pin: u8,
    pub value: u8,
}

/// 入站帧: 顶层数组 = 初始快照, 顶层对象 = 单引脚更新
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GpioFrame {
    Snapshot(Vec<PinReading>),
    Update(PinReading),
}

// ==========================================
// 订阅者接口
// ==========================================

/// 引脚事件订阅者 (C8 计数入账 / C9 自动暂停检测)
#[async_trait]
pub trait PinListener: Send + Sync {
    /// 初始状态已知后回调 (快照到达或首条消息播种之后)
    async fn on_inicializado(&self, estados: &HashMap<u8, u8>);

    /// 引脚电平变化 (仅在初始化之后触发)
    async fn on_cambio(&self, pin: u8, anterior: u8, valor: u8);
}

// ==========================================
// 链路配置
// ==========================================
#[derive(Debug, Clone)]
pub struct GpioLinkConfig {
    /// host:port
    pub endpoint: String,
    /// 无消息判定死链的时长
    pub heartbeat: Duration,
    /// 看门狗/重连周期
    pub watchdog: Duration,
}

// ==========================================
// GpioLink - 现场链路
// ==========================================
pub struct GpioLink {
    config: GpioLinkConfig,
    cache: Arc<PinStateCache>,
    listeners: Vec<Arc<dyn PinListener>>,
    conectado: AtomicBool,
    cancel: CancellationToken,
}

impl GpioLink {
    pub fn new(config: GpioLinkConfig, cache: Arc<PinStateCache>) -> Self {
        Self {
            config,
            cache,
            listeners: Vec::new(),
            conectado: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// 注册订阅者 (启动前调用)
    pub fn agregar_listener(&mut self, listener: Arc<dyn PinListener>) {
        self.listeners.push(listener);
    }

    /// 链路是否已连接
    pub fn esta_conectado(&self) -> bool {
        self.conectado.load(Ordering::Acquire)
    }

    /// 链路取消令牌 (依赖的定时器以其子令牌挂接)
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 关闭链路: 取消看门狗与 socket (幂等)
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// 链路主任务: 连接 → 读取 → 断开清理 → 看门狗周期后重连
    pub async fn run(self: Arc<Self>) {
        info!(endpoint = %self.config.endpoint, "GPIO 链路任务启动");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match TcpStream::connect(&self.config.endpoint).await {
                Ok(stream) => {
                    info!(endpoint = %self.config.endpoint, "GPIO 链路已连接");
                    self.conectado.store(true, Ordering::Release);
                    // 新连接从零开始: 等待快照或首条消息播种
                    self.cache.limpiar();

                    self.leer_hasta_desconexion(stream).await;

                    self.conectado.store(false, Ordering::Release);
                    self.cache.limpiar();
                    warn!("GPIO 链路断开, 等待重连");
                }
                Err(e) => {
                    warn!(endpoint = %self.config.endpoint, "GPIO 连接失败: {}", e);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.config.watchdog) => {}
            }
        }

        info!("GPIO 链路任务退出");
    }

    /// 读取循环: 行分帧; 看门狗周期检查心跳
    async fn leer_hasta_desconexion(&self, stream: TcpStream) {
        let mut lines = BufReader::new(stream).lines();
        let mut ultimo_mensaje = Instant::now();

        let mut tick = interval(self.config.watchdog);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tick.tick() => {
                    // 死链判定: 即使 socket 仍报告 open, 超时也强制重连
                    if ultimo_mensaje.elapsed() > self.config.heartbeat {
                        warn!(
                            "GPIO 心跳超时 (>{:?} 无消息), 强制重连",
                            self.config.heartbeat
                        );
                        return;
                    }
                }
                linea = lines.next_line() => match linea {
                    Ok(Some(texto)) => {
                        ultimo_mensaje = Instant::now();
                        self.procesar_frame(&texto).await;
                    }
                    Ok(None) => {
                        info!("GPIO 对端关闭连接");
                        return;
                    }
                    Err(e) => {
                        warn!("GPIO 读取错误: {}", e);
                        return;
                    }
                }
            }
        }
    }

    /// 处理一帧入站消息 (读取循环调用; 也是协议的单点入口)
    pub async fn procesar_frame(&self, texto: &str) {
        let texto = texto.trim();
        if texto.is_empty() {
            return;
        }

        let frame: GpioFrame = match serde_json::from_str(texto) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("GPIO 消息解析失败: {} (frame: {})", e, texto);
                return;
            }
        };

        match frame {
            GpioFrame::Snapshot(lecturas) => {
                info!(pines = lecturas.len(), "收到 GPIO 初始快照");
                for lectura in &lecturas {
                    self.cache.set(lectura.pin, lectura.value);
                }
                self.cache.marcar_inicializado();
                self.notificar_inicializado().await;
            }
            GpioFrame::Update(lectura) => self.procesar_update(lectura).await,
        }
    }

    async fn procesar_update(&self, lectura: PinReading) {
        if !self.cache.esta_inicializado() {
            // 重连路径无快照: 首条单引脚消息仅播种状态, 不发变化事件
            self.cache.set(lectura.pin, lectura.value);
            self.cache.marcar_inicializado();
            info!(
                pin = lectura.pin,
                valor = lectura.value,
                "无快照, 以首条单引脚消息播种状态"
            );
            self.notificar_inicializado().await;
            return;
        }

        let anterior = self.cache.set(lectura.pin, lectura.value);
        match anterior {
            None => {
                // 初始化后首次见到的引脚: 仅播种, 不算电平变化
                debug!(pin = lectura.pin, valor = lectura.value, "首次见到引脚, 播种状态");
            }
            Some(previo) if previo != lectura.value => {
                debug!(
                    pin = lectura.pin,
                    "引脚电平变化: {} -> {}", previo, lectura.value
                );
                for listener in &self.listeners {
                    listener.on_cambio(lectura.pin, previo, lectura.value).await;
                }
            }
            Some(_) => {
                // 无实际变化
            }
        }
    }

    async fn notificar_inicializado(&self) {
        let snapshot = self.cache.snapshot();
        for listener in &self.listeners {
            listener.on_inicializado(&snapshot).await;
        }
    }
}
