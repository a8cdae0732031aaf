// ==========================================
// 灌装线生产执行系统 - 自动暂停检测器
// ==========================================
// 监视两个独立引脚 (ponderal / etiqueta), 1 = OK, 0 = FALLO:
// - 引脚保持 0 达 T_OPEN (20s) → 开启自动暂停 (AVERIA_PONDERAL / AVERIA_ETIQUETA)
// - 开启后引脚保持 1 达 T_CLOSE (5s) → 关闭该暂停
// - 任意自动关闭 (含人工对账) 之后冷却 T_COOLDOWN (30s)
// 全局不变量:
// - 两引脚合计同一时刻最多一条未关闭自动暂停
// - 冷却期内不武装新的开启定时器
// - 仅当可见订单处于 EN_PROCESO 时允许开启
// 人工对账: 周期轮询库内暂停, 被人工关闭则清理状态并进入冷却
// 任何未捕获失败: 清理状态并进入冷却, 绝不留下半开自动暂停
// ==========================================

use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::domain::order::Order;
use crate::domain::pause::Pause;
use crate::domain::types::{EstadoOrder, TipoPausa};
use crate::engine::pause_engine::{PauseClose, PauseEngine, PauseOpen};
use crate::engine::visibility::VisibilityProjector;
use crate::gpio::link::{PinListener, PinStateCache};
use crate::repository::PauseRepository;

/// 自动暂停的合成操作员标签
pub const OPERARIO_SISTEMA: &str = "SISTEMA AUTOMATICO";

// ==========================================
// 检测器配置
// ==========================================
#[derive(Debug, Clone)]
pub struct AutoPauseSettings {
    pub pin_ponderal: u8,
    pub pin_etiqueta: u8,
    pub t_open: Duration,
    pub t_close: Duration,
    pub t_cooldown: Duration,
    pub reconcile_interval: Duration,
    pub observer_interval: Duration,
}

impl AutoPauseSettings {
    pub fn desde_config(config: &AppConfig) -> Self {
        Self {
            pin_ponderal: crate::config::PIN_PONDERAL,
            pin_etiqueta: crate::config::PIN_ETIQUETA,
            t_open: config.t_open,
            t_close: config.t_close,
            t_cooldown: config.t_cooldown,
            reconcile_interval: config.reconcile_interval,
            observer_interval: config.observer_interval,
        }
    }
}

// ==========================================
// 内部状态
// ==========================================

/// 本检测器开启的未关闭自动暂停
#[derive(Debug, Clone)]
struct PausaAutoActiva {
    pin: u8,
    id_order: i64,
    id_pausa: i64,
    tipo: TipoPausa,
}

#[derive(Default)]
struct EstadoDetector {
    /// 每引脚的开启定时器
    timers_apertura: HashMap<u8, JoinHandle<()>>,
    /// 每引脚的关闭定时器
    timers_cierre: HashMap<u8, JoinHandle<()>>,
    /// 冷却定时器 (单格)
    timer_cooldown: Option<JoinHandle<()>>,
    en_cooldown: bool,
    /// 未关闭自动暂停 (单格, 仅本组件读写)
    activa: Option<PausaAutoActiva>,
    /// 上一次观察到的 "可见订单处于 EN_PROCESO"
    ultima_en_proceso: bool,
}

// ==========================================
// AutoPauseDetector - 自动暂停检测器
// ==========================================
pub struct AutoPauseDetector {
    settings: AutoPauseSettings,
    cache: Arc<PinStateCache>,
    pausas: Arc<PauseEngine>,
    visibilidad: Arc<VisibilityProjector>,
    conn: Arc<Mutex<Connection>>,
    pause_repo: PauseRepository,
    estado: Mutex<EstadoDetector>,
    cancel: CancellationToken,
}

impl AutoPauseDetector {
    /// 创建检测器
    ///
    /// cancel 取链路令牌的子令牌: 链路 shutdown 级联取消全部定时器
    pub fn new(
        settings: AutoPauseSettings,
        cache: Arc<PinStateCache>,
        pausas: Arc<PauseEngine>,
        visibilidad: Arc<VisibilityProjector>,
        conn: Arc<Mutex<Connection>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        info!(
            pin_ponderal = settings.pin_ponderal,
            pin_etiqueta = settings.pin_etiqueta,
            "自动暂停检测器创建 - 开启: {:?}, 关闭: {:?}, 冷却: {:?}",
            settings.t_open,
            settings.t_close,
            settings.t_cooldown
        );
        Arc::new(Self {
            settings,
            cache,
            pausas,
            visibilidad,
            conn,
            pause_repo: PauseRepository,
            estado: Mutex::new(EstadoDetector::default()),
            cancel,
        })
    }

    /// 启动后台任务: 人工对账轮询 + EN_PROCESO 观察
    pub fn iniciar_tareas(this: &Arc<Self>) {
        // 对账: 未关闭自动暂停被人工关闭时清理状态
        {
            let this = Arc::clone(this);
            tokio::spawn(async move {
                let mut tick = interval(this.settings.reconcile_interval);
                loop {
                    tokio::select! {
                        _ = this.cancel.cancelled() => break,
                        _ = tick.tick() => Self::verificar_pausa_activa(&this),
                    }
                }
                debug!("自动暂停对账任务退出");
            });
        }

        // 观察: 人工暂停结束后订单回到 EN_PROCESO 时重新武装
        {
            let this = Arc::clone(this);
            tokio::spawn(async move {
                let mut tick = interval(this.settings.observer_interval);
                loop {
                    tokio::select! {
                        _ = this.cancel.cancelled() => break,
                        _ = tick.tick() => Self::observar_orden(&this),
                    }
                }
                debug!("订单状态观察任务退出");
            });
        }
    }

    /// 关闭检测器: 取消全部定时器 (幂等)
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut estado = self.estado_lock();
        for (_, timer) in estado.timers_apertura.drain() {
            timer.abort();
        }
        for (_, timer) in estado.timers_cierre.drain() {
            timer.abort();
        }
        if let Some(timer) = estado.timer_cooldown.take() {
            timer.abort();
        }
        debug!("自动暂停检测器已关闭");
    }

    // ==========================================
    // 状态查询
    // ==========================================

    /// 是否有本组件开启的未关闭自动暂停
    pub fn tiene_pausa_activa(&self) -> bool {
        self.estado_lock().activa.is_some()
    }

    /// 是否处于冷却期
    pub fn en_cooldown(&self) -> bool {
        self.estado_lock().en_cooldown
    }

    /// 监视引脚的当前电平
    pub fn estado_pin(&self, pin: u8) -> Option<u8> {
        self.cache.get(pin)
    }

    // ==========================================
    // 信号处理 (PinListener 适配器转发)
    // ==========================================

    fn al_inicializar(this: &Arc<Self>) {
        let mut estado = this.estado_lock();
        info!(
            ponderal = ?this.cache.get(this.settings.pin_ponderal),
            etiqueta = ?this.cache.get(this.settings.pin_etiqueta),
            "GPIO 初始状态已知, 评估自动暂停条件"
        );
        Self::evaluar_pines(this, &mut estado);
    }

    /// 1→0: 取消本引脚关闭定时器; 条件满足则武装开启定时器
    fn senal_fallo(this: &Arc<Self>, pin: u8) {
        info!(pin, "信号 FALLO ({})", this.nombre_pin(pin));

        let mut estado = this.estado_lock();

        if let Some(timer) = estado.timers_cierre.remove(&pin) {
            timer.abort();
            debug!(pin, "关闭定时器已取消");
        }

        if Self::puede_armar_apertura(this, &estado, pin) {
            Self::armar_timer_apertura(this, &mut estado, pin);
        } else {
            debug!(pin, "不满足开启条件 (已有自动暂停/冷却/订单不在 EN_PROCESO)");
        }
    }

    /// 0→1: 取消本引脚开启定时器; 未关闭自动暂停属于本引脚则武装关闭定时器
    fn senal_ok(this: &Arc<Self>, pin: u8) {
        info!(pin, "信号 OK ({})", this.nombre_pin(pin));

        let mut estado = this.estado_lock();

        if let Some(timer) = estado.timers_apertura.remove(&pin) {
            timer.abort();
            debug!(pin, "开启定时器已取消");
        }

        if estado.activa.as_ref().map(|a| a.pin) == Some(pin) {
            Self::armar_timer_cierre(this, &mut estado, pin);
        }
    }

    // ==========================================
    // 开启路径
    // ==========================================

    /// 开启定时器的武装条件
    fn puede_armar_apertura(this: &Arc<Self>, estado: &EstadoDetector, pin: u8) -> bool {
        if let Some(activa) = &estado.activa {
            debug!(pin_activa = activa.pin, "已存在未关闭自动暂停");
            return false;
        }

        if estado.en_cooldown {
            debug!("处于冷却期");
            return false;
        }

        // 另一引脚已有未完成的开启定时器时不再武装
        for (otro_pin, timer) in &estado.timers_apertura {
            if *otro_pin != pin && !timer.is_finished() {
                debug!(otro_pin, "另一引脚已有开启定时器");
                return false;
            }
        }

        if this.orden_en_proceso().is_none() {
            debug!("可见订单不在 EN_PROCESO, 忽略 GPIO 信号");
            return false;
        }

        true
    }

    fn armar_timer_apertura(this: &Arc<Self>, estado: &mut EstadoDetector, pin: u8) {
        if let Some(previo) = estado.timers_apertura.remove(&pin) {
            previo.abort();
        }

        info!(
            pin,
            "武装开启定时器: {:?} 后创建自动暂停 ({})",
            this.settings.t_open,
            this.nombre_pin(pin)
        );

        let tarea = Arc::clone(this);
        let cancel = this.cancel.clone();
        let t_open = this.settings.t_open;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(t_open) => Self::disparo_apertura(&tarea, pin),
            }
        });
        estado.timers_apertura.insert(pin, handle);
    }

    /// 开启定时器到期: 复核条件后创建自动暂停
    fn disparo_apertura(this: &Arc<Self>, pin: u8) {
        let mut estado = this.estado_lock();
        estado.timers_apertura.remove(&pin);

        // 到期复核: 引脚仍为 0 / 无未关闭自动暂停 / 不在冷却 / 订单仍 EN_PROCESO
        if estado.activa.is_some() || estado.en_cooldown {
            debug!(pin, "到期时已有自动暂停或处于冷却, 放弃开启");
            return;
        }

        if this.cache.get(pin) != Some(0) {
            info!(pin, "引脚已恢复, 放弃开启自动暂停");
            return;
        }

        let Some(order) = this.orden_en_proceso() else {
            info!(pin, "无 EN_PROCESO 可见订单, 放弃开启自动暂停");
            return;
        };

        let tipo = this.tipo_para_pin(pin);
        info!(
            pin,
            id_order = order.id_order,
            tipo = %tipo,
            "创建自动暂停 (orden {})",
            order.cod_order
        );

        let dto = PauseOpen {
            tipo: Some(tipo),
            descripcion: Some(format!("Pausa automática detectada por señal GPIO {pin}")),
            operario: Some(OPERARIO_SISTEMA.to_string()),
        };

        match this.pausas.abrir(order.id_order, dto) {
            Ok(pausa) => {
                estado.activa = Some(PausaAutoActiva {
                    pin,
                    id_order: order.id_order,
                    id_pausa: pausa.id_pausa,
                    tipo,
                });
                info!(
                    id_pausa = pausa.id_pausa,
                    id_order = order.id_order,
                    "自动暂停已创建"
                );
            }
            Err(e) => {
                error!(pin, id_order = order.id_order, "自动暂停创建失败: {}", e);
            }
        }
    }

    // ==========================================
    // 关闭路径
    // ==========================================

    fn armar_timer_cierre(this: &Arc<Self>, estado: &mut EstadoDetector, pin: u8) {
        if let Some(previo) = estado.timers_cierre.remove(&pin) {
            previo.abort();
        }

        info!(
            pin,
            "武装关闭定时器: {:?} 后关闭自动暂停 ({})",
            this.settings.t_close,
            this.nombre_pin(pin)
        );

        let tarea = Arc::clone(this);
        let cancel = this.cancel.clone();
        let t_close = this.settings.t_close;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(t_close) => Self::disparo_cierre(&tarea, pin),
            }
        });
        estado.timers_cierre.insert(pin, handle);
    }

    /// 关闭定时器到期: 复核后关闭自动暂停并进入冷却
    fn disparo_cierre(this: &Arc<Self>, pin: u8) {
        let mut estado = this.estado_lock();
        estado.timers_cierre.remove(&pin);

        let Some(activa) = estado.activa.clone() else {
            warn!(pin, "到期时已无未关闭自动暂停");
            return;
        };

        if activa.pin != pin {
            warn!(
                pin,
                pin_activa = activa.pin,
                "未关闭自动暂停属于另一引脚, 忽略"
            );
            return;
        }

        if this.cache.get(pin) != Some(1) {
            info!(pin, "引脚回到 FALLO, 放弃关闭自动暂停");
            return;
        }

        // 复核库内状态: 可能已被人工关闭
        match this.leer_pausa(activa.id_pausa) {
            Ok(None) => {
                info!(id_pausa = activa.id_pausa, "暂停已不存在, 清理状态");
                estado.activa = None;
                Self::iniciar_cooldown(this, &mut estado);
            }
            Ok(Some(pausa)) if pausa.hora_fin.is_some() => {
                info!(id_pausa = activa.id_pausa, "暂停已被人工关闭, 清理状态");
                estado.activa = None;
                Self::iniciar_cooldown(this, &mut estado);
            }
            Ok(Some(_)) => {
                let dto = PauseClose {
                    tipo: None,
                    descripcion: Some(format!(
                        "Finalizada automáticamente - señal GPIO {pin} recuperada"
                    )),
                    operario: None,
                };

                match this.pausas.cerrar(activa.id_order, activa.id_pausa, dto) {
                    Ok(pausa) => {
                        info!(
                            id_pausa = pausa.id_pausa,
                            duracion_min = ?pausa.tiempo_total_pausa,
                            "自动暂停已关闭"
                        );
                    }
                    Err(e) => {
                        error!(id_pausa = activa.id_pausa, "自动暂停关闭失败: {}", e);
                    }
                }

                // 成功与否都清理状态并进入冷却, 不留半开
                estado.activa = None;
                Self::iniciar_cooldown(this, &mut estado);
            }
            Err(e) => {
                error!(id_pausa = activa.id_pausa, "读取暂停失败: {}", e);
                estado.activa = None;
                Self::iniciar_cooldown(this, &mut estado);
            }
        }
    }

    // ==========================================
    // 冷却
    // ==========================================

    fn iniciar_cooldown(this: &Arc<Self>, estado: &mut EstadoDetector) {
        info!("进入冷却期 {:?}", this.settings.t_cooldown);
        estado.en_cooldown = true;

        if let Some(previo) = estado.timer_cooldown.take() {
            previo.abort();
        }

        let tarea = Arc::clone(this);
        let cancel = this.cancel.clone();
        let t_cooldown = this.settings.t_cooldown;
        estado.timer_cooldown = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(t_cooldown) => Self::fin_cooldown(&tarea),
            }
        }));
    }

    /// 冷却到期: 重新评估引脚, 仍在 FALLO 的引脚再武装 (首个命中者)
    fn fin_cooldown(this: &Arc<Self>) {
        info!("冷却期结束, 重新评估引脚");
        let mut estado = this.estado_lock();
        estado.en_cooldown = false;
        estado.timer_cooldown = None;
        Self::evaluar_pines(this, &mut estado);
    }

    // ==========================================
    // 周期任务
    // ==========================================

    /// 对账: 未关闭自动暂停被人工关闭时, 取消关闭定时器并进入冷却
    fn verificar_pausa_activa(this: &Arc<Self>) {
        let mut estado = this.estado_lock();
        let Some(activa) = estado.activa.clone() else {
            return;
        };

        let cerrada_externamente = match this.leer_pausa(activa.id_pausa) {
            Ok(None) => true,
            Ok(Some(pausa)) => pausa.hora_fin.is_some(),
            Err(e) => {
                error!(id_pausa = activa.id_pausa, "对账读取失败: {}", e);
                false
            }
        };

        if cerrada_externamente {
            info!(
                id_pausa = activa.id_pausa,
                "自动暂停已被外部关闭, 清理状态并进入冷却"
            );
            if let Some(timer) = estado.timers_cierre.remove(&activa.pin) {
                timer.abort();
            }
            estado.activa = None;
            Self::iniciar_cooldown(this, &mut estado);
        }
    }

    /// 观察订单回到 EN_PROCESO (人工暂停结束后) 并重新评估引脚
    fn observar_orden(this: &Arc<Self>) {
        let mut estado = this.estado_lock();

        if estado.activa.is_some() || estado.en_cooldown || !this.cache.esta_inicializado() {
            return;
        }

        let actual = this.orden_en_proceso().is_some();
        let previo = estado.ultima_en_proceso;
        estado.ultima_en_proceso = actual;

        if actual && !previo {
            info!("订单回到 EN_PROCESO, 评估 GPIO 状态以恢复检测");
            Self::evaluar_pines(this, &mut estado);
        }
    }

    /// 评估两个监视引脚, 首个处于 FALLO 且满足条件的引脚武装开启定时器
    fn evaluar_pines(this: &Arc<Self>, estado: &mut EstadoDetector) {
        for pin in [this.settings.pin_ponderal, this.settings.pin_etiqueta] {
            if this.cache.get(pin) == Some(0) {
                info!(pin, "引脚处于 FALLO ({})", this.nombre_pin(pin));
                if Self::puede_armar_apertura(this, estado, pin) {
                    Self::armar_timer_apertura(this, estado, pin);
                    break; // 同一时刻只武装一个
                }
            }
        }
    }

    // ==========================================
    // 辅助
    // ==========================================

    fn estado_lock(&self) -> std::sync::MutexGuard<'_, EstadoDetector> {
        match self.estado.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 可见订单处于 EN_PROCESO 时返回之
    fn orden_en_proceso(&self) -> Option<Order> {
        match self.visibilidad.orden_visible() {
            Ok(Some(order)) if order.estado == EstadoOrder::EnProceso => Some(order),
            Ok(_) => None,
            Err(e) => {
                warn!("可见订单查询失败: {}", e);
                None
            }
        }
    }

    fn leer_pausa(&self, id_pausa: i64) -> Result<Option<Pause>, crate::engine::EngineError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| crate::engine::EngineError::Internal(format!("锁获取失败: {e}")))?;
        Ok(self.pause_repo.find_by_id(&conn, id_pausa)?)
    }

    fn es_pin_vigilado(&self, pin: u8) -> bool {
        pin == self.settings.pin_ponderal || pin == self.settings.pin_etiqueta
    }

    fn tipo_para_pin(&self, pin: u8) -> TipoPausa {
        if pin == self.settings.pin_ponderal {
            TipoPausa::AveriaPonderal
        } else {
            TipoPausa::AveriaEtiqueta
        }
    }

    fn nombre_pin(&self, pin: u8) -> &'static str {
        if pin == self.settings.pin_ponderal {
            "Ponderal"
        } else if pin == self.settings.pin_etiqueta {
            "Etiqueta"
        } else {
            "Desconocido"
        }
    }
}

// ==========================================
// PinListener 适配器
// ==========================================
pub struct AutoPausePinListener(pub Arc<AutoPauseDetector>);

#[async_trait]
impl PinListener for AutoPausePinListener {
    async fn on_inicializado(&self, _estados: &HashMap<u8, u8>) {
        AutoPauseDetector::al_inicializar(&self.0);
    }

    async fn on_cambio(&self, pin: u8, _anterior: u8, valor: u8) {
        if !self.0.es_pin_vigilado(pin) {
            return;
        }

        if valor == 1 {
            AutoPauseDetector::senal_ok(&self.0, pin);
        } else {
            AutoPauseDetector::senal_fallo(&self.0, pin);
        }
    }
}
