// ==========================================
// 灌装线生产执行系统 - 暂停引擎
// ==========================================
// 两段式暂停:
// - 创建可不带 tipo (现场先停线后补分类)
// - 关闭时 tipo 必须补齐; 传入不同 tipo 则覆盖并重算 computa
// 不变量: 每订单同一时刻最多一条未关闭暂停
// computa = tipo ∉ {CAMBIO_TURNO, FABRICACION_PARCIAL, PARADA}
// ==========================================

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::db::{ahora, minutos_entre};
use crate::domain::order::Order;
use crate::domain::pause::Pause;
use crate::domain::types::{EstadoOrder, TipoPausa};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{
    topic_order_detalle, EventEnvelope, EventSink, EventType, TOPIC_FABRICACION_PARCIAL,
    TOPIC_ORDERS, TOPIC_PAUSES_NON_PARTIAL,
};
use crate::engine::locks::{bloquear, OrderLockRegistry};
use crate::engine::order_engine::OrderEngine;
use crate::engine::visibility::VisibilityProjector;
use crate::repository::{OrderRepository, PauseRepository};

// ==========================================
// 输入 / 输出结构
// ==========================================

/// 开启暂停入参
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseOpen {
    #[serde(default)]
    pub tipo: Option<TipoPausa>,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub operario: Option<String>,
}

/// 关闭暂停入参
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseClose {
    #[serde(default)]
    pub tipo: Option<TipoPausa>,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(default)]
    pub operario: Option<String>,
}

/// 暂停事件/查询视图 (附订单业务编码)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseView {
    #[serde(flatten)]
    pub pause: Pause,
    pub cod_order: Option<String>,
}

// ==========================================
// PauseEngine - 暂停引擎
// ==========================================
pub struct PauseEngine {
    conn: Arc<Mutex<Connection>>,
    locks: Arc<OrderLockRegistry>,
    bus: Arc<dyn EventSink>,
    visibilidad: Arc<VisibilityProjector>,
    order_engine: Arc<OrderEngine>,
    orders: OrderRepository,
    pauses: PauseRepository,
}

impl PauseEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        locks: Arc<OrderLockRegistry>,
        bus: Arc<dyn EventSink>,
        visibilidad: Arc<VisibilityProjector>,
        order_engine: Arc<OrderEngine>,
    ) -> Self {
        Self {
            conn,
            locks,
            bus,
            visibilidad,
            order_engine,
            orders: OrderRepository,
            pauses: PauseRepository,
        }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("锁获取失败: {e}")))
    }

    // ==========================================
    // 开启暂停
    // ==========================================

    /// 开启暂停: EN_PROCESO → PAUSADA
    pub fn abrir(&self, id_order: i64, dto: PauseOpen) -> EngineResult<Pause> {
        info!(id_order, tipo = ?dto.tipo, "开启暂停");

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let momento = ahora();
        let (pausa, order) = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let mut order = self
                .orders
                .find_by_id(&tx, id_order)?
                .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

            if order.estado != EstadoOrder::EnProceso {
                return Err(EngineError::InvalidState(format!(
                    "solo se pueden crear pausas para órdenes EN_PROCESO. Estado actual: {}",
                    order.estado
                )));
            }

            if self.pauses.has_activa(&tx, id_order)? {
                return Err(EngineError::InvalidState(
                    "ya existe una pausa activa para esta orden".to_string(),
                ));
            }

            let mut pausa = Pause {
                id_pausa: 0,
                id_order,
                tipo: dto.tipo,
                descripcion: dto.descripcion,
                operario: dto.operario,
                computa: dto.tipo.map(|t| t.computa()),
                hora_inicio: momento,
                hora_fin: None,
                tiempo_total_pausa: None,
            };
            pausa.id_pausa = self.pauses.insert(&tx, &pausa)?;

            order.estado = EstadoOrder::Pausada;
            self.orders.update(&tx, &order)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
            (pausa, order)
        };

        info!(
            id_pausa = pausa.id_pausa,
            id_order,
            "暂停已创建, 订单 {} 转为 PAUSADA",
            order.cod_order
        );

        // 提交后通知
        self.notificar_pausa(EventType::PauseCreated, &pausa, &order);
        self.order_engine
            .notificar_cambio_estado(&order, EstadoOrder::EnProceso, EstadoOrder::Pausada);
        self.notificar_por_tipo(pausa.tipo);
        self.visibilidad.refresh();

        Ok(pausa)
    }

    // ==========================================
    // 关闭暂停
    // ==========================================

    /// 关闭暂停: PAUSADA → EN_PROCESO
    ///
    /// 两段式补全: 存量 tipo 为空时必须由调用方提供;
    /// 提供了不同 tipo 则覆盖并重算 computa;
    /// 新旧 descripcion 以 " | " 连接
    pub fn cerrar(&self, id_order: i64, id_pausa: i64, dto: PauseClose) -> EngineResult<Pause> {
        info!(id_order, id_pausa, "关闭暂停");

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let momento = ahora();
        let (pausa, order) = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let mut pausa =
                self.pauses
                    .find_by_id(&tx, id_pausa)?
                    .ok_or_else(|| EngineError::NotFound {
                        entity: "Pausa".to_string(),
                        id: id_pausa.to_string(),
                    })?;

            if pausa.id_order != id_order {
                return Err(EngineError::InvalidInput(format!(
                    "la pausa {id_pausa} no pertenece a la orden {id_order}"
                )));
            }

            if pausa.hora_fin.is_some() {
                return Err(EngineError::InvalidState(
                    "la pausa ya está finalizada".to_string(),
                ));
            }

            // 两段式 tipo 补全
            match (pausa.tipo, dto.tipo) {
                (None, None) => {
                    return Err(EngineError::InvalidInput(
                        "la pausa se creó sin tipo; debe proporcionar el tipo al finalizar"
                            .to_string(),
                    ));
                }
                (None, Some(nuevo)) => {
                    pausa.tipo = Some(nuevo);
                    pausa.computa = Some(nuevo.computa());
                    info!(id_pausa, tipo = %nuevo, "关闭时补齐暂停类型");
                }
                (Some(actual), Some(nuevo)) if actual != nuevo => {
                    info!(id_pausa, "暂停类型 {} 更新为 {}", actual, nuevo);
                    pausa.tipo = Some(nuevo);
                    pausa.computa = Some(nuevo.computa());
                }
                _ => {}
            }

            if let Some(operario) = dto.operario.as_deref().filter(|s| !s.trim().is_empty()) {
                pausa.operario = Some(operario.to_string());
            }

            if let Some(nueva) = dto.descripcion.as_deref().filter(|s| !s.trim().is_empty()) {
                pausa.descripcion = match pausa.descripcion.take().filter(|d| !d.trim().is_empty())
                {
                    Some(previa) => Some(format!("{previa} | {nueva}")),
                    None => Some(nueva.to_string()),
                };
            }

            pausa.hora_fin = Some(momento);
            pausa.tiempo_total_pausa = Some(minutos_entre(pausa.hora_inicio, momento));
            self.pauses.update(&tx, &pausa)?;

            let mut order = self
                .orders
                .find_by_id(&tx, id_order)?
                .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

            if order.estado != EstadoOrder::Pausada {
                return Err(EngineError::Conflict(format!(
                    "la orden {} ya no está PAUSADA (estado actual: {})",
                    order.cod_order, order.estado
                )));
            }

            // 系统级不变量: 恢复生产前不得有其他 EN_PROCESO 订单
            if let Some(en_proceso) = self
                .orders
                .find_by_estados(&tx, &[EstadoOrder::EnProceso])?
                .into_iter()
                .find(|o| o.id_order != id_order)
            {
                return Err(EngineError::InvalidState(format!(
                    "no se puede reanudar la orden {}: ya existe una orden EN_PROCESO ({})",
                    order.cod_order, en_proceso.cod_order
                )));
            }

            order.estado = EstadoOrder::EnProceso;
            self.orders.update(&tx, &order)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
            (pausa, order)
        };

        info!(
            id_pausa,
            tipo = ?pausa.tipo,
            computa = ?pausa.computa,
            duracion_min = ?pausa.tiempo_total_pausa,
            "暂停已关闭"
        );

        self.notificar_pausa(EventType::PauseFinished, &pausa, &order);
        self.order_engine
            .notificar_cambio_estado(&order, EstadoOrder::Pausada, EstadoOrder::EnProceso);
        self.notificar_por_tipo(pausa.tipo);
        self.visibilidad.refresh();

        Ok(pausa)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 查询订单的全部暂停 (开始时间倒序)
    pub fn listar_por_order(&self, id_order: i64) -> EngineResult<Vec<PauseView>> {
        let conn = self.get_conn()?;

        let order = self
            .orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

        let pausas = self.pauses.find_by_order(&conn, id_order)?;
        Ok(pausas
            .into_iter()
            .map(|pause| PauseView {
                pause,
                cod_order: Some(order.cod_order.clone()),
            })
            .collect())
    }

    /// 查询订单的未关闭暂停
    pub fn activa(&self, id_order: i64) -> EngineResult<Option<PauseView>> {
        let conn = self.get_conn()?;

        let order = self
            .orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

        Ok(self
            .pauses
            .find_activa_by_order(&conn, id_order)?
            .map(|pause| PauseView {
                pause,
                cod_order: Some(order.cod_order),
            }))
    }

    /// 全部未关闭暂停, 排除局部制造 (看板载荷)
    pub fn activas_sin_parcial(&self) -> EngineResult<Vec<PauseView>> {
        let conn = self.get_conn()?;
        self.activas_sin_parcial_con(&conn)
    }

    fn activas_sin_parcial_con(&self, conn: &Connection) -> EngineResult<Vec<PauseView>> {
        let pausas = self
            .pauses
            .find_activas_excluyendo_tipo(conn, TipoPausa::FabricacionParcial)?;

        let mut vistas = Vec::with_capacity(pausas.len());
        for pause in pausas {
            let cod_order = self
                .orders
                .find_by_id(conn, pause.id_order)?
                .map(|o| o.cod_order);
            vistas.push(PauseView { pause, cod_order });
        }
        Ok(vistas)
    }

    /// 处于局部制造暂停中的订单列表 (看板载荷)
    pub fn ordenes_con_parcial_activa(&self) -> EngineResult<Vec<Order>> {
        let conn = self.get_conn()?;
        self.ordenes_con_parcial_activa_con(&conn)
    }

    fn ordenes_con_parcial_activa_con(&self, conn: &Connection) -> EngineResult<Vec<Order>> {
        let ids = self
            .pauses
            .find_order_ids_con_tipo_activo(conn, TipoPausa::FabricacionParcial)?;

        let mut ordenes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = self.orders.find_by_id(conn, id)? {
                ordenes.push(order);
            }
        }
        Ok(ordenes)
    }

    // ==========================================
    // 事件通知
    // ==========================================

    fn notificar_pausa(&self, tipo_evento: EventType, pausa: &Pause, order: &Order) {
        let view = PauseView {
            pause: pausa.clone(),
            cod_order: Some(order.cod_order.clone()),
        };
        let message = match tipo_evento {
            EventType::PauseCreated => format!("Nueva pausa creada en orden: {}", order.cod_order),
            _ => format!("Pausa finalizada en orden: {}", order.cod_order),
        };
        let event = EventEnvelope::nuevo(tipo_evento, message, &view);

        self.bus.publish(TOPIC_ORDERS, event.clone());
        self.bus.publish(&topic_order_detalle(order.id_order), event);
    }

    /// 按最终 tipo 刷新对应看板主题
    ///
    /// FABRICACION_PARCIAL → fabricacion-parcial; 其余 → pauses-non-partial
    fn notificar_por_tipo(&self, tipo: Option<TipoPausa>) {
        if tipo == Some(TipoPausa::FabricacionParcial) {
            self.notificar_parcial_update();
        } else {
            self.notificar_non_partial_update();
        }
    }

    /// 发布局部制造订单列表更新
    pub fn notificar_parcial_update(&self) {
        match self.ordenes_con_parcial_activa() {
            Ok(ordenes) => {
                let event = EventEnvelope::nuevo(
                    EventType::FabricacionParcialUpdate,
                    "Lista de órdenes con fabricación parcial actualizada",
                    &ordenes,
                );
                self.bus.publish(TOPIC_FABRICACION_PARCIAL, event);
            }
            Err(e) => {
                tracing::warn!("局部制造列表计算失败, 跳过发布: {}", e);
            }
        }
    }

    /// 发布非局部制造未关闭暂停列表更新
    pub fn notificar_non_partial_update(&self) {
        match self.activas_sin_parcial() {
            Ok(pausas) => {
                let event = EventEnvelope::nuevo(
                    EventType::PausesNonPartialUpdate,
                    "Lista de pausas activas (sin fabricación parcial) actualizada",
                    &pausas,
                );
                self.bus.publish(TOPIC_PAUSES_NON_PARTIAL, event);
            }
            Err(e) => {
                tracing::warn!("未关闭暂停列表计算失败, 跳过发布: {}", e);
            }
        }
    }
}
