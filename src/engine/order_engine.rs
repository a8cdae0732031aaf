// ==========================================
// 灌装线生产执行系统 - 订单状态引擎
// ==========================================
// 状态机 (仅允许以下迁移, 其余 → InvalidState):
//   CREADA         --iniciar------------------> EN_PROCESO
//   EN_PROCESO     --abrir pausa--------------> PAUSADA
//   PAUSADA        --cerrar pausa-------------> EN_PROCESO
//   EN_PROCESO     --finalizar(acumula=F)-----> FINALIZADA      [计算指标]
//   EN_PROCESO     --finalizar(acumula=T)-----> ESPERA_MANUAL   [计算指标]
//   PAUSADA        --finalizar(*)-------------> (先自动关闭未关闭暂停, 再同上)
//   ESPERA_MANUAL  --iniciar manual-----------> PROCESO_MANUAL
//   PROCESO_MANUAL --finalizar manual---------> FINALIZADA      [不重算指标]
//
// 约定: 依赖 `now` 的派生字段在操作入口取样一次
// 指标仅在订单首次离开 EN_PROCESO 时写入 (收尾事务内)
// ==========================================

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::db::{ahora, minutos_entre};
use crate::domain::metricas::Metricas;
use crate::domain::order::{ExtraData, Order};
use crate::domain::pause::Pause;
use crate::domain::types::{EstadoOrder, TipoPausa};
use crate::engine::counter_engine::CounterEngine;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{topic_order_detalle, EventEnvelope, EventSink, EventType, TOPIC_ORDERS};
use crate::engine::locks::{bloquear, OrderLockRegistry};
use crate::engine::metricas_engine::MetricasEngine;
use crate::engine::visibility::VisibilityProjector;
use crate::repository::{
    ExtraDataRepository, MetricasRepository, OrderFiltro, OrderRepository, PauseRepository,
};

// ==========================================
// 输入 / 输出结构
// ==========================================

/// 创建订单入参
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreate {
    pub cod_order: String,
    pub operario: String,
    pub lote: String,
    pub articulo: String,
    #[serde(default)]
    pub descripcion: Option<String>,
    pub cantidad: i64,
    pub botes_caja: i64,
    pub std_referencia: f64,
    // 附加数据侧表
    #[serde(default)]
    pub formato_bote: Option<String>,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub uds_bote: Option<i64>,
}

/// 收尾订单入参
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFinish {
    #[serde(default)]
    pub botes_buenos: Option<i64>,
    #[serde(default)]
    pub botes_malos: Option<i64>,
    #[serde(default)]
    pub total_cajas_cierre: Option<i64>,
    #[serde(default)]
    pub acumula: Option<bool>,
}

/// 订单事件/查询视图 (订单 + 附加数据平铺)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub formato_bote: Option<String>,
    pub tipo: Option<String>,
    pub uds_bote: Option<i64>,
}

/// 订单完整读取 (订单 + 指标 + 附加数据)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCompleta {
    pub order: Order,
    pub metricas: Option<Metricas>,
    pub extra_data: Option<ExtraData>,
}

/// 订单表格投影
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTabla {
    pub id_order: i64,
    pub cod_order: String,
    pub descripcion: Option<String>,
    pub cantidad: i64,
    pub estado: EstadoOrder,
    pub hora_inicio: Option<chrono::NaiveDateTime>,
    pub hora_fin: Option<chrono::NaiveDateTime>,
    pub oee: Option<f64>,
    pub por_cump_pedido: Option<f64>,
}

/// 派生字段修复结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumenTiempos {
    pub total_ordenes: usize,
    pub actualizadas: usize,
    pub sin_cambios: usize,
}

// ==========================================
// OrderEngine - 订单状态引擎
// ==========================================
pub struct OrderEngine {
    conn: Arc<Mutex<Connection>>,
    locks: Arc<OrderLockRegistry>,
    bus: Arc<dyn EventSink>,
    visibilidad: Arc<VisibilityProjector>,
    contador: Arc<CounterEngine>,
    metricas_engine: Arc<MetricasEngine>,
    orders: OrderRepository,
    extra: ExtraDataRepository,
    pauses: PauseRepository,
    metricas: MetricasRepository,
}

impl OrderEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        locks: Arc<OrderLockRegistry>,
        bus: Arc<dyn EventSink>,
        visibilidad: Arc<VisibilityProjector>,
        contador: Arc<CounterEngine>,
        metricas_engine: Arc<MetricasEngine>,
    ) -> Self {
        Self {
            conn,
            locks,
            bus,
            visibilidad,
            contador,
            metricas_engine,
            orders: OrderRepository,
            extra: ExtraDataRepository,
            pauses: PauseRepository,
            metricas: MetricasRepository,
        }
    }

    fn get_conn(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("锁获取失败: {e}")))
    }

    // ==========================================
    // 创建订单
    // ==========================================

    /// 创建订单 (estado = CREADA), 同时写入附加数据侧表
    ///
    /// 派生字段: cajas_previstas = cantidad / botes_caja
    ///           tiempo_estimado = cantidad / std_referencia
    pub fn crear(&self, dto: OrderCreate) -> EngineResult<OrderView> {
        info!(cod_order = %dto.cod_order, "创建订单");

        validar_creacion(&dto)?;

        let momento = ahora();
        let mut order = Order {
            id_order: 0,
            hora_creacion: momento,
            hora_inicio: None,
            hora_fin: None,
            operario: dto.operario.trim().to_string(),
            cod_order: dto.cod_order.trim().to_string(),
            lote: dto.lote.trim().to_string(),
            articulo: dto.articulo.trim().to_string(),
            descripcion: dto.descripcion.clone(),
            estado: EstadoOrder::Creada,
            cantidad: dto.cantidad,
            botes_caja: dto.botes_caja,
            repercap: false,
            botes_buenos: None,
            botes_malos: None,
            cajas_previstas: Order::calcular_cajas_previstas(dto.cantidad, dto.botes_caja),
            total_cajas_cierre: None,
            acumula: false,
            std_referencia: dto.std_referencia,
            tiempo_estimado: Order::calcular_tiempo_estimado(dto.cantidad, dto.std_referencia),
        };

        let mut extra = ExtraData {
            id_extra_data: 0,
            id_order: 0,
            formato_bote: dto.formato_bote,
            tipo: dto.tipo,
            uds_bote: dto.uds_bote,
        };

        {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            if self.orders.exists_by_cod(&tx, &order.cod_order)? {
                return Err(EngineError::AlreadyExists(order.cod_order.clone()));
            }

            order.id_order = self.orders.insert(&tx, &order)?;
            extra.id_order = order.id_order;
            extra.id_extra_data = self.extra.insert(&tx, &extra)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
        }

        info!(
            id_order = order.id_order,
            cod_order = %order.cod_order,
            "订单创建成功"
        );

        let view = OrderView {
            formato_bote: extra.formato_bote.clone(),
            tipo: extra.tipo.clone(),
            uds_bote: extra.uds_bote,
            order,
        };

        let event = EventEnvelope::nuevo(
            EventType::OrderCreated,
            format!("Nueva orden creada: {}", view.order.cod_order),
            &view,
        );
        self.bus.publish(TOPIC_ORDERS, event);

        Ok(view)
    }

    // ==========================================
    // 开始生产
    // ==========================================

    /// 开始订单生产: CREADA → EN_PROCESO
    ///
    /// 同一事务内激活该订单的瓶计数器
    pub fn iniciar(&self, id_order: i64) -> EngineResult<Order> {
        info!(id_order, "开始订单生产");

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        let momento = ahora();
        let order = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let mut order = self
                .orders
                .find_by_id(&tx, id_order)?
                .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

            if order.estado != EstadoOrder::Creada {
                return Err(EngineError::InvalidState(format!(
                    "solo se pueden iniciar órdenes en estado CREADA. Estado actual: {}",
                    order.estado
                )));
            }

            // 系统级不变量: 同一时刻最多一张 EN_PROCESO 订单
            if let Some(en_proceso) = self
                .orders
                .find_by_estados(&tx, &[EstadoOrder::EnProceso])?
                .into_iter()
                .next()
            {
                return Err(EngineError::InvalidState(format!(
                    "ya existe una orden EN_PROCESO ({}); finalícela o pásela antes de iniciar otra",
                    en_proceso.cod_order
                )));
            }

            order.hora_inicio = Some(momento);
            order.estado = EstadoOrder::EnProceso;
            self.orders.update(&tx, &order)?;

            self.contador.activar_en_tx(&tx, id_order, momento)?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
            order
        };

        info!(
            id_order,
            cod_order = %order.cod_order,
            "订单已开始生产"
        );

        self.notificar_cambio_estado(&order, EstadoOrder::Creada, EstadoOrder::EnProceso);
        self.visibilidad.refresh();

        Ok(order)
    }

    // ==========================================
    // 收尾订单
    // ==========================================

    /// 收尾订单: EN_PROCESO/PAUSADA → FINALIZADA | ESPERA_MANUAL
    ///
    /// - PAUSADA 时先在同一事务内自动关闭未关闭暂停
    /// - 指标在此处计算并写入 (订单生命周期中唯一一次)
    /// - 终态为 FINALIZADA 时去激活计数器
    pub fn finalizar(&self, id_order: i64, dto: OrderFinish) -> EngineResult<Order> {
        info!(id_order, acumula = ?dto.acumula, "收尾订单");

        validar_finalizacion(&dto)?;

        let candado = self.locks.lock_de(id_order);
        let _guardia = bloquear(&candado)?;

        // 依赖 now 的派生字段统一取样一次
        let momento = ahora();
        let (order, estado_anterior) = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

            let mut order = self
                .orders
                .find_by_id(&tx, id_order)?
                .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;

            let estado_anterior = order.estado;
            if !matches!(estado_anterior, EstadoOrder::EnProceso | EstadoOrder::Pausada) {
                return Err(EngineError::InvalidState(format!(
                    "solo se pueden finalizar órdenes EN_PROCESO o PAUSADAS. Estado actual: {}",
                    order.estado
                )));
            }

            // PAUSADA: 自动关闭未关闭暂停
            if estado_anterior == EstadoOrder::Pausada {
                self.cerrar_pausa_automaticamente(&tx, id_order, momento)?;
            }

            // 安全复核: 不允许留下未关闭暂停
            if self.pauses.has_activa(&tx, id_order)? {
                return Err(EngineError::InvalidState(
                    "no se puede finalizar la orden: hay una pausa activa. \
                     Primero finalice la pausa"
                        .to_string(),
                ));
            }

            // 应用收尾数据
            order.botes_buenos = dto.botes_buenos;
            order.botes_malos = dto.botes_malos;
            order.total_cajas_cierre = dto.total_cajas_cierre;
            order.hora_fin = Some(momento);

            let acumula = dto.acumula.unwrap_or(false);
            order.acumula = acumula;
            order.estado = if acumula {
                EstadoOrder::EsperaManual
            } else {
                EstadoOrder::Finalizada
            };
            self.orders.update(&tx, &order)?;

            // 指标: 订单离开 EN_PROCESO 的唯一计算点
            self.metricas_engine.calcular_y_guardar(&tx, &order, momento)?;

            if order.estado == EstadoOrder::Finalizada {
                self.contador.desactivar_en_tx(&tx, id_order, momento)?;
            }

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;
            (order, estado_anterior)
        };

        info!(
            id_order,
            cod_order = %order.cod_order,
            buenos = ?order.botes_buenos,
            malos = ?order.botes_malos,
            estado = %order.estado,
            "订单收尾完成"
        );

        self.notificar_cambio_estado(&order, estado_anterior, order.estado);
        self.visibilidad.refresh();

        Ok(order)
    }

    /// 收尾路径的自动关闭暂停
    ///
    /// 未分类的两段式暂停 (tipo 为空) 在此归为 PARADA (不计入)
    fn cerrar_pausa_automaticamente(
        &self,
        conn: &Connection,
        id_order: i64,
        momento: chrono::NaiveDateTime,
    ) -> EngineResult<()> {
        let Some(mut pausa) = self.pauses.find_activa_by_order(conn, id_order)? else {
            return Ok(());
        };

        info!(
            id_pausa = pausa.id_pausa,
            "订单处于 PAUSADA, 自动关闭未关闭暂停"
        );

        if pausa.tipo.is_none() {
            pausa.tipo = Some(TipoPausa::Parada);
            pausa.computa = Some(TipoPausa::Parada.computa());
        }
        pausa.hora_fin = Some(momento);
        pausa.tiempo_total_pausa = Some(minutos_entre(pausa.hora_inicio, momento));
        self.pauses.update(conn, &pausa)?;

        Ok(())
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 按主键查询订单
    pub fn obtener(&self, id_order: i64) -> EngineResult<Order> {
        let conn = self.get_conn()?;
        self.orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))
    }

    /// 按业务编码查询订单
    pub fn obtener_por_cod(&self, cod_order: &str) -> EngineResult<Order> {
        let conn = self.get_conn()?;
        self.orders
            .find_by_cod(&conn, cod_order)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "Orden".to_string(),
                id: cod_order.to_string(),
            })
    }

    /// 订单视图 (含附加数据)
    pub fn obtener_view(&self, id_order: i64) -> EngineResult<OrderView> {
        let conn = self.get_conn()?;
        let order = self
            .orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;
        let extra = self.extra.find_by_order(&conn, id_order)?;
        Ok(armar_view(order, extra))
    }

    /// 条件查询订单列表 (创建时间倒序)
    pub fn listar(&self, filtro: &OrderFiltro) -> EngineResult<Vec<Order>> {
        let conn = self.get_conn()?;
        Ok(self.orders.listar(&conn, filtro)?)
    }

    /// 按状态统计订单数量
    pub fn estadisticas(&self) -> EngineResult<HashMap<String, i64>> {
        let conn = self.get_conn()?;
        Ok(self.orders.count_por_estado(&conn)?)
    }

    /// 完整读取: 订单 + 指标 + 附加数据
    pub fn obtener_completa(&self, id_order: i64) -> EngineResult<OrderCompleta> {
        let conn = self.get_conn()?;
        let order = self
            .orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;
        let metricas = self.metricas.find_by_order(&conn, id_order)?;
        let extra_data = self.extra.find_by_order(&conn, id_order)?;
        Ok(OrderCompleta {
            order,
            metricas,
            extra_data,
        })
    }

    /// 表格投影: 单订单
    pub fn obtener_tabla(&self, id_order: i64) -> EngineResult<OrderTabla> {
        let conn = self.get_conn()?;
        let order = self
            .orders
            .find_by_id(&conn, id_order)?
            .ok_or_else(|| EngineError::order_no_encontrada(id_order))?;
        let metricas = self.metricas.find_by_order(&conn, id_order)?;
        Ok(armar_tabla(order, metricas))
    }

    /// 表格投影: 全部订单
    pub fn listar_tabla(&self) -> EngineResult<Vec<OrderTabla>> {
        let conn = self.get_conn()?;
        let orders = self.orders.find_all(&conn)?;
        let mut filas = Vec::with_capacity(orders.len());
        for order in orders {
            let metricas = self.metricas.find_by_order(&conn, order.id_order)?;
            filas.push(armar_tabla(order, metricas));
        }
        Ok(filas)
    }

    // ==========================================
    // 派生字段修复
    // ==========================================

    /// 按存储公式重算全部订单的 cajas_previstas / tiempo_estimado
    ///
    /// 用于公式修正后的历史数据修复
    pub fn recalcular_tiempos_estimados(&self) -> EngineResult<ResumenTiempos> {
        info!("重算全部订单的派生字段");

        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Internal(format!("事务开启失败: {e}")))?;

        let orders = self.orders.find_all(&tx)?;
        let mut resumen = ResumenTiempos {
            total_ordenes: orders.len(),
            actualizadas: 0,
            sin_cambios: 0,
        };

        for mut order in orders {
            let tiempo_nuevo =
                Order::calcular_tiempo_estimado(order.cantidad, order.std_referencia);
            let cajas_nuevo = Order::calcular_cajas_previstas(order.cantidad, order.botes_caja);

            if order.tiempo_estimado != tiempo_nuevo || order.cajas_previstas != cajas_nuevo {
                order.tiempo_estimado = tiempo_nuevo;
                order.cajas_previstas = cajas_nuevo;
                self.orders.update(&tx, &order)?;
                resumen.actualizadas += 1;
            } else {
                resumen.sin_cambios += 1;
            }
        }

        tx.commit()
            .map_err(|e| EngineError::Internal(format!("事务提交失败: {e}")))?;

        info!(
            total = resumen.total_ordenes,
            actualizadas = resumen.actualizadas,
            sin_cambios = resumen.sin_cambios,
            "派生字段重算完成"
        );
        Ok(resumen)
    }

    // ==========================================
    // 事件通知
    // ==========================================

    /// 发布订单状态变更事件 (总主题 + 单订单主题)
    ///
    /// 暂停引擎/人工收尾引擎复用 (提交后调用)
    pub fn notificar_cambio_estado(
        &self,
        order: &Order,
        estado_anterior: EstadoOrder,
        estado_nuevo: EstadoOrder,
    ) {
        let view = {
            let extra = self
                .get_conn()
                .ok()
                .and_then(|conn| self.extra.find_by_order(&conn, order.id_order).ok())
                .flatten();
            armar_view(order.clone(), extra)
        };

        let message = format!(
            "Orden {} cambió de {} a {}",
            order.cod_order, estado_anterior, estado_nuevo
        );
        let event = EventEnvelope::nuevo(EventType::OrderStateChanged, message, &view);

        self.bus.publish(TOPIC_ORDERS, event.clone());
        self.bus.publish(&topic_order_detalle(order.id_order), event);
    }

    /// 收尾路径读取订单的未关闭暂停 (供对账)
    pub fn pausa_activa(&self, id_order: i64) -> EngineResult<Option<Pause>> {
        let conn = self.get_conn()?;
        Ok(self.pauses.find_activa_by_order(&conn, id_order)?)
    }
}

// ==========================================
// 校验与组装辅助
// ==========================================

fn validar_creacion(dto: &OrderCreate) -> EngineResult<()> {
    if dto.cod_order.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "el código de orden es obligatorio".to_string(),
        ));
    }
    if dto.operario.trim().is_empty() {
        return Err(EngineError::InvalidInput("el operario es obligatorio".to_string()));
    }
    if dto.lote.trim().is_empty() {
        return Err(EngineError::InvalidInput("el lote es obligatorio".to_string()));
    }
    if dto.articulo.trim().is_empty() {
        return Err(EngineError::InvalidInput("el artículo es obligatorio".to_string()));
    }
    if dto.cantidad < 1 {
        return Err(EngineError::InvalidInput(format!(
            "la cantidad debe ser al menos 1 (recibido: {})",
            dto.cantidad
        )));
    }
    if dto.botes_caja < 1 {
        return Err(EngineError::InvalidInput(format!(
            "debe haber al menos 1 bote por caja (recibido: {})",
            dto.botes_caja
        )));
    }
    if dto.std_referencia <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "el estándar de referencia debe ser mayor que 0 (recibido: {})",
            dto.std_referencia
        )));
    }
    Ok(())
}

fn validar_finalizacion(dto: &OrderFinish) -> EngineResult<()> {
    if let Some(buenos) = dto.botes_buenos {
        if buenos < 0 {
            return Err(EngineError::InvalidInput(format!(
                "los botes buenos no pueden ser negativos (recibido: {buenos})"
            )));
        }
    }
    if let Some(malos) = dto.botes_malos {
        if malos < 0 {
            return Err(EngineError::InvalidInput(format!(
                "los botes malos no pueden ser negativos (recibido: {malos})"
            )));
        }
    }
    if let Some(cajas) = dto.total_cajas_cierre {
        if cajas < 0 {
            return Err(EngineError::InvalidInput(format!(
                "el total de cajas no puede ser negativo (recibido: {cajas})"
            )));
        }
    }
    Ok(())
}

fn armar_view(order: Order, extra: Option<ExtraData>) -> OrderView {
    OrderView {
        formato_bote: extra.as_ref().and_then(|e| e.formato_bote.clone()),
        tipo: extra.as_ref().and_then(|e| e.tipo.clone()),
        uds_bote: extra.as_ref().and_then(|e| e.uds_bote),
        order,
    }
}

fn armar_tabla(order: Order, metricas: Option<Metricas>) -> OrderTabla {
    OrderTabla {
        id_order: order.id_order,
        cod_order: order.cod_order,
        descripcion: order.descripcion,
        cantidad: order.cantidad,
        estado: order.estado,
        hora_inicio: order.hora_inicio,
        hora_fin: order.hora_fin,
        oee: metricas.as_ref().map(|m| m.oee),
        por_cump_pedido: metricas.as_ref().map(|m| m.por_cump_pedido),
    }
}
