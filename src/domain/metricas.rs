// ==========================================
// 灌装线生产执行系统 - 生产指标领域模型
// ==========================================
// 每订单最多一行, 订单首次离开 EN_PROCESO 时写入, 此后不可变
// (仅显式的 recalcular 操作允许删除重建)
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// Metricas - 生产指标快照 (OEE)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metricas {
    pub id_metricas: i64,
    pub id_order: i64,          // 所属订单 (唯一)
    pub tiempo_total: f64,      // 毛时长 - 不可计入暂停 (分钟)
    pub tiempo_pausado: f64,    // 可计入暂停之和 (分钟)
    pub tiempo_activo: f64,     // tiempo_total - tiempo_pausado (下限 1 分钟)
    pub disponibilidad: f64,    // tiempo_activo / tiempo_total
    pub rendimiento: f64,       // 实际产量 / 预期产量
    pub calidad: f64,           // 合格瓶数 / 总产量
    pub oee: f64,               // disponibilidad × rendimiento × calidad
    pub std_real: f64,          // 总产量 / tiempo_activo (瓶/分钟)
    pub por_cump_pedido: f64,   // 合格瓶数 / 订单数量 (>1 表示超产)
}
