// ==========================================
// 灌装线生产执行系统 - 人工收尾领域模型
// ==========================================
// 覆盖 ESPERA_MANUAL → PROCESO_MANUAL → FINALIZADA 阶段
// 每订单最多一行; hora_fin 为空表示进行中
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Acumula - 人工收尾记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acumula {
    pub id_acumula: i64,
    pub id_order: i64,                   // 所属订单 (唯一)
    pub hora_inicio: NaiveDateTime,      // 人工阶段开始
    pub hora_fin: Option<NaiveDateTime>, // 人工阶段结束
    pub tiempo_total: Option<f64>,       // 总时长 (分钟, 结束时计算)
    pub num_cajas_manual: i64,           // 人工处理箱数 (≥0)
}

impl Acumula {
    /// 判断人工阶段是否进行中
    pub fn en_proceso(&self) -> bool {
        self.hora_fin.is_none()
    }
}
