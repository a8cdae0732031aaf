// ==========================================
// 灌装线生产执行系统 - 暂停领域模型
// ==========================================
// 两段式暂停: 创建时 tipo 可为空 (模式2), 关闭时必须补齐
// 不变量: 每订单同一时刻最多一条未关闭暂停
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::TipoPausa;

// ==========================================
// Pause - 生产暂停
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pause {
    pub id_pausa: i64,
    pub id_order: i64,                       // 所属订单
    pub tipo: Option<TipoPausa>,             // 类型 (两段式: 创建时可为空)
    pub descripcion: Option<String>,         // 原因描述
    pub operario: Option<String>,            // 登记操作员
    pub computa: Option<bool>,               // 是否计入指标 (由 tipo 派生)
    pub hora_inicio: NaiveDateTime,          // 暂停开始
    pub hora_fin: Option<NaiveDateTime>,     // 暂停结束 (为空表示进行中)
    pub tiempo_total_pausa: Option<f64>,     // 总时长 (分钟, 关闭时计算)
}

impl Pause {
    /// 判断暂停是否仍在进行
    pub fn es_activa(&self) -> bool {
        self.hora_fin.is_none()
    }
}
