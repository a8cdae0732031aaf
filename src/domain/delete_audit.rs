// ==========================================
// 灌装线生产执行系统 - 订单删除审计领域模型
// ==========================================
// 仅追加, 永不修改; 删除订单前必须先写入该快照
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::EstadoOrder;

// ==========================================
// OrderDeleteAudit - 删除审计快照
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDeleteAudit {
    pub id_audit: i64,
    pub id_order_deleted: i64,                     // 被删订单的原主键
    pub cod_order: String,                         // 被删订单的业务编码
    pub operario: String,                          // 被删订单的操作员
    pub lote: String,                              // 批次
    pub articulo: String,                          // 产品
    pub estado_al_eliminar: EstadoOrder,           // 删除时的状态
    pub fecha_creacion_order: NaiveDateTime,       // 订单原创建时间
    pub cantidad: i64,                             // 目标产量
    pub botes_buenos: Option<i64>,                 // 删除时的合格瓶数
    pub botes_malos: Option<i64>,                  // 删除时的不合格瓶数
    pub deleted_by: String,                        // 执行删除的用户
    pub motivo: Option<String>,                    // 删除原因
    pub deleted_at: NaiveDateTime,                 // 删除时间
    pub ip_address: Option<String>,                // 来源 IP
}
