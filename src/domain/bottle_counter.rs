// ==========================================
// 灌装线生产执行系统 - 瓶计数器领域模型
// ==========================================
// 与订单 1:1; 同一提交状态下全表最多一个 is_active = true
// quantity 在同一订单持续计数期间单调递增
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// BottleCounter - 瓶计数器
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BottleCounter {
    pub id: i64,
    pub id_order: i64,                                // 所属订单 (唯一)
    pub quantity: i64,                                // 当前计数 (≥0)
    pub is_active: bool,                              // 是否在接收脉冲
    pub created_at: NaiveDateTime,                    // 创建时间
    pub last_updated: NaiveDateTime,                  // 最后写入时间
    pub last_bottle_counted_at: Option<NaiveDateTime>, // 最后一次计数时间
}
