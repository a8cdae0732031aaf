// ==========================================
// 灌装线生产执行系统 - 生产订单领域模型
// ==========================================
// 派生字段: cajas_previstas = cantidad / botes_caja
//           tiempo_estimado = cantidad / std_referencia (分钟)
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::EstadoOrder;

// ==========================================
// Order - 生产订单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id_order: i64,                        // 技术主键
    pub hora_creacion: NaiveDateTime,         // 创建时间 (不可变)
    pub hora_inicio: Option<NaiveDateTime>,   // 开始生产时间 (CREADA → EN_PROCESO 时写入)
    pub hora_fin: Option<NaiveDateTime>,      // 结束时间 (finalizar 时写入, 之后不可变)
    pub operario: String,                     // 责任操作员
    pub cod_order: String,                    // 业务唯一编码 (例: "OF-2024-001")
    pub lote: String,                         // 批次号
    pub articulo: String,                     // 产品编码
    pub descripcion: Option<String>,          // 描述
    pub estado: EstadoOrder,                  // 生命周期状态
    pub cantidad: i64,                        // 目标产量 (瓶)
    pub botes_caja: i64,                      // 每箱瓶数 (≥1)
    pub repercap: bool,                       // 瓶盖返工标志
    pub botes_buenos: Option<i64>,            // 合格瓶数 (收尾时写入)
    pub botes_malos: Option<i64>,             // 不合格瓶数 (收尾时写入)
    pub cajas_previstas: f64,                 // 预计箱数 (派生)
    pub total_cajas_cierre: Option<i64>,      // 收尾实际箱数
    pub acumula: bool,                        // 是否需要人工收尾阶段
    pub std_referencia: f64,                  // 参考标准产能 (瓶/分钟, >0)
    pub tiempo_estimado: f64,                 // 预计耗时 (分钟, 派生)
}

impl Order {
    /// 计算预计箱数
    pub fn calcular_cajas_previstas(cantidad: i64, botes_caja: i64) -> f64 {
        if botes_caja <= 0 {
            return 0.0;
        }
        cantidad as f64 / botes_caja as f64
    }

    /// 计算预计耗时 (分钟)
    ///
    /// std_referencia 单位为 瓶/分钟, 因此是除法
    pub fn calcular_tiempo_estimado(cantidad: i64, std_referencia: f64) -> f64 {
        if std_referencia <= 0.0 {
            return 0.0;
        }
        cantidad as f64 / std_referencia
    }

    /// 判断订单是否处于活动状态
    pub fn es_activa(&self) -> bool {
        self.estado.es_activo()
    }
}

// ==========================================
// ExtraData - 订单附加数据 (1:1 侧表)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraData {
    pub id_extra_data: i64,
    pub id_order: i64,
    pub formato_bote: Option<String>, // 瓶型 (例: "500ml")
    pub tipo: Option<String>,         // 产品类型 (例: "Conserva")
    pub uds_bote: Option<i64>,        // 每瓶单位数
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cajas_previstas() {
        assert_eq!(Order::calcular_cajas_previstas(1000, 10), 100.0);
        assert_eq!(Order::calcular_cajas_previstas(1000, 24), 1000.0 / 24.0);
        assert_eq!(Order::calcular_cajas_previstas(1000, 0), 0.0);
    }

    #[test]
    fn test_tiempo_estimado() {
        assert_eq!(Order::calcular_tiempo_estimado(1000, 20.0), 50.0);
        assert_eq!(Order::calcular_tiempo_estimado(1000, 0.0), 0.0);
    }
}
