// ==========================================
// 灌装线生产执行系统 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 订单状态 (Estado de Orden)
// ==========================================
// 状态流:
//   CREADA → EN_PROCESO ↔ PAUSADA
//                ↓
//           FINALIZADA (不需人工收尾)
//                ó
//           ESPERA_MANUAL → PROCESO_MANUAL → FINALIZADA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstadoOrder {
    Creada,        // 已创建, 未开始生产
    EnProceso,     // 产线生产中
    Pausada,       // 暂停中
    Finalizada,    // 终态
    EsperaManual,  // 自动生产结束, 等待人工收尾
    ProcesoManual, // 人工收尾进行中
}

impl EstadoOrder {
    /// 所有状态 (用于统计)
    pub const TODOS: [EstadoOrder; 6] = [
        EstadoOrder::Creada,
        EstadoOrder::EnProceso,
        EstadoOrder::Pausada,
        EstadoOrder::Finalizada,
        EstadoOrder::EsperaManual,
        EstadoOrder::ProcesoManual,
    ];

    /// 判断是否为活动状态 (EN_PROCESO / PAUSADA)
    pub fn es_activo(&self) -> bool {
        matches!(self, EstadoOrder::EnProceso | EstadoOrder::Pausada)
    }

    /// 判断是否为关闭状态 (指标可重算的状态)
    pub fn es_cerrado(&self) -> bool {
        matches!(
            self,
            EstadoOrder::Finalizada | EstadoOrder::EsperaManual | EstadoOrder::ProcesoManual
        )
    }

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "CREADA" => Some(EstadoOrder::Creada),
            "EN_PROCESO" => Some(EstadoOrder::EnProceso),
            "PAUSADA" => Some(EstadoOrder::Pausada),
            "FINALIZADA" => Some(EstadoOrder::Finalizada),
            "ESPERA_MANUAL" => Some(EstadoOrder::EsperaManual),
            "PROCESO_MANUAL" => Some(EstadoOrder::ProcesoManual),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EstadoOrder::Creada => "CREADA",
            EstadoOrder::EnProceso => "EN_PROCESO",
            EstadoOrder::Pausada => "PAUSADA",
            EstadoOrder::Finalizada => "FINALIZADA",
            EstadoOrder::EsperaManual => "ESPERA_MANUAL",
            EstadoOrder::ProcesoManual => "PROCESO_MANUAL",
        }
    }
}

impl fmt::Display for EstadoOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 暂停类型 (Tipo de Pausa)
// ==========================================
// 封闭集合, 名称稳定 (与现场操作界面一致)
// 不可计入子集: CAMBIO_TURNO / FABRICACION_PARCIAL / PARADA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TipoPausa {
    // ===== 机器事故 =====
    IncidenciaMaquinaContadora,
    IncidenciaMaquinaPesadora,
    IncidenciaMaquinaEtiquetadora,
    IncidenciaMaquinaRepercap,
    IncidenciaMaquinaTaponadora,
    IncidenciaMaquinaPosicionadora,
    IncidenciaMaquinaEnvasadora,
    IncidenciaMaquinaOtros,

    // ===== 物料问题 =====
    FaltaMaterial,
    MaterialDefectuoso,

    // ===== 维护与清洁 =====
    MantenimientoEnProceso,
    LimpiezaEnProceso,

    // ===== 质量 =====
    ParadaCalidad,

    // ===== 现场信号自动检测 =====
    AveriaPonderal,
    AveriaEtiqueta,

    // ===== 不可计入 =====
    CambioTurno,
    FabricacionParcial,
    Parada,
}

impl TipoPausa {
    /// 判断该类型是否计入生产指标
    ///
    /// 未来新增的类型默认计入
    pub fn computa(&self) -> bool {
        !matches!(
            self,
            TipoPausa::CambioTurno | TipoPausa::FabricacionParcial | TipoPausa::Parada
        )
    }

    /// 判断是否为机器事故类
    pub fn es_incidencia_maquina(&self) -> bool {
        self.to_db_str().starts_with("INCIDENCIA_MAQUINA_")
    }

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "INCIDENCIA_MAQUINA_CONTADORA" => Some(TipoPausa::IncidenciaMaquinaContadora),
            "INCIDENCIA_MAQUINA_PESADORA" => Some(TipoPausa::IncidenciaMaquinaPesadora),
            "INCIDENCIA_MAQUINA_ETIQUETADORA" => Some(TipoPausa::IncidenciaMaquinaEtiquetadora),
            "INCIDENCIA_MAQUINA_REPERCAP" => Some(TipoPausa::IncidenciaMaquinaRepercap),
            "INCIDENCIA_MAQUINA_TAPONADORA" => Some(TipoPausa::IncidenciaMaquinaTaponadora),
            "INCIDENCIA_MAQUINA_POSICIONADORA" => Some(TipoPausa::IncidenciaMaquinaPosicionadora),
            "INCIDENCIA_MAQUINA_ENVASADORA" => Some(TipoPausa::IncidenciaMaquinaEnvasadora),
            "INCIDENCIA_MAQUINA_OTROS" => Some(TipoPausa::IncidenciaMaquinaOtros),
            "FALTA_MATERIAL" => Some(TipoPausa::FaltaMaterial),
            "MATERIAL_DEFECTUOSO" => Some(TipoPausa::MaterialDefectuoso),
            "MANTENIMIENTO_EN_PROCESO" => Some(TipoPausa::MantenimientoEnProceso),
            "LIMPIEZA_EN_PROCESO" => Some(TipoPausa::LimpiezaEnProceso),
            "PARADA_CALIDAD" => Some(TipoPausa::ParadaCalidad),
            "AVERIA_PONDERAL" => Some(TipoPausa::AveriaPonderal),
            "AVERIA_ETIQUETA" => Some(TipoPausa::AveriaEtiqueta),
            "CAMBIO_TURNO" => Some(TipoPausa::CambioTurno),
            "FABRICACION_PARCIAL" => Some(TipoPausa::FabricacionParcial),
            "PARADA" => Some(TipoPausa::Parada),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            TipoPausa::IncidenciaMaquinaContadora => "INCIDENCIA_MAQUINA_CONTADORA",
            TipoPausa::IncidenciaMaquinaPesadora => "INCIDENCIA_MAQUINA_PESADORA",
            TipoPausa::IncidenciaMaquinaEtiquetadora => "INCIDENCIA_MAQUINA_ETIQUETADORA",
            TipoPausa::IncidenciaMaquinaRepercap => "INCIDENCIA_MAQUINA_REPERCAP",
            TipoPausa::IncidenciaMaquinaTaponadora => "INCIDENCIA_MAQUINA_TAPONADORA",
            TipoPausa::IncidenciaMaquinaPosicionadora => "INCIDENCIA_MAQUINA_POSICIONADORA",
            TipoPausa::IncidenciaMaquinaEnvasadora => "INCIDENCIA_MAQUINA_ENVASADORA",
            TipoPausa::IncidenciaMaquinaOtros => "INCIDENCIA_MAQUINA_OTROS",
            TipoPausa::FaltaMaterial => "FALTA_MATERIAL",
            TipoPausa::MaterialDefectuoso => "MATERIAL_DEFECTUOSO",
            TipoPausa::MantenimientoEnProceso => "MANTENIMIENTO_EN_PROCESO",
            TipoPausa::LimpiezaEnProceso => "LIMPIEZA_EN_PROCESO",
            TipoPausa::ParadaCalidad => "PARADA_CALIDAD",
            TipoPausa::AveriaPonderal => "AVERIA_PONDERAL",
            TipoPausa::AveriaEtiqueta => "AVERIA_ETIQUETA",
            TipoPausa::CambioTurno => "CAMBIO_TURNO",
            TipoPausa::FabricacionParcial => "FABRICACION_PARCIAL",
            TipoPausa::Parada => "PARADA",
        }
    }
}

impl fmt::Display for TipoPausa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estado_roundtrip() {
        for estado in EstadoOrder::TODOS {
            assert_eq!(EstadoOrder::from_db_str(estado.to_db_str()), Some(estado));
        }
        assert_eq!(EstadoOrder::from_db_str("DESCONOCIDO"), None);
    }

    #[test]
    fn test_estado_es_activo() {
        assert!(EstadoOrder::EnProceso.es_activo());
        assert!(EstadoOrder::Pausada.es_activo());
        assert!(!EstadoOrder::Creada.es_activo());
        assert!(!EstadoOrder::Finalizada.es_activo());
    }

    #[test]
    fn test_tipo_computa() {
        assert!(!TipoPausa::CambioTurno.computa());
        assert!(!TipoPausa::FabricacionParcial.computa());
        assert!(!TipoPausa::Parada.computa());

        assert!(TipoPausa::FaltaMaterial.computa());
        assert!(TipoPausa::AveriaPonderal.computa());
        assert!(TipoPausa::ParadaCalidad.computa());
        assert!(TipoPausa::IncidenciaMaquinaContadora.computa());
    }

    #[test]
    fn test_tipo_incidencia_maquina() {
        assert!(TipoPausa::IncidenciaMaquinaPesadora.es_incidencia_maquina());
        assert!(!TipoPausa::FaltaMaterial.es_incidencia_maquina());
    }

    #[test]
    fn test_tipo_roundtrip() {
        let tipos = [
            TipoPausa::IncidenciaMaquinaContadora,
            TipoPausa::FaltaMaterial,
            TipoPausa::AveriaPonderal,
            TipoPausa::AveriaEtiqueta,
            TipoPausa::CambioTurno,
            TipoPausa::FabricacionParcial,
            TipoPausa::Parada,
        ];
        for tipo in tipos {
            assert_eq!(TipoPausa::from_db_str(tipo.to_db_str()), Some(tipo));
        }
    }
}
