// ==========================================
// 灌装线生产执行系统 - 引擎层错误类型
// ==========================================
// 对外暴露六类错误, 每类对应稳定错误码
// 消息使用现场语言 (西语), 描述被违反的约束与观测值
// ==========================================

use thiserror::Error;

use crate::repository::error::RepositoryError;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{entity} no encontrada: {id}")]
    NotFound { entity: String, id: String },

    #[error("ya existe una orden con el código: {0}")]
    AlreadyExists(String),

    #[error("entrada inválida: {0}")]
    InvalidInput(String),

    #[error("estado inválido para esta operación: {0}")]
    InvalidState(String),

    #[error("conflicto de concurrencia: {0}")]
    Conflict(String),

    #[error("error interno: {0}")]
    Internal(String),
}

impl EngineError {
    /// 错误种类的稳定错误码 (供外层接口映射)
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::InvalidState(_) => "INVALID_STATE",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    /// 订单未找到的便捷构造
    pub fn order_no_encontrada(id_order: i64) -> Self {
        EngineError::NotFound {
            entity: "Orden".to_string(),
            id: id_order.to_string(),
        }
    }
}

// 存储失败统一折叠为 Internal; 唯一约束冲突映射为 AlreadyExists
impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::UniqueConstraintViolation(msg) => EngineError::AlreadyExists(msg),
            RepositoryError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            otro => EngineError::Internal(otro.to_string()),
        }
    }
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_estables() {
        assert_eq!(EngineError::order_no_encontrada(7).code(), "NOT_FOUND");
        assert_eq!(EngineError::AlreadyExists("OF-1".into()).code(), "ALREADY_EXISTS");
        assert_eq!(EngineError::InvalidInput("x".into()).code(), "INVALID_INPUT");
        assert_eq!(EngineError::InvalidState("x".into()).code(), "INVALID_STATE");
        assert_eq!(EngineError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(EngineError::Internal("x".into()).code(), "INTERNAL");
    }

    #[test]
    fn test_from_repository_unique() {
        let repo_err = RepositoryError::UniqueConstraintViolation("cod_order".into());
        assert_eq!(EngineError::from(repo_err).code(), "ALREADY_EXISTS");

        let repo_err = RepositoryError::QueryError("disk".into());
        assert_eq!(EngineError::from(repo_err).code(), "INTERNAL");
    }
}
