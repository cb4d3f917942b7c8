//! 批量变更引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("规则校验失败: {}", .0.join("; "))]
    RuleValidation(Vec<String>),

    #[error("无法解析目标表: {0}")]
    TableResolution(String),

    #[error("表达式求值失败 '{expression}': {message}")]
    ExpressionEvaluation { expression: String, message: String },

    #[error("数据存储错误: {0}")]
    Datastore(String),

    #[error("执行记录未找到: {0}")]
    RollbackNotFound(String),

    #[error("执行记录不可回滚: {execution_id} (状态 {state})")]
    RollbackNotAllowed { execution_id: String, state: String },

    #[error("记录已被并发修改: {table} key={key}")]
    ConcurrentModification { table: String, key: String },

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("无效的标识符: {0}")]
    InvalidIdentifier(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::RuleValidation(_) => "RULE_VALIDATION_ERROR",
            Self::TableResolution(_) => "TABLE_RESOLUTION_ERROR",
            Self::ExpressionEvaluation { .. } => "EXPRESSION_EVALUATION_ERROR",
            Self::Datastore(_) => "DATASTORE_ERROR",
            Self::RollbackNotFound(_) => "ROLLBACK_NOT_FOUND",
            Self::RollbackNotAllowed { .. } => "ROLLBACK_NOT_ALLOWED",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }

    pub(crate) fn expression(expression: &str, message: impl Into<String>) -> Self {
        Self::ExpressionEvaluation {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Datastore(err.to_string())
    }
}
