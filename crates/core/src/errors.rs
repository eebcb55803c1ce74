use thiserror::Error;

/// 错误类别
///
/// 对外协作方（REST 或其他 RPC 传输层）只需要按类别映射错误，
/// 具体变体携带的上下文用于日志与提示信息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvalidState,
    RunFailure,
    ClusterDivergence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::RunFailure => "RUN_FAILURE",
            ErrorKind::ClusterDivergence => "CLUSTER_DIVERGENCE",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// 系统错误类型定义
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("校验失败: {0}")]
    Validation(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("协议(agreement)未找到: {name}")]
    AgreementNotFound { name: String },

    #[error("成员未找到: {name}")]
    MemberNotFound { name: String },

    #[error("插件未找到: {key}")]
    PluginNotFound { key: String },

    #[error("冲突: {0}")]
    Conflict(String),

    #[error("任务 {id} 处于 {state} 状态，无法执行 {operation}")]
    InvalidState {
        id: String,
        state: String,
        operation: String,
    },

    #[error("任务执行失败: {0}")]
    RunFailure(String),

    #[error("集群视图分歧: {0}")]
    ClusterDivergence(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PulseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PulseError::Validation(_) | PulseError::InvalidCron { .. } => ErrorKind::Validation,
            PulseError::TaskNotFound { .. }
            | PulseError::AgreementNotFound { .. }
            | PulseError::MemberNotFound { .. }
            | PulseError::PluginNotFound { .. } => ErrorKind::NotFound,
            PulseError::Conflict(_) => ErrorKind::Conflict,
            PulseError::InvalidState { .. } => ErrorKind::InvalidState,
            PulseError::RunFailure(_) => ErrorKind::RunFailure,
            PulseError::ClusterDivergence(_) => ErrorKind::ClusterDivergence,
            PulseError::Configuration(_)
            | PulseError::Serialization(_)
            | PulseError::Storage(_)
            | PulseError::Network(_)
            | PulseError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PulseError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        PulseError::Conflict(message.into())
    }

    pub fn task_not_found(id: impl ToString) -> Self {
        PulseError::TaskNotFound { id: id.to_string() }
    }

    pub fn invalid_state(id: impl ToString, state: impl ToString, operation: &str) -> Self {
        PulseError::InvalidState {
            id: id.to_string(),
            state: state.to_string(),
            operation: operation.to_string(),
        }
    }

    /// 网络类错误允许在传输层内部重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, PulseError::Network(_))
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(e: serde_json::Error) -> Self {
        PulseError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for PulseError {
    fn from(e: std::io::Error) -> Self {
        PulseError::Storage(e.to_string())
    }
}

/// 统一的Result类型
pub type PulseResult<T> = std::result::Result<T, PulseError>;
