use thiserror::Error;
use std::io;

/// 外部传输引擎调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("传输引擎不可用: {0}")]
    Unavailable(String),

    #[error("传输引擎拒绝了任务 {id}: {reason}")]
    Rejected {
        id: String,
        reason: String,
    },

    #[error("传输引擎中不存在任务: {0}")]
    UnknownTask(String),
}

/// 同步抛给调用方的错误
///
/// 传输过程本身的失败不会出现在这里，它们只通过任务的 error 回调送达。
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("参数无效: {0}")]
    InvalidArgument(String),

    #[error("回调无效: 期望 {expected} 回调, 实际为 {got}")]
    InvalidHandler {
        expected: &'static str,
        got: &'static str,
    },

    #[error("事件流已经订阅过，每个进程只允许订阅一次")]
    AlreadySubscribed,

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("引擎错误: {0}")]
    Engine(#[from] EngineError),
}

impl BridgeError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::Config(msg.into())
    }

    /// 是否属于调用方输入问题（同步校验失败）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidArgument(_) | BridgeError::InvalidHandler { .. }
        )
    }
}

/// 协调与事件分发过程中的非致命问题，只记日志，不向调用方传播
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconciliationWarning {
    #[error("任务 {id} 的元数据无法解析: {reason}")]
    MalformedMetadata {
        id: String,
        reason: String,
    },

    #[error("收到未知任务的事件: {event} (id: {id})")]
    UnknownTask {
        event: &'static str,
        id: String,
    },

    #[error("事件 {event} 的负载格式错误: {reason}")]
    MalformedEvent {
        event: String,
        reason: String,
    },

    #[error("任务 {id} 的原生状态码未知: {code}")]
    UnknownNativeStatus {
        id: String,
        code: i64,
    },

    #[error("唤醒任务 {id} 失败: {source}")]
    KickFailed {
        id: String,
        source: EngineError,
    },
}

pub type BridgeResult<T> = Result<T, BridgeError>;
