use serde::{Serialize, Deserialize};
use std::fmt;

/// 传输任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Processing,
    Paused,
    Done,
    Failed,
    Stopped,
}

impl TaskState {
    /// Done / Failed / Stopped 之后不再接受任何迁移
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Processing => "PROCESSING",
            TaskState::Paused => "PAUSED",
            TaskState::Done => "DONE",
            TaskState::Failed => "FAILED",
            TaskState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务类型，创建后不可变
///
/// 序列化为引擎使用的整数编码：0 下载，1 上传。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskKind {
    Download,
    Upload,
}

impl TaskKind {
    /// 事件名前缀
    pub fn event_prefix(self) -> &'static str {
        match self {
            TaskKind::Download => "download",
            TaskKind::Upload => "upload",
        }
    }
}

impl From<TaskKind> for u8 {
    fn from(kind: TaskKind) -> u8 {
        match kind {
            TaskKind::Download => 0,
            TaskKind::Upload => 1,
        }
    }
}

impl TryFrom<u8> for TaskKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TaskKind::Download),
            1 => Ok(TaskKind::Upload),
            other => Err(format!("未知的任务类型编码: {}", other)),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Stopped.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Processing.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(serde_json::to_string(&TaskKind::Upload).unwrap(), "1");
        let kind: TaskKind = serde_json::from_str("0").unwrap();
        assert_eq!(kind, TaskKind::Download);
        assert!(serde_json::from_str::<TaskKind>("7").is_err());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&TaskState::Processing).unwrap(), "\"PROCESSING\"");
        assert_eq!(TaskState::Paused.to_string(), "PAUSED");
    }
}
