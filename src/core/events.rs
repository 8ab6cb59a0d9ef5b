//! 引擎发出的生命周期事件
//!
//! 下载与上传各有一套事件名，负载形状相同。引擎原始事件是
//! 事件名 + JSON 负载，`EngineEvent::from_raw` 负责把它转成强类型事件。

use log::warn;
use serde::{Serialize, Deserialize};

use super::error::ReconciliationWarning;
use super::task::{TaskKind, BeginInfo, ProgressInfo, DoneInfo, ErrorInfo};
use super::task::messages::number_as_u64;

pub const DOWNLOAD_BEGIN: &str = "downloadBegin";
pub const DOWNLOAD_PROGRESS: &str = "downloadProgress";
pub const DOWNLOAD_COMPLETE: &str = "downloadComplete";
pub const DOWNLOAD_FAILED: &str = "downloadFailed";
pub const UPLOAD_BEGIN: &str = "uploadBegin";
pub const UPLOAD_PROGRESS: &str = "uploadProgress";
pub const UPLOAD_COMPLETE: &str = "uploadComplete";
pub const UPLOAD_FAILED: &str = "uploadFailed";

/// 批量进度中的一条
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    #[serde(alias = "taskId")]
    pub id: String,
    #[serde(deserialize_with = "number_as_u64")]
    pub bytes: u64,
    #[serde(deserialize_with = "number_as_u64")]
    pub bytes_total: u64,
}

impl ProgressEntry {
    pub fn info(&self) -> ProgressInfo {
        ProgressInfo { bytes: self.bytes, bytes_total: self.bytes_total }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Begin { kind: TaskKind, id: String, info: BeginInfo },
    /// 引擎可能一次上报多个任务的进度
    Progress { kind: TaskKind, entries: Vec<ProgressEntry> },
    Done { kind: TaskKind, id: String, info: DoneInfo },
    Error { kind: TaskKind, id: String, info: ErrorInfo },
}

/// 解析结果，附带被跳过的格式错误条目数
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub event: EngineEvent,
    pub malformed_entries: usize,
}

impl EngineEvent {
    pub fn kind(&self) -> TaskKind {
        match self {
            EngineEvent::Begin { kind, .. }
            | EngineEvent::Progress { kind, .. }
            | EngineEvent::Done { kind, .. }
            | EngineEvent::Error { kind, .. } => *kind,
        }
    }

    /// 引擎使用的事件名
    pub fn name(&self) -> &'static str {
        match (self, self.kind()) {
            (EngineEvent::Begin { .. }, TaskKind::Download) => DOWNLOAD_BEGIN,
            (EngineEvent::Begin { .. }, TaskKind::Upload) => UPLOAD_BEGIN,
            (EngineEvent::Progress { .. }, TaskKind::Download) => DOWNLOAD_PROGRESS,
            (EngineEvent::Progress { .. }, TaskKind::Upload) => UPLOAD_PROGRESS,
            (EngineEvent::Done { .. }, TaskKind::Download) => DOWNLOAD_COMPLETE,
            (EngineEvent::Done { .. }, TaskKind::Upload) => UPLOAD_COMPLETE,
            (EngineEvent::Error { .. }, TaskKind::Download) => DOWNLOAD_FAILED,
            (EngineEvent::Error { .. }, TaskKind::Upload) => UPLOAD_FAILED,
        }
    }

    /// 终止事件（完成或失败）之后需要向引擎确认并清理注册表
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Done { .. } | EngineEvent::Error { .. })
    }

    /// 从事件名和 JSON 负载解析
    ///
    /// 批量进度里格式错误的条目会被单独跳过，不影响其余条目。
    pub fn from_raw(name: &str, payload: &serde_json::Value) -> Result<RawEvent, ReconciliationWarning> {
        let malformed = |reason: String| ReconciliationWarning::MalformedEvent {
            event: name.to_string(),
            reason,
        };

        let (kind, phase) = match name {
            DOWNLOAD_BEGIN => (TaskKind::Download, "begin"),
            DOWNLOAD_PROGRESS => (TaskKind::Download, "progress"),
            DOWNLOAD_COMPLETE => (TaskKind::Download, "done"),
            DOWNLOAD_FAILED => (TaskKind::Download, "error"),
            UPLOAD_BEGIN => (TaskKind::Upload, "begin"),
            UPLOAD_PROGRESS => (TaskKind::Upload, "progress"),
            UPLOAD_COMPLETE => (TaskKind::Upload, "done"),
            UPLOAD_FAILED => (TaskKind::Upload, "error"),
            _ => return Err(malformed("未知的事件名".to_string())),
        };

        if phase == "progress" {
            let items = payload
                .as_array()
                .ok_or_else(|| malformed("批量进度应为数组".to_string()))?;
            let mut entries = Vec::with_capacity(items.len());
            let mut malformed_entries = 0;
            for item in items {
                match serde_json::from_value::<ProgressEntry>(item.clone()) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        malformed_entries += 1;
                        warn!("{}", malformed(format!("跳过进度条目 {}: {}", item, e)));
                    }
                }
            }
            return Ok(RawEvent {
                event: EngineEvent::Progress { kind, entries },
                malformed_entries,
            });
        }

        let id = payload
            .get("id")
            .or_else(|| payload.get("taskId"))
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| malformed("缺少任务 id".to_string()))?
            .to_string();

        let event = match phase {
            "begin" => EngineEvent::Begin {
                kind,
                id,
                info: serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?,
            },
            "done" => EngineEvent::Done {
                kind,
                id,
                info: serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?,
            },
            _ => EngineEvent::Error {
                kind,
                id,
                info: serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?,
            },
        };
        Ok(RawEvent { event, malformed_entries: 0 })
    }
}
