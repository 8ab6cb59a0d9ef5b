//! 外部传输引擎接口
//!
//! 真正的网络 I/O、重试、落盘与系统调度都在引擎内部完成，这里只描述
//! 桥接层会调用的请求，以及引擎枚举已有任务时返回的记录格式。

use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::error::EngineError;
use super::task::TaskKind;
use super::task::messages::number_as_u64;

/// 引擎原生状态码（与 NSURLSessionTaskState 数值一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    Running,
    Suspended,
    Canceling,
    Completed,
    Unknown(i64),
}

impl NativeStatus {
    pub const RUNNING: i64 = 0;
    pub const SUSPENDED: i64 = 1;
    pub const CANCELING: i64 = 2;
    pub const COMPLETED: i64 = 3;

    pub fn from_code(code: i64) -> Self {
        match code {
            Self::RUNNING => NativeStatus::Running,
            Self::SUSPENDED => NativeStatus::Suspended,
            Self::CANCELING => NativeStatus::Canceling,
            Self::COMPLETED => NativeStatus::Completed,
            other => NativeStatus::Unknown(other),
        }
    }
}

/// 引擎枚举返回的任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(rename = "state")]
    pub native_status: i64,
    #[serde(default, deserialize_with = "number_as_u64")]
    pub bytes: u64,
    #[serde(default, deserialize_with = "number_as_u64")]
    pub bytes_total: u64,
    /// 对象，或者创建时写入的 JSON 字符串
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TaskRecord {
    pub fn status(&self) -> NativeStatus {
        NativeStatus::from_code(self.native_status)
    }
}

/// 创建传输的请求，由门面在调用时根据当前配置快照组装
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub url: String,
    /// 下载为目标路径，上传为源文件路径
    pub local_path: String,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub metadata: String,
    pub progress_interval_ms: u64,
    pub is_allowed_over_roaming: bool,
    pub is_allowed_over_metered: bool,
    pub is_notification_visible: bool,
    pub notification_title: Option<String>,
}

/// 外部传输引擎
///
/// 所有方法都是异步请求；失败只代表请求本身没有送达或被拒绝。
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// 枚举引擎当前知道的所有任务，可能包含上一个进程创建的任务
    async fn enumerate_existing_tasks(&self) -> Result<Vec<TaskRecord>, EngineError>;

    async fn create_transfer(&self, request: TransferRequest) -> Result<(), EngineError>;

    async fn pause(&self, id: &str) -> Result<(), EngineError>;

    async fn resume(&self, id: &str) -> Result<(), EngineError>;

    async fn cancel(&self, id: &str) -> Result<(), EngineError>;

    /// 完成握手，告诉引擎这条终止事件已经处理完
    async fn acknowledge_completion(&self, id: &str) -> Result<(), EngineError>;

    /// 引擎提供的文档目录
    fn documents_directory(&self) -> Option<PathBuf> {
        None
    }
}
