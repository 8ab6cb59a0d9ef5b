//! bgtransfer: 后台传输任务注册表与事件协调引擎
//!
//! 真正的下载/上传由外部引擎（操作系统的后台传输服务）完成。这个库负责
//! 记录 id 到任务的映射，把引擎事件路由到任务的回调，并在进程重启后
//! 根据引擎的枚举结果重建任务表。

pub mod cli;
pub mod config;
pub mod core;
pub mod simulator;
pub mod ui;
pub mod utils;

pub use crate::config::{ConfigStore, ConfigUpdate, ConfigWarning, TransferConfig};
pub use crate::core::{
    BackgroundTransfer, BridgeError, BridgeResult, DownloadOptions, EngineError, EngineEvent, Task, TaskKind,
    TaskState, TransferEngine, UploadOptions,
};
pub use crate::simulator::SimulatedEngine;
