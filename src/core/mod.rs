//! Core: 任务注册表、事件路由、重启协调与对外门面

pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod task;

pub use engine::{NativeStatus, TaskRecord, TransferEngine, TransferRequest};
pub use error::{BridgeError, BridgeResult, EngineError, ReconciliationWarning};
pub use events::{EngineEvent, ProgressEntry};
pub use manager::{BackgroundTransfer, Directories, DownloadOptions, UploadOptions};
pub use reconcile::Reconciler;
pub use registry::TaskRegistry;
pub use router::EventRouter;
pub use task::{Task, TaskKind, TaskSnapshot, TaskState};
