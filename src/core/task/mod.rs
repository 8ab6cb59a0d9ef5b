//! `task` 模块包含单个传输任务相关的全部逻辑
//!
//! 主要包括：
//! - `handle`: 任务句柄 `Task` 与状态迁移
//! - `state`: 任务状态 `TaskState` 与类型 `TaskKind`
//! - `messages`: 回调收到的事件负载
//! - `handlers`: 每个生命周期阶段的回调槽位

pub mod handle;
pub mod state;
pub mod messages;
pub mod handlers;

pub use handle::{Task, TaskSnapshot};
pub use state::{TaskKind, TaskState};
pub use messages::{BeginInfo, ProgressInfo, DoneInfo, ErrorInfo};
pub use handlers::{AnyHandler, HandlerPhase, Handlers};
