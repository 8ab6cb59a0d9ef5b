use log::{debug, warn};
use serde::{Serialize, Deserialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::engine::TransferEngine;
use crate::core::error::{BridgeResult, EngineError};
use super::handlers::{AnyHandler, HandlerPhase, Handlers};
use super::messages::{BeginInfo, ProgressInfo, DoneInfo, ErrorInfo};
use super::state::{TaskKind, TaskState};

/// 任务的可序列化快照，用于展示和调试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub state: TaskState,
    pub bytes: u64,
    pub bytes_total: Option<u64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    state: TaskState,
    bytes: u64,
    bytes_total: Option<u64>,
}

struct TaskInner {
    id: String,
    kind: TaskKind,
    metadata: serde_json::Value,
    counters: Mutex<Counters>,
    // 协调重建出的任务与旧任务共用同一组槽位
    handlers: Arc<Mutex<Handlers>>,
    engine: Arc<dyn TransferEngine>,
}

/// 单个传输的句柄
///
/// 克隆得到的是同一个任务。注册表与应用代码持有的是同一份状态，
/// 引擎事件经 `EventRouter` 落到这里，再转给已注册的回调。
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Task {
    /// 本地创建的任务，初始为 Pending
    pub(crate) fn new(
        id: String,
        kind: TaskKind,
        metadata: serde_json::Value,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        Self::build(id, kind, metadata, TaskState::Pending, 0, None, Arc::default(), engine)
    }

    /// 由引擎枚举记录重建的任务
    ///
    /// `previous` 是注册表里同 id 的旧任务，它的回调槽位会被沿用。
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restored(
        id: String,
        kind: TaskKind,
        metadata: serde_json::Value,
        state: TaskState,
        bytes: u64,
        bytes_total: u64,
        previous: Option<&Task>,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        let handlers = previous
            .map(|task| task.inner.handlers.clone())
            .unwrap_or_default();
        let bytes_total = if bytes_total > 0 { Some(bytes_total) } else { None };
        Self::build(id, kind, metadata, state, bytes, bytes_total, handlers, engine)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: String,
        kind: TaskKind,
        metadata: serde_json::Value,
        state: TaskState,
        bytes: u64,
        bytes_total: Option<u64>,
        handlers: Arc<Mutex<Handlers>>,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                kind,
                metadata,
                counters: Mutex::new(Counters { state, bytes, bytes_total }),
                handlers,
                engine,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    pub fn metadata(&self) -> &serde_json::Value {
        &self.inner.metadata
    }

    pub fn state(&self) -> TaskState {
        lock(&self.inner.counters).state
    }

    pub fn bytes(&self) -> u64 {
        lock(&self.inner.counters).bytes
    }

    /// 收到 begin 之前可能未知
    pub fn bytes_total(&self) -> Option<u64> {
        lock(&self.inner.counters).bytes_total
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let counters = *lock(&self.inner.counters);
        TaskSnapshot {
            id: self.inner.id.clone(),
            kind: self.inner.kind,
            state: counters.state,
            bytes: counters.bytes,
            bytes_total: counters.bytes_total,
            metadata: self.inner.metadata.clone(),
        }
    }

    /// 两个句柄是否指向同一个任务
    pub fn same_task(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 两个任务是否共用同一组回调槽位
    pub fn shares_handlers_with(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner.handlers, &other.inner.handlers)
    }

    /// 当前回调的副本
    pub fn handlers(&self) -> Handlers {
        lock(&self.inner.handlers).clone()
    }

    // ================== 回调注册 ==================

    pub fn on_begin<F>(&self, handler: F) -> &Self
    where
        F: Fn(&BeginInfo) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).begin = Some(Arc::new(handler));
        self
    }

    pub fn on_progress<F>(&self, handler: F) -> &Self
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).progress = Some(Arc::new(handler));
        self
    }

    pub fn on_done<F>(&self, handler: F) -> &Self
    where
        F: Fn(&DoneInfo) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).done = Some(Arc::new(handler));
        self
    }

    pub fn on_error<F>(&self, handler: F) -> &Self
    where
        F: Fn(&ErrorInfo) + Send + Sync + 'static,
    {
        lock(&self.inner.handlers).error = Some(Arc::new(handler));
        self
    }

    /// 按阶段名动态注册，回调与阶段不符时返回 `InvalidHandler`
    pub fn set_handler(&self, phase: HandlerPhase, handler: AnyHandler) -> BridgeResult<&Self> {
        lock(&self.inner.handlers).install(phase, handler)?;
        Ok(self)
    }

    // ================== 引擎事件 ==================

    /// 先在锁内改状态，再在锁外调用回调；终止状态下返回 false
    fn transition<F>(&self, event: &str, apply: F) -> bool
    where
        F: FnOnce(&mut Counters),
    {
        let mut counters = lock(&self.inner.counters);
        if counters.state.is_terminal() {
            debug!("任务 {} 已处于 {}，忽略 {} 事件", self.inner.id, counters.state, event);
            return false;
        }
        apply(&mut counters);
        true
    }

    pub(crate) fn handle_begin(&self, info: &BeginInfo) -> bool {
        let applied = self.transition("begin", |c| {
            c.state = TaskState::Processing;
            if c.bytes_total.is_none() {
                c.bytes_total = Some(info.expected_bytes);
            }
        });
        if applied {
            let handler = lock(&self.inner.handlers).begin.clone();
            if let Some(handler) = handler {
                handler(info);
            }
        }
        applied
    }

    pub(crate) fn handle_progress(&self, info: &ProgressInfo) -> bool {
        let mut delivered = *info;
        let applied = self.transition("progress", |c| {
            // 字节数只增不减，乱序的旧进度不会把计数拉回去
            c.bytes = c.bytes.max(info.bytes);
            if info.bytes_total > 0 {
                c.bytes_total = Some(info.bytes_total);
            }
            delivered = ProgressInfo {
                bytes: c.bytes,
                bytes_total: c.bytes_total.unwrap_or(info.bytes_total),
            };
        });
        if applied {
            let handler = lock(&self.inner.handlers).progress.clone();
            if let Some(handler) = handler {
                handler(&delivered);
            }
        }
        applied
    }

    /// 与进度一样，完成事件也不会让已记录的字节数回退
    pub(crate) fn handle_done(&self, info: &DoneInfo) -> bool {
        let mut delivered = *info;
        let applied = self.transition("done", |c| {
            c.state = TaskState::Done;
            c.bytes = c.bytes.max(info.bytes);
            c.bytes_total = Some(info.bytes_total);
            delivered.bytes = c.bytes;
        });
        if applied {
            let handler = lock(&self.inner.handlers).done.clone();
            if let Some(handler) = handler {
                handler(&delivered);
            }
        }
        applied
    }

    pub(crate) fn handle_error(&self, info: &ErrorInfo) -> bool {
        let applied = self.transition("error", |c| c.state = TaskState::Failed);
        if applied {
            let handler = lock(&self.inner.handlers).error.clone();
            match handler {
                Some(handler) => handler(info),
                None => debug!("任务 {} 失败但未注册 error 回调: {}", self.inner.id, info.error),
            }
        }
        applied
    }

    // ================== 本地控制（乐观更新） ==================

    /// Processing -> Paused，不等待引擎确认
    pub async fn pause(&self) -> bool {
        let applied = {
            let mut counters = lock(&self.inner.counters);
            if counters.state == TaskState::Processing {
                counters.state = TaskState::Paused;
                true
            } else {
                false
            }
        };
        if !applied {
            debug!("任务 {} 当前为 {}，不能暂停", self.inner.id, self.state());
            return false;
        }
        if let Err(e) = self.inner.engine.pause(&self.inner.id).await {
            warn!("暂停任务 {} 的请求发送失败: {}", self.inner.id, e);
        }
        true
    }

    /// Paused -> Processing，不等待引擎确认
    pub async fn resume(&self) -> bool {
        let applied = {
            let mut counters = lock(&self.inner.counters);
            if counters.state == TaskState::Paused {
                counters.state = TaskState::Processing;
                true
            } else {
                false
            }
        };
        if !applied {
            debug!("任务 {} 当前为 {}，不能恢复", self.inner.id, self.state());
            return false;
        }
        if let Err(e) = self.inner.engine.resume(&self.inner.id).await {
            warn!("恢复任务 {} 的请求发送失败: {}", self.inner.id, e);
        }
        true
    }

    /// 暂停后立即恢复，唤醒可能被系统悄悄挂起的传输
    ///
    /// 只对 Processing 的任务生效，结束时仍是 Processing。
    pub(crate) async fn kick(&self) -> Result<(), EngineError> {
        {
            let mut counters = lock(&self.inner.counters);
            if counters.state != TaskState::Processing {
                return Ok(());
            }
            counters.state = TaskState::Paused;
        }
        let paused = self.inner.engine.pause(&self.inner.id).await;
        {
            let mut counters = lock(&self.inner.counters);
            if counters.state == TaskState::Paused {
                counters.state = TaskState::Processing;
            }
        }
        let resumed = self.inner.engine.resume(&self.inner.id).await;
        paused.and(resumed)
    }

    /// 任意非终止状态 -> Stopped
    ///
    /// 引擎不保证会再发终止事件，注册表的清理由调用方负责。
    pub async fn stop(&self) -> bool {
        let applied = self.transition("stop", |c| c.state = TaskState::Stopped);
        if !applied {
            return false;
        }
        if let Err(e) = self.inner.engine.cancel(&self.inner.id).await {
            warn!("取消任务 {} 的请求发送失败: {}", self.inner.id, e);
        }
        true
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = *lock(&self.inner.counters);
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("state", &counters.state)
            .field("bytes", &counters.bytes)
            .field("bytes_total", &counters.bytes_total)
            .finish()
    }
}
