use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::ConfigStore;
use crate::diag;
use super::engine::TransferEngine;
use super::error::ReconciliationWarning;
use super::events::EngineEvent;
use super::registry::TaskRegistry;
use super::task::Task;

/// 把引擎事件路由到注册表中对应的任务
///
/// 每个事件都处理完（状态迁移、回调、必要时的完成握手）才处理下一个。
/// 未知 id 的事件直接丢弃，只计数并记日志。
#[derive(Clone)]
pub struct EventRouter {
    registry: TaskRegistry,
    engine: Arc<dyn TransferEngine>,
    config: Arc<ConfigStore>,
    dropped: Arc<AtomicU64>,
}

impl EventRouter {
    pub fn new(registry: TaskRegistry, engine: Arc<dyn TransferEngine>, config: Arc<ConfigStore>) -> Self {
        Self {
            registry,
            engine,
            config,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 被丢弃的事件数（未知 id 或格式错误的条目）
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// 持续消费事件流，直到发送端全部关闭
    pub async fn run(self, mut events: UnboundedReceiver<EngineEvent>) {
        info!("事件路由已启动");
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        info!("事件流已关闭，事件路由退出");
    }

    /// 解析并分发一条原始事件
    pub async fn dispatch_raw(&self, name: &str, payload: &serde_json::Value) {
        match EngineEvent::from_raw(name, payload) {
            Ok(raw) => {
                if raw.malformed_entries > 0 {
                    self.dropped.fetch_add(raw.malformed_entries as u64, Ordering::SeqCst);
                }
                self.dispatch(raw.event).await;
            }
            Err(warning) => {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                warn!("{}", warning);
            }
        }
    }

    pub async fn dispatch(&self, event: EngineEvent) {
        let name = event.name();
        match event {
            EngineEvent::Begin { id, info, .. } => {
                diag!(self.config, "{} {} {:?}", name, id, info);
                if let Some(task) = self.lookup(name, &id).await {
                    task.handle_begin(&info);
                }
            }
            EngineEvent::Progress { entries, .. } => {
                diag!(self.config, "{} 共 {} 条", name, entries.len());
                // 每条独立处理，某一条找不到任务不影响其余条目
                for entry in entries {
                    if let Some(task) = self.lookup(name, &entry.id).await {
                        task.handle_progress(&entry.info());
                    }
                }
            }
            EngineEvent::Done { id, info, .. } => {
                diag!(self.config, "{} {} {:?}", name, id, info);
                if let Some(task) = self.lookup(name, &id).await {
                    task.handle_done(&info);
                    self.finish(&task).await;
                }
            }
            EngineEvent::Error { id, info, .. } => {
                diag!(self.config, "{} {} {:?}", name, id, info);
                if let Some(task) = self.lookup(name, &id).await {
                    task.handle_error(&info);
                    self.finish(&task).await;
                }
            }
        }
    }

    async fn lookup(&self, event: &'static str, id: &str) -> Option<Task> {
        let task = self.registry.get(id).await;
        if task.is_none() {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            let warning = ReconciliationWarning::UnknownTask { event, id: id.to_string() };
            warn!("{}", warning);
        }
        task
    }

    /// 终止事件后的完成握手与注册表清理
    async fn finish(&self, task: &Task) {
        if let Err(e) = self.engine.acknowledge_completion(task.id()).await {
            warn!("任务 {} 的完成握手失败: {}", task.id(), e);
        }
        // 协调期间可能已经换成了同 id 的新任务，那个任务不能被误删
        if !self.registry.remove_task(task).await {
            diag!(self.config, "任务 {} 已被替换或移除，跳过清理", task.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::testing::{EngineCall, RecordingEngine};
    use crate::core::events::ProgressEntry;
    use crate::core::task::{BeginInfo, DoneInfo, ErrorInfo, TaskKind, TaskState};
    use serde_json::json;
    use std::sync::Mutex;

    struct Fixture {
        engine: Arc<RecordingEngine>,
        registry: TaskRegistry,
        router: EventRouter,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(RecordingEngine::new());
        let registry = TaskRegistry::new();
        let router = EventRouter::new(registry.clone(), engine.clone(), Arc::new(ConfigStore::default()));
        Fixture { engine, registry, router }
    }

    impl Fixture {
        async fn add(&self, id: &str) -> Task {
            let task = Task::new(id.into(), TaskKind::Download, json!({}), self.engine.clone());
            self.registry.put(task.clone()).await;
            task
        }
    }

    fn progress(entries: &[(&str, u64, u64)]) -> EngineEvent {
        EngineEvent::Progress {
            kind: TaskKind::Download,
            entries: entries
                .iter()
                .map(|(id, bytes, total)| ProgressEntry { id: id.to_string(), bytes: *bytes, bytes_total: *total })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_begin_progress_done_scenario() {
        let fx = fixture();
        let task = fx.add("a").await;
        assert_eq!(task.state(), TaskState::Pending);

        fx.router.dispatch(EngineEvent::Begin {
            kind: TaskKind::Download,
            id: "a".into(),
            info: BeginInfo { expected_bytes: 1000, headers: Default::default() },
        }).await;
        assert_eq!(task.state(), TaskState::Processing);
        assert_eq!(task.bytes_total(), Some(1000));

        fx.router.dispatch(progress(&[("a", 500, 1000)])).await;
        assert_eq!(task.bytes(), 500);

        fx.router.dispatch(EngineEvent::Done {
            kind: TaskKind::Download,
            id: "a".into(),
            info: DoneInfo { bytes: 1000, bytes_total: 1000 },
        }).await;
        assert_eq!(task.state(), TaskState::Done);
        assert!(fx.registry.get("a").await.is_none());
        assert_eq!(fx.engine.calls(), vec![EngineCall::Acknowledge("a".into())]);
    }

    #[tokio::test]
    async fn test_unknown_id_in_batch() {
        let fx = fixture();
        let task = fx.add("known").await;
        fx.router.dispatch(progress(&[("ghost", 1, 2), ("known", 40, 100)])).await;
        assert_eq!(task.bytes(), 40);
        assert_eq!(fx.router.dropped_events(), 1);
    }

    #[tokio::test]
    async fn test_error_event_acknowledges_and_removes() {
        let fx = fixture();
        let task = fx.add("e").await;
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        task.on_error(move |info| *slot.lock().unwrap() = Some(info.error_code));

        fx.router.dispatch(EngineEvent::Error {
            kind: TaskKind::Download,
            id: "e".into(),
            info: ErrorInfo { error: "HTTP 404".into(), error_code: 404 },
        }).await;
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(*seen.lock().unwrap(), Some(404));
        assert!(fx.registry.is_empty().await);
        assert_eq!(fx.engine.calls(), vec![EngineCall::Acknowledge("e".into())]);
    }

    #[tokio::test]
    async fn test_terminal_for_unknown_id_skips_ack() {
        let fx = fixture();
        fx.router.dispatch(EngineEvent::Done {
            kind: TaskKind::Upload,
            id: "nobody".into(),
            info: DoneInfo::default(),
        }).await;
        assert!(fx.engine.calls().is_empty());
        assert_eq!(fx.router.dropped_events(), 1);
    }

    #[tokio::test]
    async fn test_ack_failure_still_removes() {
        let fx = fixture();
        fx.add("a").await;
        fx.engine.fail_with(crate::core::error::EngineError::Unavailable("gone".into()));
        fx.router.dispatch(EngineEvent::Done {
            kind: TaskKind::Download,
            id: "a".into(),
            info: DoneInfo { bytes: 1, bytes_total: 1 },
        }).await;
        assert!(fx.registry.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_progress_after_done_is_ignored() {
        let fx = fixture();
        let task = fx.add("a").await;
        fx.router.dispatch(EngineEvent::Done {
            kind: TaskKind::Download,
            id: "a".into(),
            info: DoneInfo { bytes: 100, bytes_total: 100 },
        }).await;
        // 旧句柄重新放回注册表，模拟还在途中的旧批次
        fx.registry.put(task.clone()).await;
        fx.router.dispatch(progress(&[("a", 10, 100)])).await;
        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(task.bytes(), 100);
    }

    #[tokio::test]
    async fn test_dispatch_raw_counts_malformed_entries() {
        let fx = fixture();
        let task = fx.add("a").await;
        fx.router.dispatch_raw(
            "downloadProgress",
            &json!([{"id": "a", "bytes": 7, "bytesTotal": 10}, {"id": 3}]),
        ).await;
        fx.router.dispatch_raw("downloadComplete", &json!({"bytes": 1})).await;
        assert_eq!(task.bytes(), 7);
        assert_eq!(fx.router.dropped_events(), 2);
    }

    #[tokio::test]
    async fn test_run_drains_channel_in_order() {
        let fx = fixture();
        let task = fx.add("a").await;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(EngineEvent::Begin { kind: TaskKind::Download, id: "a".into(), info: BeginInfo::default() }).unwrap();
        tx.send(progress(&[("a", 30, 60)])).unwrap();
        tx.send(EngineEvent::Done { kind: TaskKind::Download, id: "a".into(), info: DoneInfo { bytes: 60, bytes_total: 60 } }).unwrap();
        tx.send(progress(&[("a", 45, 60)])).unwrap();
        drop(tx);

        fx.router.clone().run(rx).await;
        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(task.bytes(), 60);
        assert!(fx.registry.is_empty().await);
        // 完成后到达的进度找不到任务
        assert_eq!(fx.router.dropped_events(), 1);
    }

    #[tokio::test]
    async fn test_done_does_not_remove_replacement() {
        let fx = fixture();
        let old = fx.add("a").await;
        // 直接对旧任务做收尾，而注册表里已经是新任务
        let replacement = Task::new("a".into(), TaskKind::Download, json!({}), fx.engine.clone());
        fx.registry.put(replacement.clone()).await;
        old.handle_done(&DoneInfo::default());
        fx.router.finish(&old).await;
        assert!(fx.registry.get("a").await.unwrap().same_task(&replacement));
    }
}
