//! 模拟传输引擎
//!
//! 真正的后台传输由操作系统完成，演示程序和集成测试用这个引擎代替：
//! 按进度间隔推进字节数，通过 mpsc 通道发出 begin/progress/done/error 事件，
//! 并把任务表写到 JSON 状态文件里，下次启动时可以恢复（模拟进程重启）。

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::engine::{NativeStatus, TaskRecord, TransferEngine, TransferRequest};
use crate::core::error::EngineError;
use crate::core::events::{EngineEvent, ProgressEntry};
use crate::core::task::{BeginInfo, DoneInfo, ErrorInfo, TaskKind};

/// 无法得知大小时使用的模拟文件大小
pub const DEFAULT_SIMULATED_SIZE: u64 = 4 * 1024 * 1024;
/// 默认分多少次进度完成
pub const DEFAULT_STEPS: u64 = 20;

/// 引擎内部保存的一条任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimJob {
    pub record: TaskRecord,
    pub url: String,
    pub local_path: String,
    pub progress_interval_ms: u64,
    /// 到达这个字节数时模拟失败
    #[serde(default)]
    pub fail_at: Option<u64>,
}

impl SimJob {
    fn status(&self) -> NativeStatus {
        self.record.status()
    }

    fn set_status(&mut self, code: i64) {
        self.record.native_status = code;
    }
}

struct Shared {
    jobs: Mutex<HashMap<String, SimJob>>,
    events: UnboundedSender<EngineEvent>,
    state_file: Option<PathBuf>,
    steps: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!("事件接收端已关闭，丢弃模拟事件");
        }
    }

    /// 把任务表写入状态文件
    fn save_jobs(&self, jobs: &HashMap<String, SimJob>) {
        let Some(path) = &self.state_file else {
            return;
        };
        let mut list: Vec<&SimJob> = jobs.values().collect();
        list.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        let result = serde_json::to_string_pretty(&list)
            .map_err(std::io::Error::from)
            .and_then(|json| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, json)
            });
        if let Err(e) = result {
            warn!("无法保存模拟引擎状态 {}: {}", path.display(), e);
        }
    }

    /// 修改一条任务并落盘，任务不存在时返回 UnknownTask
    fn update<R>(&self, id: &str, apply: impl FnOnce(&mut SimJob) -> R) -> Result<R, EngineError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(id).ok_or_else(|| EngineError::UnknownTask(id.to_string()))?;
        let result = apply(job);
        self.save_jobs(&jobs);
        Ok(result)
    }
}

/// 一次推进的结果
enum Tick {
    Idle,
    Progress(ProgressEntry),
    Done(DoneInfo),
    Failed(ErrorInfo),
    Canceled,
    Gone,
}

/// 驱动单个任务直到完成、失败或被取消
async fn drive(shared: Arc<Shared>, id: String) {
    let Some((kind, interval_ms, bytes_total)) = lock(&shared.jobs)
        .get(&id)
        .map(|job| (job.record.kind, job.progress_interval_ms, job.record.bytes_total))
    else {
        return;
    };
    let chunk = (bytes_total / shared.steps.max(1)).max(1);

    shared.emit(EngineEvent::Begin {
        kind,
        id: id.clone(),
        info: BeginInfo { expected_bytes: bytes_total, headers: HashMap::new() },
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    // interval 的第一次 tick 立即返回
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let tick = {
            let mut jobs = lock(&shared.jobs);
            let tick = match jobs.get_mut(&id) {
                None => Tick::Gone,
                Some(job) => match job.status() {
                    NativeStatus::Suspended | NativeStatus::Unknown(_) => Tick::Idle,
                    NativeStatus::Completed => Tick::Gone,
                    NativeStatus::Canceling => Tick::Canceled,
                    NativeStatus::Running => {
                        let record = &mut job.record;
                        record.bytes = (record.bytes + chunk).min(record.bytes_total);
                        match job.fail_at {
                            Some(limit) if record.bytes >= limit => {
                                // 失败的任务在引擎里表现为字节数不完整的 Completed
                                record.native_status = NativeStatus::COMPLETED;
                                Tick::Failed(ErrorInfo { error: "模拟的网络错误".to_string(), error_code: 500 })
                            }
                            _ if record.bytes >= record.bytes_total => {
                                let info = DoneInfo { bytes: record.bytes, bytes_total: record.bytes_total };
                                record.native_status = NativeStatus::COMPLETED;
                                Tick::Done(info)
                            }
                            _ => Tick::Progress(ProgressEntry {
                                id: id.clone(),
                                bytes: record.bytes,
                                bytes_total: record.bytes_total,
                            }),
                        }
                    }
                },
            };
            if !matches!(tick, Tick::Idle | Tick::Gone) {
                shared.save_jobs(&jobs);
            }
            tick
        };

        match tick {
            Tick::Idle => continue,
            Tick::Progress(entry) => shared.emit(EngineEvent::Progress { kind, entries: vec![entry] }),
            Tick::Done(info) => {
                shared.emit(EngineEvent::Done { kind, id: id.clone(), info });
                return;
            }
            Tick::Failed(info) => {
                shared.emit(EngineEvent::Error { kind, id: id.clone(), info });
                return;
            }
            Tick::Canceled => {
                shared.emit(EngineEvent::Error {
                    kind,
                    id: id.clone(),
                    info: ErrorInfo { error: "cancelled".to_string(), error_code: -999 },
                });
                return;
            }
            Tick::Gone => return,
        }
    }
}

/// 按请求推测总字节数：URL 上的 `size` 参数，上传时的源文件大小，或者默认值
fn expected_size(request: &TransferRequest) -> u64 {
    let from_query = url::Url::parse(&request.url).ok().and_then(|url| {
        url.query_pairs()
            .find(|(key, _)| key == "size")
            .and_then(|(_, value)| value.parse::<u64>().ok())
    });
    if let Some(size) = from_query {
        return size;
    }
    if request.kind == TaskKind::Upload {
        if let Ok(meta) = fs::metadata(&request.local_path) {
            return meta.len();
        }
    }
    DEFAULT_SIMULATED_SIZE
}

/// URL 带 `fail=1` 时在传到一半时失败
fn failure_point(request: &TransferRequest, bytes_total: u64) -> Option<u64> {
    let url = url::Url::parse(&request.url).ok()?;
    let fail = url.query_pairs().any(|(key, value)| key == "fail" && value != "0");
    fail.then_some(bytes_total / 2)
}

/// 在进程内模拟后台传输的引擎
#[derive(Clone)]
pub struct SimulatedEngine {
    shared: Arc<Shared>,
    documents: PathBuf,
}

impl SimulatedEngine {
    pub fn new(events: UnboundedSender<EngineEvent>, documents: impl Into<PathBuf>) -> Self {
        Self::build(events, documents.into(), None, DEFAULT_STEPS, HashMap::new())
    }

    /// 从状态文件恢复上一个进程留下的任务，未结束的任务继续推进
    ///
    /// 文件不存在时等同于 `new`，只是之后的状态会写入该文件。
    pub async fn restore(
        events: UnboundedSender<EngineEvent>,
        documents: impl Into<PathBuf>,
        state_file: impl AsRef<Path>,
    ) -> Self {
        let state_file = state_file.as_ref().to_path_buf();
        let mut jobs = HashMap::new();
        match fs::read_to_string(&state_file) {
            Ok(data) => match serde_json::from_str::<Vec<SimJob>>(&data) {
                Ok(list) => {
                    for job in list {
                        jobs.insert(job.record.id.clone(), job);
                    }
                }
                Err(e) => warn!("模拟引擎状态文件格式错误，忽略: {}", e),
            },
            Err(e) => debug!("没有可恢复的模拟引擎状态 {}: {}", state_file.display(), e),
        }

        let engine = Self::build(events, documents.into(), Some(state_file), DEFAULT_STEPS, jobs);
        let pending: Vec<String> = lock(&engine.shared.jobs)
            .values()
            .filter(|job| matches!(job.status(), NativeStatus::Running | NativeStatus::Suspended))
            .map(|job| job.record.id.clone())
            .collect();
        info!("模拟引擎恢复了 {} 个未完成任务", pending.len());
        for id in pending {
            tokio::spawn(drive(engine.shared.clone(), id));
        }
        engine
    }

    fn build(
        events: UnboundedSender<EngineEvent>,
        documents: PathBuf,
        state_file: Option<PathBuf>,
        steps: u64,
        jobs: HashMap<String, SimJob>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: Mutex::new(jobs),
                events,
                state_file,
                steps,
            }),
            documents,
        }
    }

    /// 调整完成一个任务所需的进度次数
    pub fn with_steps(self, steps: u64) -> Self {
        let jobs = lock(&self.shared.jobs).clone();
        Self::build(
            self.shared.events.clone(),
            self.documents,
            self.shared.state_file.clone(),
            steps.max(1),
            jobs,
        )
    }

    /// 当前任务表
    pub fn jobs(&self) -> Vec<SimJob> {
        lock(&self.shared.jobs).values().cloned().collect()
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn enumerate_existing_tasks(&self) -> Result<Vec<TaskRecord>, EngineError> {
        Ok(lock(&self.shared.jobs).values().map(|job| job.record.clone()).collect())
    }

    async fn create_transfer(&self, request: TransferRequest) -> Result<(), EngineError> {
        let bytes_total = expected_size(&request);
        {
            let mut jobs = lock(&self.shared.jobs);
            if let Some(existing) = jobs.get(&request.id) {
                if matches!(existing.status(), NativeStatus::Running | NativeStatus::Suspended) {
                    return Err(EngineError::Rejected {
                        id: request.id.clone(),
                        reason: "同 id 的任务仍在进行".to_string(),
                    });
                }
            }
            let job = SimJob {
                record: TaskRecord {
                    id: request.id.clone(),
                    kind: request.kind,
                    native_status: NativeStatus::RUNNING,
                    bytes: 0,
                    bytes_total,
                    metadata: serde_json::Value::String(request.metadata.clone()),
                },
                url: request.url.clone(),
                local_path: request.local_path.clone(),
                progress_interval_ms: request.progress_interval_ms,
                fail_at: failure_point(&request, bytes_total),
            };
            jobs.insert(request.id.clone(), job);
            self.shared.save_jobs(&jobs);
        }
        debug!("模拟引擎开始 {} {} ({} 字节)", request.kind, request.id, bytes_total);
        tokio::spawn(drive(self.shared.clone(), request.id));
        Ok(())
    }

    async fn pause(&self, id: &str) -> Result<(), EngineError> {
        self.shared.update(id, |job| {
            if job.status() == NativeStatus::Running {
                job.set_status(NativeStatus::SUSPENDED);
            }
        })
    }

    async fn resume(&self, id: &str) -> Result<(), EngineError> {
        self.shared.update(id, |job| {
            if job.status() == NativeStatus::Suspended {
                job.set_status(NativeStatus::RUNNING);
            }
        })
    }

    async fn cancel(&self, id: &str) -> Result<(), EngineError> {
        self.shared.update(id, |job| {
            if job.status() != NativeStatus::Completed {
                job.set_status(NativeStatus::CANCELING);
            }
        })
    }

    /// 握手后引擎忘掉这个任务
    async fn acknowledge_completion(&self, id: &str) -> Result<(), EngineError> {
        let mut jobs = lock(&self.shared.jobs);
        jobs.remove(id).ok_or_else(|| EngineError::UnknownTask(id.to_string()))?;
        self.shared.save_jobs(&jobs);
        Ok(())
    }

    fn documents_directory(&self) -> Option<PathBuf> {
        Some(self.documents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use tokio::time::timeout;

    fn request(id: &str, url: &str) -> TransferRequest {
        TransferRequest {
            id: id.to_string(),
            kind: TaskKind::Download,
            url: url.to_string(),
            local_path: format!("/tmp/{}", id),
            method: None,
            headers: HashMap::new(),
            metadata: "{}".to_string(),
            progress_interval_ms: 5,
            is_allowed_over_roaming: true,
            is_allowed_over_metered: true,
            is_notification_visible: false,
            notification_title: None,
        }
    }

    async fn next(rx: &mut UnboundedReceiver<EngineEvent>) -> EngineEvent {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    async fn until_terminal(rx: &mut UnboundedReceiver<EngineEvent>) -> (Vec<EngineEvent>, EngineEvent) {
        let mut seen = Vec::new();
        loop {
            let event = next(rx).await;
            if event.is_terminal() {
                return (seen, event);
            }
            seen.push(event);
        }
    }

    #[test]
    fn test_expected_size_from_query() {
        assert_eq!(expected_size(&request("a", "https://x/file?size=1000")), 1000);
        assert_eq!(expected_size(&request("a", "https://x/file")), DEFAULT_SIMULATED_SIZE);
        assert_eq!(failure_point(&request("a", "https://x/f?size=10&fail=1"), 10), Some(5));
        assert_eq!(failure_point(&request("a", "https://x/f?size=10"), 10), None);
    }

    #[tokio::test]
    async fn test_transfer_runs_to_completion() {
        let (tx, mut rx) = unbounded_channel();
        let engine = SimulatedEngine::new(tx, "/tmp").with_steps(4);
        engine.create_transfer(request("a", "https://x/a?size=100")).await.unwrap();

        let first = next(&mut rx).await;
        assert!(matches!(first, EngineEvent::Begin { ref info, .. } if info.expected_bytes == 100));
        let (progress, last) = until_terminal(&mut rx).await;
        assert_eq!(progress.len(), 3);
        assert_eq!(
            last,
            EngineEvent::Done { kind: TaskKind::Download, id: "a".into(), info: DoneInfo { bytes: 100, bytes_total: 100 } }
        );

        let records = engine.enumerate_existing_tasks().await.unwrap();
        assert_eq!(records[0].status(), NativeStatus::Completed);
        engine.acknowledge_completion("a").await.unwrap();
        assert!(engine.enumerate_existing_tasks().await.unwrap().is_empty());
        assert!(engine.acknowledge_completion("a").await.is_err());
    }

    #[tokio::test]
    async fn test_failure_and_cancel() {
        let (tx, mut rx) = unbounded_channel();
        let engine = SimulatedEngine::new(tx, "/tmp").with_steps(10);
        engine.create_transfer(request("f", "https://x/f?size=100&fail=1")).await.unwrap();
        let (_, last) = until_terminal(&mut rx).await;
        assert!(matches!(last, EngineEvent::Error { ref info, .. } if info.error_code == 500));

        engine.create_transfer(request("c", "https://x/c?size=100")).await.unwrap();
        engine.cancel("c").await.unwrap();
        let (_, last) = until_terminal(&mut rx).await;
        assert!(matches!(last, EngineEvent::Error { ref id, ref info, .. } if id == "c" && info.error_code == -999));
    }

    #[tokio::test]
    async fn test_pause_and_unknown_ids() {
        let (tx, _rx) = unbounded_channel();
        let engine = SimulatedEngine::new(tx, "/tmp");
        assert_eq!(engine.pause("none").await, Err(EngineError::UnknownTask("none".into())));

        let mut slow = request("p", "https://x/p?size=100");
        slow.progress_interval_ms = 60_000;
        engine.create_transfer(slow.clone()).await.unwrap();
        engine.pause("p").await.unwrap();
        assert_eq!(engine.jobs()[0].status(), NativeStatus::Suspended);
        assert!(engine.create_transfer(slow).await.is_err());
        engine.resume("p").await.unwrap();
        assert_eq!(engine.jobs()[0].status(), NativeStatus::Running);
        assert_eq!(engine.documents_directory(), Some(PathBuf::from("/tmp")));
    }

    #[tokio::test]
    async fn test_state_file_restore() {
        let path = std::env::temp_dir().join(format!("bgtransfer_sim_{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let (tx, _rx) = unbounded_channel();
        let engine = SimulatedEngine::restore(tx, "/tmp", &path).await;
        let mut slow = request("r", "https://x/r?size=100");
        slow.progress_interval_ms = 60_000;
        engine.create_transfer(slow).await.unwrap();
        engine.pause("r").await.unwrap();
        assert!(path.exists());

        let (tx, _rx) = unbounded_channel();
        let restored = SimulatedEngine::restore(tx, "/tmp", &path).await;
        let records = restored.enumerate_existing_tasks().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "r");
        assert_eq!(records[0].status(), NativeStatus::Suspended);
        assert_eq!(records[0].metadata, serde_json::Value::String("{}".into()));
        let _ = fs::remove_file(&path);
    }
}
