//! 重启后的任务协调
//!
//! 引擎是任务状态的权威来源。进程重启（或冷启动）后，通过引擎的枚举结果
//! 重建内存中的任务表：状态码归一化到内部状态机，已注册的回调沿用，
//! 不可恢复的记录直接丢弃。

use futures::future::join_all;
use log::{info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::ConfigStore;
use crate::diag;
use super::engine::{NativeStatus, TaskRecord, TransferEngine};
use super::error::{BridgeResult, ReconciliationWarning};
use super::registry::TaskRegistry;
use super::task::{Task, TaskState};

/// 单条枚举记录的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 以给定状态重新注册
    Keep(TaskState),
    /// 引擎正在取消，丢弃并补发一次停止
    DiscardAndStop,
    /// 完成但字节数对不上，直接丢弃
    Discard,
}

impl Resolution {
    pub fn of(record: &TaskRecord) -> Self {
        match record.status() {
            NativeStatus::Running => Resolution::Keep(TaskState::Processing),
            NativeStatus::Suspended => Resolution::Keep(TaskState::Paused),
            NativeStatus::Canceling => Resolution::DiscardAndStop,
            NativeStatus::Completed if record.bytes == record.bytes_total => Resolution::Keep(TaskState::Done),
            NativeStatus::Completed => Resolution::Discard,
            NativeStatus::Unknown(code) => {
                warn!("{}", ReconciliationWarning::UnknownNativeStatus { id: record.id.clone(), code });
                Resolution::Keep(TaskState::Pending)
            }
        }
    }
}

/// 记录里的元数据可能是对象，也可能是创建时写入的 JSON 字符串
///
/// 解析失败或不是对象时返回空对象，并记一条警告。
pub fn parse_metadata(id: &str, raw: &Value) -> Value {
    let malformed = |reason: String| {
        warn!("{}", ReconciliationWarning::MalformedMetadata { id: id.to_string(), reason });
        Value::Object(Default::default())
    };
    match raw {
        Value::Object(_) => raw.clone(),
        Value::Null => Value::Object(Default::default()),
        Value::String(text) if text.trim().is_empty() => Value::Object(Default::default()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value @ Value::Object(_)) => value,
            Ok(other) => malformed(format!("不是 JSON 对象: {}", other)),
            Err(e) => malformed(e.to_string()),
        },
        other => malformed(format!("不是 JSON 对象: {}", other)),
    }
}

/// 协调器：枚举 -> 归一化 -> 合并 -> 写回注册表 -> 清理已停止的任务
#[derive(Clone)]
pub struct Reconciler {
    registry: TaskRegistry,
    engine: Arc<dyn TransferEngine>,
    config: Arc<ConfigStore>,
}

impl Reconciler {
    pub fn new(registry: TaskRegistry, engine: Arc<dyn TransferEngine>, config: Arc<ConfigStore>) -> Self {
        Self { registry, engine, config }
    }

    /// 执行一次协调，返回保留下来的任务
    ///
    /// 幂等：引擎状态不变时重复调用得到相同的任务集合，注册表大小不变。
    /// 枚举期间已被事件处理掉的任务不会写回。只有枚举本身失败时才返回错误。
    pub async fn reconcile(&self) -> BridgeResult<Vec<Task>> {
        // 先记下枚举前的注册表，写回时以它为基准比对
        let before: HashMap<String, Task> = self
            .registry
            .list()
            .await
            .into_iter()
            .map(|task| (task.id().to_string(), task))
            .collect();
        let records = self.engine.enumerate_existing_tasks().await?;
        diag!(self.config, "引擎枚举到 {} 个任务", records.len());

        let mut rebuilt = Vec::with_capacity(records.len());
        for record in &records {
            let previous = before.get(&record.id).cloned();
            match Resolution::of(record) {
                Resolution::Keep(state) => {
                    let task = Task::restored(
                        record.id.clone(),
                        record.kind,
                        parse_metadata(&record.id, &record.metadata),
                        state,
                        record.bytes,
                        record.bytes_total,
                        previous.as_ref(),
                        self.engine.clone(),
                    );
                    diag!(self.config, "恢复任务 {} -> {}", record.id, state);
                    rebuilt.push((task, previous));
                }
                Resolution::DiscardAndStop => {
                    info!("任务 {} 正在被引擎取消，丢弃", record.id);
                    self.stop_discarded(&record.id, previous).await;
                }
                Resolution::Discard => {
                    warn!(
                        "任务 {} 已完成但字节数不一致 ({}/{})，丢弃",
                        record.id, record.bytes, record.bytes_total
                    );
                    if let Some(previous) = previous {
                        self.registry.remove_task(&previous).await;
                    }
                }
            }
        }

        let survivors = self.registry.put_reconciled(rebuilt).await;

        // 本地已停止、引擎也不再列出的任务不会再有终止事件
        let listed: HashSet<&str> = records.iter().map(|record| record.id.as_str()).collect();
        for task in self.registry.prune_stopped(&listed).await {
            diag!(self.config, "移除已停止的任务 {}", task.id());
        }
        info!("协调完成: 引擎记录 {} 个，保留 {} 个", records.len(), survivors.len());
        Ok(survivors)
    }

    /// 旧句柄还在时由它发出停止，观察者能看到 Stopped；否则直接通知引擎
    async fn stop_discarded(&self, id: &str, previous: Option<Task>) {
        match previous {
            Some(task) => {
                task.stop().await;
                self.registry.remove_task(&task).await;
            }
            None => {
                if let Err(e) = self.engine.cancel(id).await {
                    warn!("取消任务 {} 的请求发送失败: {}", id, e);
                }
            }
        }
    }

    /// 协调后对每个 Processing 任务先暂停再恢复，唤醒被系统挂起的传输
    ///
    /// 尽力而为，任何失败都只记日志。
    pub async fn ensure_running(&self) -> Vec<Task> {
        let tasks = match self.reconcile().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("协调失败，跳过唤醒: {}", e);
                return Vec::new();
            }
        };

        let running: Vec<&Task> = tasks
            .iter()
            .filter(|task| task.state() == TaskState::Processing)
            .collect();
        let results = join_all(running.iter().map(|task| task.kick())).await;
        for (task, result) in running.iter().zip(results) {
            match result {
                Ok(()) => diag!(self.config, "已唤醒任务 {}", task.id()),
                Err(source) => warn!(
                    "{}",
                    ReconciliationWarning::KickFailed { id: task.id().to_string(), source }
                ),
            }
        }
        tasks
    }
}
