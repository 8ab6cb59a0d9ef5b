use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::task::{Task, TaskState};

/// 任务注册表：id -> Task
///
/// 同一个 id 任何时刻最多一个任务。`put` 是覆盖语义，协调时重新注册
/// 同 id 的任务不会报错。
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换，返回被替换的旧任务
    pub async fn put(&self, task: Task) -> Option<Task> {
        self.tasks.lock().await.insert(task.id().to_string(), task)
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().await.get(id).cloned()
    }

    /// 幂等，移除不存在的 id 不算错误
    pub async fn remove(&self, id: &str) -> Option<Task> {
        self.tasks.lock().await.remove(id)
    }

    /// 只有当注册表里仍是这个任务时才移除
    pub async fn remove_task(&self, task: &Task) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.get(task.id()) {
            Some(current) if current.same_task(task) => {
                tasks.remove(task.id());
                true
            }
            _ => false,
        }
    }

    /// 不保证顺序
    pub async fn list(&self) -> Vec<Task> {
        self.tasks.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// 协调结果写回，整批在同一把锁内完成
    ///
    /// 每个任务带着构建时读到的旧任务。写入前比对：旧任务已被移除、
    /// 替换或进入终止状态时跳过，说明协调期间有事件先一步处理了它。
    /// 返回实际写入的任务。
    pub async fn put_reconciled(&self, entries: Vec<(Task, Option<Task>)>) -> Vec<Task> {
        let mut map = self.tasks.lock().await;
        let mut written = Vec::with_capacity(entries.len());
        for (task, previous) in entries {
            let unchanged = match (map.get(task.id()), &previous) {
                (None, None) => true,
                (Some(current), Some(previous)) => {
                    current.same_task(previous) && !previous.state().is_terminal()
                }
                _ => false,
            };
            if unchanged {
                map.insert(task.id().to_string(), task.clone());
                written.push(task);
            } else {
                debug!("任务 {} 在协调期间已变化，跳过写回", task.id());
            }
        }
        written
    }

    /// 移除不在 `keep` 中且已经 Stopped 的任务
    pub async fn prune_stopped(&self, keep: &HashSet<&str>) -> Vec<Task> {
        let mut map = self.tasks.lock().await;
        let gone: Vec<String> = map
            .values()
            .filter(|task| task.state() == TaskState::Stopped && !keep.contains(task.id()))
            .map(|task| task.id().to_string())
            .collect();
        gone.iter().filter_map(|id| map.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::testing::RecordingEngine;
    use crate::core::task::{DoneInfo, TaskKind};
    use serde_json::json;

    fn task(id: &str) -> Task {
        Task::new(id.into(), TaskKind::Download, json!({}), Arc::new(RecordingEngine::new()))
    }

    #[tokio::test]
    async fn test_put_get() {
        let registry = TaskRegistry::new();
        let a = task("a");
        assert!(registry.put(a.clone()).await.is_none());
        let found = registry.get("a").await.unwrap();
        assert!(found.same_task(&a));
        assert!(registry.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let registry = TaskRegistry::new();
        let first = task("a");
        let second = task("a");
        registry.put(first.clone()).await;
        let replaced = registry.put(second.clone()).await.unwrap();
        assert!(replaced.same_task(&first));
        assert!(registry.get("a").await.unwrap().same_task(&second));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = TaskRegistry::new();
        registry.put(task("a")).await;
        assert!(registry.remove("a").await.is_some());
        assert!(registry.remove("a").await.is_none());
        assert!(registry.remove("never").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_task_checks_identity() {
        let registry = TaskRegistry::new();
        let stale = task("a");
        let fresh = task("a");
        registry.put(fresh.clone()).await;
        assert!(!registry.remove_task(&stale).await);
        assert!(registry.get("a").await.is_some());
        assert!(registry.remove_task(&fresh).await);
        assert!(registry.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_list() {
        let registry = TaskRegistry::new();
        for id in ["a", "b", "c"] {
            registry.put(task(id)).await;
        }
        let mut ids: Vec<String> = registry.list().await.iter().map(|t| t.id().to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_put_reconciled_skips_changed_entries() {
        let registry = TaskRegistry::new();
        let live = task("live");
        let finished = task("finished");
        let replaced = task("replaced");
        for t in [&live, &finished, &replaced] {
            registry.put(t.clone()).await;
        }
        // finished 在协调期间收到终止事件并被移除
        finished.handle_done(&DoneInfo { bytes: 1, bytes_total: 1 });
        registry.remove_task(&finished).await;
        let newer = task("replaced");
        registry.put(newer.clone()).await;

        let entries = vec![
            (task("live"), Some(live.clone())),
            (task("finished"), Some(finished.clone())),
            (task("replaced"), Some(replaced.clone())),
            (task("fresh"), None),
        ];
        let written = registry.put_reconciled(entries).await;
        let mut ids: Vec<&str> = written.iter().map(|t| t.id()).collect();
        ids.sort();
        assert_eq!(ids, vec!["fresh", "live"]);
        assert!(registry.get("finished").await.is_none());
        assert!(registry.get("replaced").await.unwrap().same_task(&newer));
        assert!(!registry.get("live").await.unwrap().same_task(&live));
    }

    #[tokio::test]
    async fn test_prune_stopped() {
        let registry = TaskRegistry::new();
        let listed = task("listed");
        let gone = task("gone");
        let running = task("running");
        for t in [&listed, &gone, &running] {
            registry.put(t.clone()).await;
        }
        listed.stop().await;
        gone.stop().await;

        let keep: HashSet<&str> = ["listed"].into_iter().collect();
        let pruned = registry.prune_stopped(&keep).await;
        assert_eq!(pruned.len(), 1);
        assert!(pruned[0].same_task(&gone));
        assert_eq!(registry.len().await, 2);
        assert!(registry.get("gone").await.is_none());
    }
}
