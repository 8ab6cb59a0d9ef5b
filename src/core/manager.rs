//! 对外门面
//!
//! 应用代码只和 `BackgroundTransfer` 打交道：创建下载/上传、协调已有任务、
//! 订阅引擎事件、更新配置。返回的 `Task` 用于注册回调和本地控制。

use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::config::{ConfigStore, ConfigUpdate, ConfigWarning, TransferConfig};
use crate::diag;
use super::engine::{TransferEngine, TransferRequest};
use super::error::{BridgeError, BridgeResult};
use super::events::EngineEvent;
use super::reconcile::Reconciler;
use super::registry::TaskRegistry;
use super::router::EventRouter;
use super::task::{ErrorInfo, Task, TaskKind};

/// 上传默认使用的 HTTP 方法
pub const DEFAULT_UPLOAD_METHOD: &str = "POST";

/// 创建下载的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadOptions {
    pub id: String,
    pub url: String,
    /// 目标路径，可以是 `file://` URL
    pub destination: String,
    /// 覆盖默认请求头；值为 `None` 时删除同名默认请求头
    pub headers: HashMap<String, Option<String>>,
    /// 不是 JSON 对象时按空对象处理
    pub metadata: Option<Value>,
    pub is_allowed_over_roaming: Option<bool>,
    pub is_allowed_over_metered: Option<bool>,
    pub is_notification_visible: Option<bool>,
    pub notification_title: Option<String>,
}

impl DownloadOptions {
    pub fn new(id: impl Into<String>, url: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            destination: destination.into(),
            ..Default::default()
        }
    }
}

/// 创建上传的参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOptions {
    pub id: String,
    pub url: String,
    /// 源文件路径，可以是 `file://` URL
    pub source: String,
    /// 默认 POST
    pub method: Option<String>,
    pub headers: HashMap<String, Option<String>>,
    pub metadata: Option<Value>,
    pub is_allowed_over_roaming: Option<bool>,
    pub is_allowed_over_metered: Option<bool>,
    pub is_notification_visible: Option<bool>,
    pub notification_title: Option<String>,
}

impl UploadOptions {
    pub fn new(id: impl Into<String>, url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            source: source.into(),
            ..Default::default()
        }
    }
}

/// 两种创建请求共用的部分
struct Creation {
    id: String,
    kind: TaskKind,
    url: String,
    local_path: String,
    method: Option<String>,
    headers: HashMap<String, Option<String>>,
    metadata: Option<Value>,
    is_allowed_over_roaming: Option<bool>,
    is_allowed_over_metered: Option<bool>,
    is_notification_visible: Option<bool>,
    notification_title: Option<String>,
}

/// 引擎能提供的目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    pub documents: Option<PathBuf>,
}

fn require(field: &str, value: &str) -> BridgeResult<()> {
    if value.trim().is_empty() {
        return Err(BridgeError::invalid_argument(format!("{} 不能为空", field)));
    }
    Ok(())
}

/// `file://` URL 转成普通路径，其余原样返回
pub fn strip_file_scheme(path: &str) -> String {
    if !path.starts_with("file://") {
        return path.to_string();
    }
    match url::Url::parse(path).ok().and_then(|u| u.to_file_path().ok()) {
        Some(local) => local.to_string_lossy().to_string(),
        None => path.replacen("file://", "", 1),
    }
}

/// 默认请求头在下，调用方的在上；调用方给 `None` 表示删掉该请求头
pub fn merge_headers(
    defaults: &std::collections::BTreeMap<String, String>,
    overrides: &HashMap<String, Option<String>>,
) -> HashMap<String, String> {
    let mut merged: HashMap<String, String> = defaults
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    for (name, value) in overrides {
        match value {
            Some(value) => {
                merged.insert(name.clone(), value.clone());
            }
            None => {
                merged.remove(name);
            }
        }
    }
    merged
}

fn normalize_metadata(metadata: Option<Value>) -> Value {
    match metadata {
        Some(value @ Value::Object(_)) => value,
        _ => Value::Object(Default::default()),
    }
}

/// 后台传输桥接器
pub struct BackgroundTransfer {
    registry: TaskRegistry,
    config: Arc<ConfigStore>,
    engine: Arc<dyn TransferEngine>,
    router: EventRouter,
    reconciler: Reconciler,
    subscribed: AtomicBool,
}

impl BackgroundTransfer {
    pub fn new(engine: Arc<dyn TransferEngine>, config: TransferConfig) -> Self {
        let registry = TaskRegistry::new();
        let config = Arc::new(ConfigStore::new(config));
        let router = EventRouter::new(registry.clone(), engine.clone(), config.clone());
        let reconciler = Reconciler::new(registry.clone(), engine.clone(), config.clone());
        Self {
            registry,
            config,
            engine,
            router,
            reconciler,
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> TransferConfig {
        self.config.snapshot()
    }

    /// 合并配置更新，返回被拒绝的字段（旧值保留）
    pub fn set_config(&self, update: ConfigUpdate) -> Vec<ConfigWarning> {
        self.config.merge(update)
    }

    pub async fn download(&self, options: DownloadOptions) -> BridgeResult<Task> {
        require("id", &options.id)?;
        require("url", &options.url)?;
        require("destination", &options.destination)?;
        self.create(Creation {
            id: options.id,
            kind: TaskKind::Download,
            url: options.url,
            local_path: strip_file_scheme(&options.destination),
            method: None,
            headers: options.headers,
            metadata: options.metadata,
            is_allowed_over_roaming: options.is_allowed_over_roaming,
            is_allowed_over_metered: options.is_allowed_over_metered,
            is_notification_visible: options.is_notification_visible,
            notification_title: options.notification_title,
        })
        .await
    }

    pub async fn upload(&self, options: UploadOptions) -> BridgeResult<Task> {
        require("id", &options.id)?;
        require("url", &options.url)?;
        require("source", &options.source)?;
        let method = options
            .method
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_UPLOAD_METHOD.to_string());
        self.create(Creation {
            id: options.id,
            kind: TaskKind::Upload,
            url: options.url,
            local_path: strip_file_scheme(&options.source),
            method: Some(method),
            headers: options.headers,
            metadata: options.metadata,
            is_allowed_over_roaming: options.is_allowed_over_roaming,
            is_allowed_over_metered: options.is_allowed_over_metered,
            is_notification_visible: options.is_notification_visible,
            notification_title: options.notification_title,
        })
        .await
    }

    /// 先登记任务再请求引擎，确保引擎的第一个事件一定能找到任务
    ///
    /// 引擎拒绝时不返回错误：任务被标记为失败并移出注册表，
    /// 失败只通过 error 回调送达。
    async fn create(&self, creation: Creation) -> BridgeResult<Task> {
        let config = self.config.snapshot();
        let metadata = normalize_metadata(creation.metadata);
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| BridgeError::invalid_argument(format!("metadata 无法序列化: {}", e)))?;

        let task = Task::new(creation.id.clone(), creation.kind, metadata, self.engine.clone());
        if let Some(replaced) = self.registry.put(task.clone()).await {
            warn!("任务 {} 已存在，旧任务被替换 ({})", replaced.id(), replaced.state());
        }

        let request = TransferRequest {
            id: creation.id,
            kind: creation.kind,
            url: creation.url,
            local_path: creation.local_path,
            method: creation.method,
            headers: merge_headers(&config.headers, &creation.headers),
            metadata: metadata_json,
            progress_interval_ms: config.progress_interval_ms,
            is_allowed_over_roaming: creation.is_allowed_over_roaming.unwrap_or(true),
            is_allowed_over_metered: creation.is_allowed_over_metered.unwrap_or(true),
            is_notification_visible: creation.is_notification_visible.unwrap_or(false),
            notification_title: creation.notification_title,
        };
        diag!(self.config, "创建 {} 任务: {} -> {}", creation.kind, request.url, request.local_path);

        if let Err(e) = self.engine.create_transfer(request).await {
            error!("引擎拒绝创建任务 {}: {}", task.id(), e);
            task.handle_error(&ErrorInfo { error: e.to_string(), error_code: -1 });
            self.registry.remove_task(&task).await;
        }
        Ok(task)
    }

    /// 与引擎协调，返回仍然存活的任务
    pub async fn check_for_existing_tasks(&self) -> BridgeResult<Vec<Task>> {
        self.reconciler.reconcile().await
    }

    /// 协调后唤醒所有 Processing 任务，失败只记日志
    pub async fn ensure_tasks_are_running(&self) {
        let tasks = self.reconciler.ensure_running().await;
        debug!("唤醒检查完成，共 {} 个任务", tasks.len());
    }

    /// 宿主自行处理完成握手时调用
    pub async fn complete_handler(&self, id: &str) {
        if id.trim().is_empty() {
            warn!("complete_handler: 任务 id 为空");
            return;
        }
        if let Err(e) = self.engine.acknowledge_completion(id).await {
            warn!("任务 {} 的完成握手失败: {}", id, e);
        }
    }

    pub async fn task(&self, id: &str) -> Option<Task> {
        self.registry.get(id).await
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.registry.list().await
    }

    /// 停止任务后由调用方清理，注册表里已是别的同 id 任务时不动
    pub async fn remove_task(&self, task: &Task) -> bool {
        self.registry.remove_task(task).await
    }

    /// 订阅引擎事件流，每个实例只能订阅一次
    pub fn subscribe(&self, events: UnboundedReceiver<EngineEvent>) -> BridgeResult<JoinHandle<()>> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadySubscribed);
        }
        info!("订阅引擎事件流");
        Ok(tokio::spawn(self.router.clone().run(events)))
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn dropped_events(&self) -> u64 {
        self.router.dropped_events()
    }

    pub fn directories(&self) -> Directories {
        Directories { documents: self.engine.documents_directory() }
    }
}
