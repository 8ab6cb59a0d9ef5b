use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

use crate::core::error::{BridgeError, BridgeResult};

/// 进度上报间隔的下限（毫秒）
pub const MIN_PROGRESS_INTERVAL_MS: u64 = 250;
/// 默认进度上报间隔（毫秒）
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// 每个传输请求都会带上的默认请求头
    pub headers: BTreeMap<String, String>,
    /// 引擎上报进度的最小间隔（毫秒）
    pub progress_interval_ms: u64,
    /// 是否输出逐事件的诊断日志
    pub verbose_logging: bool,
    /// 日志文件路径，不设置则只输出到终端
    pub log_file: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            verbose_logging: false,
            log_file: None,
        }
    }
}

impl TransferConfig {
    /// 加载配置文件，文件不存在或格式错误时写入默认配置
    pub fn load(path: &str) -> BridgeResult<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    warn!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = TransferConfig::default();
                    config.save_with_tutorial(path)?;
                    Ok(config)
                }
            }
        } else {
            let config = TransferConfig::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> BridgeResult<()> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Self::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    fn generate_tutorial_content() -> &'static str {
        r#"# bgtransfer 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖这里的设置，优先级：命令行 > 配置文件 > 默认值
#
# progress_interval_ms
#   引擎上报进度的最小间隔（毫秒），不能小于 250，默认 1000
#
# verbose_logging
#   为 true 时记录每一条引擎事件的诊断日志
#
# log_file
#   日志文件路径，例如 "logs/bgtransfer.log"，超过 10MB 自动轮转
#
# [headers]
#   每个传输请求都会带上的默认请求头，单次请求的同名请求头优先，例如：
#   Authorization = "Bearer xxx"
#
# ==================== 配置项 ====================
"#
    }

    /// 校验配置合法性
    pub fn validate(&self) -> BridgeResult<()> {
        if self.progress_interval_ms < MIN_PROGRESS_INTERVAL_MS {
            return Err(BridgeError::config(format!(
                "progress_interval_ms 必须 >= {}，当前为 {}",
                MIN_PROGRESS_INTERVAL_MS, self.progress_interval_ms
            )));
        }
        if self.headers.keys().any(|name| name.trim().is_empty()) {
            return Err(BridgeError::config("请求头名称不能为空"));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(interval) = args.progress_interval_ms {
            self.progress_interval_ms = interval;
        }
        if args.verbose {
            self.verbose_logging = true;
        }
        for (name, value) in args.parsed_headers() {
            self.headers.insert(name, value);
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 进度间隔: {} 毫秒\n\
            - 默认请求头: {}\n\
            - 诊断日志: {}\n\
            - 日志文件: {}",
            self.progress_interval_ms,
            if self.headers.is_empty() {
                "无".to_string()
            } else {
                self.headers.keys().cloned().collect::<Vec<_>>().join(", ")
            },
            if self.verbose_logging { "启用" } else { "禁用" },
            self.log_file.as_deref().unwrap_or("无"),
        )
    }
}

/// 一次配置更新，未设置的字段保持原值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub headers: Option<BTreeMap<String, String>>,
    pub progress_interval_ms: Option<u64>,
    pub verbose_logging: Option<bool>,
}

/// 被拒绝的配置字段，旧值保留
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    #[error("progress_interval_ms 必须 >= {min}，传入的是 {given}，保留原值")]
    ProgressIntervalTooSmall {
        given: u64,
        min: u64,
    },
}

/// 进程级配置
///
/// 合并在写锁内完成读改写；每次发起传输时通过 `snapshot` 取当时的值。
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: RwLock<TransferConfig>,
}

impl ConfigStore {
    pub fn new(config: TransferConfig) -> Self {
        Self { inner: RwLock::new(config) }
    }

    pub fn snapshot(&self) -> TransferConfig {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_verbose(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).verbose_logging
    }

    /// 合并更新，返回被拒绝的字段
    pub fn merge(&self, update: ConfigUpdate) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut config = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(headers) = update.headers {
            config.headers = headers;
        }

        if let Some(interval) = update.progress_interval_ms {
            if interval >= MIN_PROGRESS_INTERVAL_MS {
                config.progress_interval_ms = interval;
            } else {
                let warning = ConfigWarning::ProgressIntervalTooSmall {
                    given: interval,
                    min: MIN_PROGRESS_INTERVAL_MS,
                };
                warn!("{}", warning);
                warnings.push(warning);
            }
        }

        if let Some(verbose) = update.verbose_logging {
            config.verbose_logging = verbose;
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TransferConfig::default();
        assert!(config.headers.is_empty());
        assert_eq!(config.progress_interval_ms, 1000);
        assert!(!config.verbose_logging);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TransferConfig::default();
        config.progress_interval_ms = 100;
        assert!(config.validate().is_err());

        config = TransferConfig::default();
        config.headers.insert(" ".into(), "x".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let mut config = TransferConfig::default();
        config.progress_interval_ms = 500;
        config.headers.insert("Authorization".into(), "Bearer t".into());
        let path = std::env::temp_dir().join(format!("bgtransfer_cfg_{}.toml", std::process::id()));
        let path = path.to_string_lossy().to_string();

        config.save_with_tutorial(&path).expect("保存带教程的配置失败");
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("bgtransfer 配置文件"));
        let loaded = TransferConfig::load(&path).expect("加载配置失败");
        assert_eq!(loaded, config);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_config_load_malformed_falls_back() {
        let path = std::env::temp_dir().join(format!("bgtransfer_bad_{}.toml", std::process::id()));
        let path = path.to_string_lossy().to_string();
        fs::write(&path, "progress_interval_ms = \"fast\"").unwrap();
        let loaded = TransferConfig::load(&path).unwrap();
        assert_eq!(loaded, TransferConfig::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_config_summary() {
        let summary = TransferConfig::default().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("1000"));
        assert!(summary.contains("禁用"));
    }

    #[test]
    fn test_merge_rejects_small_interval() {
        let store = ConfigStore::default();
        let warnings = store.merge(ConfigUpdate {
            progress_interval_ms: Some(100),
            ..Default::default()
        });
        assert_eq!(
            warnings,
            vec![ConfigWarning::ProgressIntervalTooSmall { given: 100, min: MIN_PROGRESS_INTERVAL_MS }]
        );
        assert_eq!(store.snapshot().progress_interval_ms, DEFAULT_PROGRESS_INTERVAL_MS);
    }

    #[test]
    fn test_merge_applies_valid_fields() {
        let store = ConfigStore::default();
        let mut headers = BTreeMap::new();
        headers.insert("X-Token".to_string(), "abc".to_string());
        let warnings = store.merge(ConfigUpdate {
            headers: Some(headers.clone()),
            progress_interval_ms: Some(MIN_PROGRESS_INTERVAL_MS),
            verbose_logging: Some(true),
        });
        assert!(warnings.is_empty());
        let config = store.snapshot();
        assert_eq!(config.headers, headers);
        assert_eq!(config.progress_interval_ms, MIN_PROGRESS_INTERVAL_MS);
        assert!(store.is_verbose());
    }

    #[test]
    fn test_merge_partial_keeps_other_fields() {
        let store = ConfigStore::default();
        store.merge(ConfigUpdate { progress_interval_ms: Some(2000), ..Default::default() });
        store.merge(ConfigUpdate { progress_interval_ms: Some(1), verbose_logging: Some(true), ..Default::default() });
        let config = store.snapshot();
        assert_eq!(config.progress_interval_ms, 2000);
        assert!(config.verbose_logging);
    }
}
