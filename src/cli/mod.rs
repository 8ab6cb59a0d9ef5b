//! CLI: 演示程序的命令行接口
//!
//! ## 主要功能
//!
//! - 命令行参数解析
//! - 配置文件路径管理（不存在时生成带注释的默认配置）
//! - URL 列表处理（命令行参数和文件）
//! - `--restore` 恢复上一次会话，演示重启后的任务协调
//!
//! ## 支持的命令
//!
//! - 基本下载：`bgtransfer <url>`
//! - 批量下载：`bgtransfer -f urls.txt`
//! - 编辑配置：`bgtransfer -e`
//! - 恢复会话：`bgtransfer --restore`
//! - 附加请求头：`bgtransfer -H "Authorization: Bearer xxx" <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/bgtransfer/bgtransfer.toml`
//! - macOS: `~/Library/Application Support/bgtransfer/bgtransfer.toml`
//! - Linux: `~/.config/bgtransfer/bgtransfer.toml`

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::TransferConfig;
use crate::utils::validator;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/bgtransfer/bgtransfer.toml", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/bgtransfer/bgtransfer.toml", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/bgtransfer/bgtransfer.toml", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

fn get_default_download_dir() -> String {
    env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}

/// bgtransfer 命令行参数
///
/// 示例用法：
///   bgtransfer "https://example.com/file.zip?size=1048576"
///   bgtransfer -i 250 -v https://example.com/a.bin https://example.com/b.bin
///   bgtransfer --restore
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bgtransfer",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "后台传输任务注册表演示程序",
    long_about = "用模拟引擎演示后台下载的创建、事件路由与重启后的任务协调。\n\n示例：\n  bgtransfer https://example.com/file.zip\n  bgtransfer -e\n  bgtransfer --restore\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表。URL 上的 size=N 参数决定模拟文件大小，fail=1 模拟失败。")]
    pub urls: Vec<String>,

    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL，# 开头为注释。")]
    pub file: Option<String>,

    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    #[arg(long, short = 'd', default_value_t = get_default_download_dir(), help = "下载目录，默认当前工作目录。")]
    pub download_dir: String,

    #[arg(long, short = 'i', help = "进度上报间隔（毫秒），覆盖配置文件，不能小于 250。")]
    pub progress_interval_ms: Option<u64>,

    #[arg(long, short = 'v', help = "输出逐事件的诊断日志。")]
    pub verbose: bool,

    /// 形如 "Name: value"
    #[arg(long = "header", short = 'H', help = "附加默认请求头，格式 \"Name: value\"，可重复。")]
    pub headers: Vec<String>,

    #[arg(long, help = "恢复上一次会话中未完成的任务。")]
    pub restore: bool,

    #[arg(long, help = "模拟引擎的状态文件，默认在下载目录下。")]
    pub state_file: Option<String>,
}

impl Args {
    /// 解析命令行并加载配置（命令行 > 配置文件 > 默认值）
    pub fn parse_args() -> Result<(Self, TransferConfig)> {
        let args = Args::parse();

        if args.edit_config {
            if !Path::new(&args.config).exists() {
                TransferConfig::default()
                    .save_with_tutorial(&args.config)
                    .with_context(|| format!("无法创建配置文件 {}", args.config))?;
            }
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let config = args.load_config()?;
        Ok((args, config))
    }

    /// 加载配置文件并合并命令行参数
    pub fn load_config(&self) -> Result<TransferConfig> {
        let mut config = TransferConfig::load(&self.config)
            .with_context(|| format!("无法读取配置文件 {}", self.config))?;
        config.merge_from_args(self);
        config.validate().context("配置无效")?;
        Ok(config)
    }

    /// 解析 -H 参数，格式不对的直接跳过
    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter_map(|raw| match raw.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    Some((name.trim().to_string(), value.trim().to_string()))
                }
                _ => {
                    warn!("忽略格式错误的请求头: {}", raw);
                    None
                }
            })
            .collect()
    }

    pub fn state_file_path(&self) -> PathBuf {
        match &self.state_file {
            Some(path) => PathBuf::from(path),
            None => Path::new(&self.download_dir).join(".bgtransfer-state.json"),
        }
    }

    /// 合并命令行与文件中的 URL，可以为空（例如只恢复会话时）
    pub fn get_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for url in &self.urls {
            validator::validate_url(url)?;
            urls.push(url.clone());
        }

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path)
                .with_context(|| format!("无法读取URL文件 {}", file_path))?;
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    validator::validate_url(line)?;
                    urls.push(line.to_string());
                }
            }
        }

        Ok(urls)
    }
}
