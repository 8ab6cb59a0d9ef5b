use anyhow::Result;
use std::path::Path;

use crate::config::TransferConfig;

/// 只接受带主机名的 http/https 地址
pub fn is_valid_url(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

pub fn validate_url(raw: &str) -> Result<()> {
    if !is_valid_url(raw) {
        anyhow::bail!("无效的URL: {}", raw);
    }
    Ok(())
}

pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("URL列表不能为空，请通过命令行参数或 -f 文件提供至少一个URL");
    }
    for url in urls {
        validate_url(url)?;
    }
    Ok(())
}

/// 下载目录必须存在或可以创建
pub fn validate_output_dir(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        anyhow::bail!("输出路径不能为空");
    }
    let dir = Path::new(path);
    if dir.exists() && !dir.is_dir() {
        anyhow::bail!("输出路径不是目录: {}", path);
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

pub fn validate_config(config: &TransferConfig) -> Result<()> {
    config.validate()?;
    Ok(())
}
