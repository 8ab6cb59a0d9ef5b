//! 回调收到的事件负载，字段名与引擎事件中的 camelCase 键一致

use serde::{Serialize, Deserialize, Deserializer};
use serde::de::Error as _;
use std::collections::HashMap;

/// 引擎可能把字节数当作浮点数上报（例如 1000.0），统一转成整数
pub(crate) fn number_as_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(D::Error::custom(format!("字节数无效: {}", value)));
    }
    Ok(value as u64)
}

pub(crate) fn number_as_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(D::Error::custom(format!("错误码无效: {}", value)));
    }
    Ok(value as i64)
}

/// 传输开始
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginInfo {
    #[serde(default, deserialize_with = "number_as_u64")]
    pub expected_bytes: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// 传输进度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    #[serde(deserialize_with = "number_as_u64")]
    pub bytes: u64,
    #[serde(deserialize_with = "number_as_u64")]
    pub bytes_total: u64,
}

/// 传输完成
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneInfo {
    #[serde(deserialize_with = "number_as_u64")]
    pub bytes: u64,
    #[serde(deserialize_with = "number_as_u64")]
    pub bytes_total: u64,
}

/// 传输失败，来自引擎的描述与错误码
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(default)]
    pub error: String,
    #[serde(default, deserialize_with = "number_as_i64")]
    pub error_code: i64,
}
