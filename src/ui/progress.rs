use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::format_size;

const BAR_TEMPLATE: &str = "{prefix:>12} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}";

/// 每个任务一条进度条，任务回调里直接更新
///
/// 回调是同步的，所以这里用 std 的 Mutex。
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        ProgressManager {
            multi: MultiProgress::new(),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 隐藏输出，用于测试
    pub fn hidden() -> Self {
        ProgressManager {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<String, ProgressBar>> {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 添加进度条，总大小未知时先给 0
    pub fn add_task(&self, id: &str, label: &str, total: u64) {
        let pb = self.multi.add(ProgressBar::new(total));
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_prefix(label.to_string());
        pb.set_message("等待中");
        self.bars().insert(id.to_string(), pb);
    }

    pub fn begin(&self, id: &str, total: u64) {
        if let Some(pb) = self.bars().get(id) {
            if total > 0 {
                pb.set_length(total);
            }
            pb.set_message("传输中");
        }
    }

    pub fn update_progress(&self, id: &str, bytes: u64, total: u64) {
        if let Some(pb) = self.bars().get(id) {
            if total > 0 {
                pb.set_length(total);
            }
            pb.set_position(bytes);
            let percentage = if total > 0 {
                (bytes as f64 / total as f64 * 100.0) as u32
            } else {
                0
            };
            pb.set_message(format!("{}%", percentage));
        }
    }

    pub fn finish(&self, id: &str, bytes: u64) {
        if let Some(pb) = self.bars().get(id) {
            pb.set_position(bytes);
            pb.finish_with_message(format!("✓ {}", format_size(bytes)));
        }
    }

    pub fn fail(&self, id: &str, reason: &str) {
        if let Some(pb) = self.bars().get(id) {
            pb.abandon_with_message(format!("✗ {}", reason));
        }
    }

    pub fn position(&self, id: &str) -> Option<u64> {
        self.bars().get(id).map(|pb| pb.position())
    }

    pub fn len(&self) -> usize {
        self.bars().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_updates() {
        let progress = ProgressManager::hidden();
        progress.add_task("a", "a.zip", 0);
        progress.begin("a", 1000);
        progress.update_progress("a", 250, 1000);
        assert_eq!(progress.position("a"), Some(250));
        progress.finish("a", 1000);
        assert_eq!(progress.position("a"), Some(1000));
        assert_eq!(progress.len(), 1);
    }

    #[test]
    fn test_unknown_task_is_ignored() {
        let progress = ProgressManager::hidden();
        progress.update_progress("ghost", 1, 2);
        progress.fail("ghost", "boom");
        assert!(progress.is_empty());
        assert_eq!(progress.position("ghost"), None);
    }
}
