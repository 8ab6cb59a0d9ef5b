mod progress;

use std::fmt;
pub use progress::ProgressManager;

use crate::core::task::{TaskSnapshot, TaskState};

pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("✗ {}", message);
}

/// 一次运行结束时的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferSummary {
    pub total_tasks: usize,
    pub total_bytes: u64,
    pub elapsed_time: std::time::Duration,
    pub success_count: usize,
    pub failed_count: usize,
    pub stopped_count: usize,
    pub unfinished_count: usize,
    pub dropped_events: u64,
}

impl TransferSummary {
    pub fn from_snapshots(
        snapshots: &[TaskSnapshot],
        elapsed_time: std::time::Duration,
        dropped_events: u64,
    ) -> Self {
        let mut summary = TransferSummary {
            total_tasks: snapshots.len(),
            elapsed_time,
            dropped_events,
            ..Default::default()
        };
        for snapshot in snapshots {
            summary.total_bytes += snapshot.bytes;
            match snapshot.state {
                TaskState::Done => summary.success_count += 1,
                TaskState::Failed => summary.failed_count += 1,
                TaskState::Stopped => summary.stopped_count += 1,
                TaskState::Pending | TaskState::Processing | TaskState::Paused => summary.unfinished_count += 1,
            }
        }
        summary
    }
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n传输摘要:")?;
        writeln!(f, "任务数: {}", self.total_tasks)?;
        writeln!(f, "已传输: {}", format_size(self.total_bytes))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.success_count)?;
        writeln!(f, "失败: {}", self.failed_count)?;
        if self.stopped_count > 0 {
            writeln!(f, "已取消: {}", self.stopped_count)?;
        }
        if self.unfinished_count > 0 {
            writeln!(f, "未完成: {}（可用 --restore 继续）", self.unfinished_count)?;
        }
        if self.dropped_events > 0 {
            writeln!(f, "丢弃的事件: {}", self.dropped_events)?;
        }
        Ok(())
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
