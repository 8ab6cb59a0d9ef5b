use anyhow::{Context, Result};
use bgtransfer::cli::Args;
use bgtransfer::core::{BackgroundTransfer, DownloadOptions, Task, TaskState};
use bgtransfer::simulator::SimulatedEngine;
use bgtransfer::ui::{self, ProgressManager, TransferSummary};
use bgtransfer::utils::{init_logger, validator};
use log::{info, warn, LevelFilter};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    let (args, config) = Args::parse_args()?;
    let level = if config.verbose_logging { LevelFilter::Debug } else { LevelFilter::Info };
    init_logger(level, config.log_file.as_deref()).context("日志初始化失败")?;
    info!("程序启动");

    let urls = args.get_urls()?;
    if !args.restore {
        validator::validate_urls(&urls)?;
    }
    validator::validate_output_dir(&args.download_dir)?;

    info!("配置文件路径: {}", args.config);
    info!("下载目录: {}", args.download_dir);
    println!("{}", config.get_summary());

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let engine = SimulatedEngine::restore(events_tx, &args.download_dir, args.state_file_path()).await;
    let bridge = BackgroundTransfer::new(Arc::new(engine), config);
    let progress = ProgressManager::new();
    let started = Instant::now();

    // 先协调再订阅，恢复出来的任务不会错过引擎已经排队的事件
    let mut tasks = Vec::new();
    if args.restore {
        bridge.ensure_tasks_are_running().await;
        for task in bridge.tasks().await {
            if task.state() == TaskState::Done {
                // 上次退出前已完成但没来得及握手
                bridge.complete_handler(task.id()).await;
                continue;
            }
            let label = task.metadata()["fileName"].as_str().unwrap_or(task.id()).to_string();
            attach(&task, &progress, &label);
            task.resume().await;
            ui::print_success(&format!("恢复任务 {} ({})", label, task.state()));
            tasks.push(task);
        }
    }

    let router = bridge.subscribe(events_rx)?;

    for url in &urls {
        let id = Uuid::new_v4().to_string();
        let file_name = extract_filename_from_url(url);
        let destination = Path::new(&args.download_dir).join(&file_name);
        let mut options = DownloadOptions::new(&id, url, destination.to_string_lossy());
        options.metadata = Some(json!({ "url": url, "fileName": file_name }));

        match bridge.download(options).await {
            Ok(task) => {
                attach(&task, &progress, &file_name);
                ui::print_success(&format!("创建下载任务: {}", file_name));
                tasks.push(task);
            }
            Err(e) => ui::print_error(&format!("创建下载任务失败: {} - {}", url, e)),
        }
    }

    if tasks.is_empty() {
        warn!("没有可传输的任务");
        println!("没有可传输的任务");
        return Ok(());
    }

    // 等到所有任务进入终止状态，Ctrl+C 时保留引擎状态以便下次 --restore
    loop {
        if tasks.iter().all(|task| task.state().is_terminal()) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\n已中断，未完成的任务可用 --restore 继续");
                break;
            }
        }
    }
    router.abort();

    let snapshots: Vec<_> = tasks.iter().map(Task::snapshot).collect();
    let summary = TransferSummary::from_snapshots(&snapshots, started.elapsed(), bridge.dropped_events());
    info!("传输结束 - 成功: {}, 失败: {}", summary.success_count, summary.failed_count);
    println!("{}", summary);
    Ok(())
}

/// 把任务回调接到进度条上
fn attach(task: &Task, progress: &ProgressManager, label: &str) {
    progress.add_task(task.id(), label, task.bytes_total().unwrap_or(0));
    if let Some(total) = task.bytes_total() {
        progress.update_progress(task.id(), task.bytes(), total);
    }

    let (p, id) = (progress.clone(), task.id().to_string());
    task.on_begin(move |info| p.begin(&id, info.expected_bytes));
    let (p, id) = (progress.clone(), task.id().to_string());
    task.on_progress(move |info| p.update_progress(&id, info.bytes, info.bytes_total));
    let (p, id) = (progress.clone(), task.id().to_string());
    task.on_done(move |info| p.finish(&id, info.bytes));
    let (p, id) = (progress.clone(), task.id().to_string());
    task.on_error(move |info| p.fail(&id, &info.error));
}

/// 从URL路径中提取文件名
fn extract_filename_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("download_{}", chrono::Utc::now().timestamp()))
}
