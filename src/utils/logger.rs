use chrono::Local; // 用于获取本地时间
use log::LevelFilter; // 用于设置日志级别
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// 默认日志文件上限 10MB
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// 诊断日志，只有配置里打开 verbose_logging 时才输出
///
/// 第一个参数是任何带 `is_verbose()` 的值，通常是 `ConfigStore`。
#[macro_export]
macro_rules! diag {
    ($config:expr, $($arg:tt)+) => {
        if $config.is_verbose() {
            log::info!(target: "bgtransfer::diag", $($arg)+);
        }
    };
}

/// 按大小轮转的日志文件
pub struct RotatingFile {
    writer: BufWriter<File>,
    file_path: String,
    max_size: u64, // 最大文件大小 (bytes)
    current_size: u64,
}

impl RotatingFile {
    pub fn open(file_path: &str, max_size: u64) -> io::Result<Self> {
        // 确保日志目录存在
        if let Some(parent) = Path::new(file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            writer: BufWriter::new(file),
            file_path: file_path.to_string(),
            max_size,
            current_size,
        })
    }

    /// 超过上限时把当前文件改名为 .backup 并重新打开
    fn check_rotation(&mut self) -> io::Result<()> {
        if self.current_size > self.max_size {
            self.writer.flush()?;

            let backup_path = format!("{}.backup", self.file_path);
            if Path::new(&backup_path).exists() {
                std::fs::remove_file(&backup_path)?;
            }
            std::fs::rename(&self.file_path, &backup_path)?;

            let file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
            self.writer = BufWriter::new(file);
            self.current_size = 0;
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_rotation()?;
        let written = self.writer.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

fn build_logger(level: LevelFilter, log_file: Option<&str>) -> io::Result<env_logger::Builder> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        });
    if let Some(path) = log_file {
        let file = RotatingFile::open(path, DEFAULT_MAX_LOG_SIZE)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    Ok(builder)
}

/// 初始化全局日志，可以重复调用，只有第一次生效
pub fn init_logger(level: LevelFilter, log_file: Option<&str>) -> io::Result<()> {
    let mut builder = build_logger(level, log_file)?;
    if builder.try_init().is_err() {
        log::debug!("日志已经初始化过");
    }
    Ok(())
}
