//! 日志：`log` 门面 + `env_logger` 后端，写入按大小轮转的日志文件

use chrono::Local;
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::core::error::DownloadError;

/// 超过 `max_size` 后把当前文件改名为 `<file>.backup` 并重新开始
pub struct RotatingFile {
    file: File,
    file_path: PathBuf,
    max_size: u64,
    current_size: u64,
}

impl RotatingFile {
    pub fn open(file_path: impl Into<PathBuf>, max_size: u64) -> io::Result<Self> {
        let file_path = file_path.into();
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
        let current_size = file.metadata()?.len();
        Ok(Self {
            file,
            file_path,
            max_size,
            current_size,
        })
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.file_path.as_os_str().to_os_string();
        name.push(".backup");
        PathBuf::from(name)
    }

    fn check_rotation(&mut self) -> io::Result<()> {
        if self.current_size <= self.max_size {
            return Ok(());
        }
        self.file.flush()?;
        let backup_path = self.backup_path();
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(&self.file_path, &backup_path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_rotation()?;
        let written = self.file.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// 解析配置中的日志级别，无法识别时返回 None
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    level.parse().ok()
}

/// 初始化全局日志。`DLCOORD_LOG` 环境变量可以覆盖配置的级别
pub fn init(log_file: &Path, level: LevelFilter, max_size: u64) -> Result<(), DownloadError> {
    let target = RotatingFile::open(log_file, max_size)?;
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env(env_logger::Env::new().filter("DLCOORD_LOG"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(target)))
        .try_init()
        .map_err(|e| DownloadError::ConfigError(format!("日志初始化失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_moves_full_file_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("app.log");
        let mut file = RotatingFile::open(&path, 16).unwrap();

        file.write_all(b"first line of log\n").unwrap();
        file.write_all(b"second\n").unwrap();
        file.flush().unwrap();

        let backup = file.backup_path();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "first line of log\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[test]
    fn test_existing_size_counts_toward_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, vec![b'x'; 32]).unwrap();

        let mut file = RotatingFile::open(&path, 16).unwrap();
        file.write_all(b"new\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(fs::read(file.backup_path()).unwrap().len(), 32);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("WARN"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("chatty"), None);
    }
}
