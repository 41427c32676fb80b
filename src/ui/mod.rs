mod progress;
mod prompt;

use crossterm::style::Stylize;
use std::fmt;

use crate::core::download::{DownloadRecord, LifeState, SafetyState};
pub use progress::ProgressObserver;
pub use prompt::{parse_confirm_answer, parse_path_answer, ConsoleUi, UiRequest};

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message.red());
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message.yellow());
}

/// 一行下载记录，用于 list / search 输出
pub fn format_record(record: &DownloadRecord) -> String {
    let handle = record
        .db_handle
        .value()
        .map(|h| h.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut flags = Vec::new();
    if record.safety_state == SafetyState::Dangerous {
        flags.push("危险");
    }
    if record.file_externally_removed {
        flags.push("文件已删除");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    format!(
        "{:>5}  {}  {:<6}  {:>10}  {}{}\n       {}",
        handle,
        record.start_time.format("%Y-%m-%d %H:%M"),
        record.life_state.to_string(),
        format_size(record.received_bytes),
        record.file_name().unwrap_or_default(),
        flags,
        record.url()
    )
}

/// 本次运行的下载摘要
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub elapsed_time: std::time::Duration,
    pub success_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
}

impl DownloadSummary {
    pub fn add(&mut self, record: &DownloadRecord) {
        self.total_files += 1;
        match record.life_state {
            LifeState::Complete => {
                self.success_count += 1;
                self.total_size += record.received_bytes;
            }
            LifeState::Interrupted => self.failed_count += 1,
            _ => self.cancelled_count += 1,
        }
    }
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n下载摘要:")?;
        writeln!(f, "总文件数: {}", self.total_files)?;
        writeln!(f, "总大小: {}", format_size(self.total_size))?;
        writeln!(f, "耗时: {:.2}秒", self.elapsed_time.as_secs_f64())?;
        writeln!(f, "成功: {}", self.success_count)?;
        writeln!(f, "失败: {}", self.failed_count)?;
        writeln!(f, "取消: {}", self.cancelled_count)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::download::{DownloadCreateInfo, DownloadId};
    use std::path::PathBuf;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024 * 1024), "5120.00 GB");
    }

    #[test]
    fn test_summary_counts() {
        let info = DownloadCreateInfo::new("https://example.com/a.zip");
        let mut done = DownloadRecord::new(DownloadId::new(), &info, false);
        done.on_all_data_saved(2048);
        done.on_renamed_to_final(PathBuf::from("/tmp/a.zip"), 0);
        let mut failed = DownloadRecord::new(DownloadId::new(), &info, false);
        failed.interrupted(10, -2);
        let mut cancelled = DownloadRecord::new(DownloadId::new(), &info, false);
        cancelled.cancel();

        let mut summary = DownloadSummary::default();
        for record in [&done, &failed, &cancelled] {
            summary.add(record);
        }
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.cancelled_count, 1);
        assert_eq!(summary.total_size, 2048);
        assert!(summary.to_string().contains("总大小: 2.00 KB"));
    }

    #[test]
    fn test_format_record() {
        let info = DownloadCreateInfo::new("https://example.com/report.pdf");
        let mut record = DownloadRecord::new(DownloadId::new(), &info, false);
        record.on_path_determined(PathBuf::from("/tmp/report.pdf"));
        record.mark_url_dangerous();
        let line = format_record(&record);
        assert!(line.contains("report.pdf"));
        assert!(line.contains("危险"));
        assert!(line.trim_start().starts_with('-'));
    }
}
