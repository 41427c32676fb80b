use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;

use super::prompt::UiRequest;
use crate::core::collaborators::DownloadObserver;
use crate::core::download::{DownloadId, DownloadRecord, LifeState};

/// 用 indicatif 显示每个下载的进度
///
/// 危险下载收完数据后，通过 `requests` 请求用户确认。
pub struct ProgressObserver {
    multi: MultiProgress,
    bars: HashMap<DownloadId, ProgressBar>,
    confirm_requested: HashSet<DownloadId>,
    requests: UnboundedSender<UiRequest>,
}

impl ProgressObserver {
    pub fn new(requests: UnboundedSender<UiRequest>) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            confirm_requested: HashSet::new(),
            requests,
        }
    }

    fn style(known_size: bool) -> ProgressStyle {
        let template = if known_size {
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ETA:{eta}"
        } else {
            "{spinner:.green} {msg} {bytes} {bytes_per_sec}"
        };
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn bar_for(&mut self, record: &DownloadRecord) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(record.id).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(record.total_bytes.unwrap_or(0)));
            bar.set_style(Self::style(record.total_bytes.is_some()));
            bar
        })
    }
}

impl DownloadObserver for ProgressObserver {
    fn model_changed(&mut self) {
        log::debug!("下载列表已更新");
    }

    fn download_updated(&mut self, record: &DownloadRecord) {
        // 历史记录中的下载不显示
        if !record.is_in_progress() && !self.bars.contains_key(&record.id) {
            return;
        }
        let name = record.file_name().unwrap_or_else(|| record.url().to_string());
        let bar = self.bar_for(record).clone();
        if let Some(total) = record.total_bytes {
            bar.set_length(total);
        }
        bar.set_position(record.received_bytes);
        bar.set_message(name.clone());

        match record.life_state {
            LifeState::Complete => {
                bar.finish_with_message(format!("✓ {}", name));
            }
            LifeState::Interrupted => {
                bar.abandon_with_message(format!("✗ {} (错误 {})", name, record.interrupt_reason.unwrap_or(0)));
            }
            LifeState::Cancelled | LifeState::Removing => {
                bar.abandon_with_message(format!("已取消 {}", name));
            }
            LifeState::InProgress => {
                if record.is_dangerous()
                    && record.all_data_saved
                    && self.confirm_requested.insert(record.id)
                {
                    let real_name = record
                        .state_info
                        .target_name
                        .clone()
                        .unwrap_or(name);
                    let _ = self.requests.send(UiRequest::ConfirmDangerous {
                        id: record.id,
                        file_name: real_name,
                    });
                }
            }
        }
    }

    fn select_file_dialog_displayed(&mut self, id: DownloadId) {
        log::debug!("下载 {} 正在等待选择保存位置", id);
    }

    fn manager_going_down(&mut self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
        self.bars.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::download::{DownloadCreateInfo, DownloadStateInfo};
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn running(url: &str) -> DownloadRecord {
        let mut info = DownloadCreateInfo::new(url);
        info.total_bytes = Some(100);
        DownloadRecord::new(DownloadId::new(), &info, false)
    }

    #[test]
    fn test_dangerous_download_asks_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut observer = ProgressObserver::new(tx);
        let mut record = running("https://example.com/setup.exe");
        record.set_file_check_results(DownloadStateInfo {
            suggested_path: PathBuf::from("/tmp/Unconfirmed 1.crdownload"),
            target_name: Some("setup.exe".to_string()),
            is_dangerous_file: true,
            ..Default::default()
        });

        observer.download_updated(&record);
        assert!(rx.try_recv().is_err());

        record.on_all_data_saved(100);
        observer.download_updated(&record);
        observer.download_updated(&record);
        match rx.try_recv() {
            Ok(UiRequest::ConfirmDangerous { id, file_name }) => {
                assert_eq!(id, record.id);
                assert_eq!(file_name, "setup.exe");
            }
            other => panic!("unexpected request: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_history_records_are_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut observer = ProgressObserver::new(tx);
        let mut record = running("https://example.com/a.zip");
        record.cancel();
        observer.download_updated(&record);
        assert!(observer.bars.is_empty());

        let record = running("https://example.com/b.zip");
        observer.download_updated(&record);
        assert_eq!(observer.bars.len(), 1);
        observer.manager_going_down();
        assert!(observer.bars.is_empty());
    }
}
