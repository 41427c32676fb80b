use crossterm::style::Stylize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;

use crate::core::collaborators::DownloadUi;
use crate::core::download::{DownloadId, DownloadRecord};

/// 需要在终端上询问用户的事情，由主循环读取标准输入后回复协调器
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiRequest {
    ChoosePath {
        id: DownloadId,
        suggested_path: PathBuf,
    },
    ConfirmDangerous {
        id: DownloadId,
        file_name: String,
    },
}

/// 终端版的下载界面
pub struct ConsoleUi {
    requests: UnboundedSender<UiRequest>,
}

impl ConsoleUi {
    pub fn new(requests: UnboundedSender<UiRequest>) -> Self {
        Self { requests }
    }
}

impl DownloadUi for ConsoleUi {
    fn show_download_started(&mut self, record: &DownloadRecord) {
        let path = record
            .final_path
            .as_deref()
            .map(Path::display)
            .map(|p| p.to_string())
            .unwrap_or_default();
        println!("{} {} -> {}", "↓".cyan(), record.url(), path);
    }

    fn choose_download_path(&mut self, id: DownloadId, suggested_path: &Path) {
        let request = UiRequest::ChoosePath {
            id,
            suggested_path: suggested_path.to_path_buf(),
        };
        if self.requests.send(request).is_err() {
            log::warn!("界面已关闭，无法询问下载 {} 的保存位置", id);
        }
    }
}

/// 解析用户输入的保存路径：空行表示接受建议，`q` 表示取消
pub fn parse_path_answer(answer: &str, suggested: &Path) -> Option<PathBuf> {
    match answer.trim() {
        "" => Some(suggested.to_path_buf()),
        "q" | "Q" => None,
        other => Some(PathBuf::from(other)),
    }
}

pub fn parse_confirm_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "是")
}
