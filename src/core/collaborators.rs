//! 协调器依赖的外部协作方
//!
//! 协调器只通过这些接口与安全检查、下载文件、界面和观察者交互，
//! 具体实现由二进制程序或测试提供。

use actix::Addr;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use url::Url;

use crate::core::download::{DownloadId, DownloadRecord};
use crate::core::journal::HistoryJournal;
use crate::core::prober::FileProber;

/// 安全检查服务
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    /// 返回 true 表示 URL 危险
    async fn check_download_url(&self, url_chain: &[String], referrer: &str) -> bool;

    /// 返回 true 表示内容哈希命中黑名单
    async fn check_download_hash(&self, url: &str, hash: &str) -> bool;
}

/// 不做任何检查
#[derive(Debug, Default, Clone)]
pub struct NoopClassifier;

#[async_trait]
impl SafetyClassifier for NoopClassifier {
    async fn check_download_url(&self, _url_chain: &[String], _referrer: &str) -> bool {
        false
    }

    async fn check_download_hash(&self, _url: &str, _hash: &str) -> bool {
        false
    }
}

/// 按主机名和内容哈希黑名单判断
#[derive(Debug, Default, Clone)]
pub struct HostBlocklistClassifier {
    hosts: HashSet<String>,
    hashes: HashSet<String>,
}

impl HostBlocklistClassifier {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.into().trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            hashes: HashSet::new(),
        }
    }

    pub fn with_hashes<I, S>(mut self, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashes = hashes.into_iter().map(|h| h.into().to_ascii_lowercase()).collect();
        self
    }

    /// 主机本身或其子域名在黑名单中
    fn host_blocked(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.hosts
            .iter()
            .any(|blocked| host == *blocked || host.ends_with(&format!(".{}", blocked)))
    }
}

#[async_trait]
impl SafetyClassifier for HostBlocklistClassifier {
    async fn check_download_url(&self, url_chain: &[String], _referrer: &str) -> bool {
        url_chain.iter().any(|url| self.host_blocked(url))
    }

    async fn check_download_hash(&self, _url: &str, hash: &str) -> bool {
        self.hashes.contains(&hash.to_ascii_lowercase())
    }
}

/// 负责实际写入数据的一方（网络层）
pub trait DownloadFileHandler: Send {
    /// 把正在写入的文件移动到 `path`
    fn rename_in_progress(&mut self, id: DownloadId, path: &Path);
    fn cancel(&mut self, id: DownloadId);
    /// 下载已完成，释放相关资源
    fn complete(&mut self, id: DownloadId);
}

pub trait DownloadUi: Send {
    fn show_download_started(&mut self, record: &DownloadRecord);
    /// 弹出保存对话框；结果通过 `FileSelected` / `FileSelectionCancelled` 返回
    fn choose_download_path(&mut self, id: DownloadId, suggested_path: &Path);
}

/// 下载列表的观察者
pub trait DownloadObserver: Send {
    /// 下载集合发生变化（新增、删除、批量清理）
    fn model_changed(&mut self);

    fn download_updated(&mut self, _record: &DownloadRecord) {}

    fn select_file_dialog_displayed(&mut self, _id: DownloadId) {}

    fn manager_going_down(&mut self) {}
}

/// 只写日志的文件处理器
#[derive(Debug, Default)]
pub struct LoggingFileHandler;

impl DownloadFileHandler for LoggingFileHandler {
    fn rename_in_progress(&mut self, id: DownloadId, path: &Path) {
        log::debug!("下载 {} 写入 {}", id, path.display());
    }

    fn cancel(&mut self, id: DownloadId) {
        log::debug!("下载 {} 已取消", id);
    }

    fn complete(&mut self, id: DownloadId) {
        log::debug!("下载 {} 已完成", id);
    }
}

/// 无界面时使用，保存对话框不会被回应
#[derive(Debug, Default)]
pub struct HeadlessUi;

impl DownloadUi for HeadlessUi {
    fn show_download_started(&mut self, record: &DownloadRecord) {
        log::info!("开始下载: {}", record.url());
    }

    fn choose_download_path(&mut self, id: DownloadId, suggested_path: &Path) {
        log::warn!("下载 {} 需要选择保存位置 ({})，但没有可用的界面", id, suggested_path.display());
    }
}

/// 协调器的全部协作方
pub struct Collaborators {
    pub journal: Arc<dyn HistoryJournal>,
    pub prober: Addr<FileProber>,
    pub classifier: Arc<dyn SafetyClassifier>,
    pub file_handler: Box<dyn DownloadFileHandler>,
    pub ui: Box<dyn DownloadUi>,
}

impl Collaborators {
    pub fn new(journal: Arc<dyn HistoryJournal>, prober: Addr<FileProber>) -> Self {
        Self {
            journal,
            prober,
            classifier: Arc::new(NoopClassifier),
            file_handler: Box::new(LoggingFileHandler),
            ui: Box::new(HeadlessUi),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SafetyClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_file_handler(mut self, file_handler: Box<dyn DownloadFileHandler>) -> Self {
        self.file_handler = file_handler;
        self
    }

    pub fn with_ui(mut self, ui: Box<dyn DownloadUi>) -> Self {
        self.ui = ui;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_host_blocklist() {
        let classifier = HostBlocklistClassifier::new(["bad.example.com", " "]);
        let chain = vec![
            "https://cdn.example.com/a".to_string(),
            "https://files.bad.example.com/a.exe".to_string(),
        ];
        assert!(classifier.check_download_url(&chain, "").await);
        assert!(
            !classifier
                .check_download_url(&["https://notbad.example.com/".to_string()], "")
                .await
        );
        assert!(!classifier.check_download_url(&[], "").await);
    }

    #[actix_rt::test]
    async fn test_hash_blocklist() {
        let classifier = HostBlocklistClassifier::new(Vec::<String>::new()).with_hashes(["ABCDEF"]);
        assert!(classifier.check_download_hash("https://example.com/a", "abcdef").await);
        assert!(!classifier.check_download_hash("https://example.com/a", "123456").await);
        assert!(!NoopClassifier.check_download_hash("https://example.com/a", "abcdef").await);
    }
}
