use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use actix::Addr;

use crate::core::collaborators::DownloadFileHandler;
use crate::core::download::DownloadId;
use crate::core::prober::{FileProber, RunFileTask};

struct Transfer {
    current_path: PathBuf,
    cancelled: Arc<AtomicBool>,
}

/// 正在写入的下载，网络层和协调器共享
#[derive(Clone, Default)]
pub struct Transfers {
    inner: Arc<Mutex<HashMap<DownloadId, Transfer>>>,
}

impl Transfers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DownloadId, Transfer>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记一个写入中的文件，返回取消标记
    pub fn register(&self, id: DownloadId, path: PathBuf) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.lock().insert(
            id,
            Transfer {
                current_path: path,
                cancelled: cancelled.clone(),
            },
        );
        cancelled
    }

    pub fn current_path(&self, id: DownloadId) -> Option<PathBuf> {
        self.lock().get(&id).map(|t| t.current_path.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 移动写入中的文件，打开的文件句柄保持有效
    pub fn rename(&self, id: DownloadId, path: &Path) -> io::Result<()> {
        let mut transfers = self.lock();
        let Some(transfer) = transfers.get_mut(&id) else {
            return Ok(());
        };
        if transfer.current_path != path {
            fs::rename(&transfer.current_path, path)?;
            transfer.current_path = path.to_path_buf();
        }
        Ok(())
    }

    /// 通知写入方停止，返回需要删除的未完成文件
    pub fn cancel(&self, id: DownloadId) -> Option<PathBuf> {
        let transfer = self.lock().remove(&id)?;
        transfer.cancelled.store(true, Ordering::SeqCst);
        Some(transfer.current_path)
    }

    pub fn finish(&self, id: DownloadId) {
        self.lock().remove(&id);
    }
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("已删除未完成的文件: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("删除未完成的文件失败 {}: {}", path.display(), e),
    }
}

/// 协调器一侧的文件处理器，操作 `Transfers` 中登记的文件
///
/// 磁盘操作排到文件线程上，与协调器发给 `FileProber` 的检查和最终重命名保持先后顺序。
pub struct NetFileHandler {
    transfers: Transfers,
    file_thread: Addr<FileProber>,
}

impl NetFileHandler {
    pub fn new(transfers: Transfers, file_thread: Addr<FileProber>) -> Self {
        Self {
            transfers,
            file_thread,
        }
    }
}

impl DownloadFileHandler for NetFileHandler {
    fn rename_in_progress(&mut self, id: DownloadId, path: &Path) {
        let transfers = self.transfers.clone();
        let path = path.to_path_buf();
        self.file_thread.do_send(RunFileTask::new(move || {
            if let Err(e) = transfers.rename(id, &path) {
                log::error!("移动下载 {} 的文件到 {} 失败: {}", id, path.display(), e);
            }
        }));
    }

    fn cancel(&mut self, id: DownloadId) {
        if let Some(path) = self.transfers.cancel(id) {
            self.file_thread
                .do_send(RunFileTask::new(move || remove_partial(&path)));
        }
    }

    fn complete(&mut self, id: DownloadId) {
        self.transfers.finish(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prober::DeleteFile;

    /// 等待文件线程处理完之前排队的操作
    async fn drain(file_thread: &Addr<FileProber>, dir: &Path) {
        file_thread
            .send(DeleteFile {
                path: dir.join(".drain"),
            })
            .await
            .unwrap()
            .unwrap();
    }

    #[actix_rt::test]
    async fn test_rename_follows_file() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join(".staged.tmp");
        fs::write(&staged, b"data").unwrap();
        let transfers = Transfers::new();
        let id = DownloadId::new();
        transfers.register(id, staged.clone());

        let file_thread = FileProber::start_serial();
        let mut handler = NetFileHandler::new(transfers.clone(), file_thread.clone());
        let working = dir.path().join("a.zip.crdownload");
        fs::write(&working, b"").unwrap();
        handler.rename_in_progress(id, &working);
        drain(&file_thread, dir.path()).await;

        assert!(!staged.exists());
        assert_eq!(fs::read(&working).unwrap(), b"data");
        assert_eq!(transfers.current_path(id), Some(working));

        handler.complete(id);
        assert!(transfers.is_empty());
    }

    #[actix_rt::test]
    async fn test_cancel_sets_flag_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join(".staged.tmp");
        fs::write(&staged, b"partial").unwrap();
        let transfers = Transfers::new();
        let id = DownloadId::new();
        let cancelled = transfers.register(id, staged.clone());

        let file_thread = FileProber::start_serial();
        NetFileHandler::new(transfers.clone(), file_thread.clone()).cancel(id);
        // 取消标记立即生效，删除在文件线程上完成
        assert!(cancelled.load(Ordering::SeqCst));
        assert_eq!(transfers.len(), 0);
        drain(&file_thread, dir.path()).await;
        assert!(!staged.exists());

        // 未登记的下载直接忽略
        assert!(transfers.rename(DownloadId::new(), &dir.path().join("x")).is_ok());
        assert_eq!(transfers.cancel(DownloadId::new()), None);
    }
}
