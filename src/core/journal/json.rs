use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{entry_in_range, referrer_seen, HistoryJournal, JournalEntry};
use crate::core::download::DbHandle;
use crate::core::error::{DownloadError, DownloadResult};

const JOURNAL_VERSION: u32 = 1;

/// 历史记录文件的磁盘格式
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct JournalFile {
    version: u32,
    next_handle: i64,
    entries: Vec<JournalEntry>,
}

/// 基于 JSON 文件的历史记录
///
/// 每次修改都会整体重写文件：先写临时文件，再重命名覆盖，避免写到一半时崩溃留下损坏的数据。
pub struct JsonJournal {
    path: PathBuf,
    state: Mutex<Option<JournalFile>>,
}

impl JsonJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 等待已经开始的写入完成
    pub async fn flush(&self) {
        let _guard = self.state.lock().await;
    }

    async fn read_file(&self) -> DownloadResult<JournalFile> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => {
                let mut file: JournalFile = serde_json::from_str(&data)?;
                let max_handle = file.entries.iter().map(|e| e.db_handle).max().unwrap_or(0);
                file.next_handle = file.next_handle.max(max_handle + 1).max(1);
                Ok(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JournalFile {
                version: JOURNAL_VERSION,
                next_handle: 1,
                entries: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, file: &JournalFile) -> DownloadResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// 取得（必要时加载）内存中的记录，在副本上执行修改并写回磁盘
    ///
    /// 写盘失败时内存中的记录保持不变。
    async fn modify<T>(
        &self,
        f: impl FnOnce(&mut JournalFile) -> DownloadResult<T> + Send,
    ) -> DownloadResult<T> {
        let mut guard = self.state.lock().await;
        let mut file = match guard.as_ref() {
            Some(file) => file.clone(),
            None => self.read_file().await?,
        };
        let result = f(&mut file)?;
        self.persist(&file).await?;
        *guard = Some(file);
        Ok(result)
    }
}

#[async_trait]
impl HistoryJournal for JsonJournal {
    async fn load(&self) -> DownloadResult<Vec<JournalEntry>> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_file().await?);
        }
        let mut entries = guard
            .as_ref()
            .map(|file| file.entries.clone())
            .unwrap_or_default();
        drop(guard);
        entries.sort_by_key(|e| e.start_time);
        log::info!("从 {} 加载了 {} 条下载记录", self.path.display(), entries.len());
        Ok(entries)
    }

    async fn add_entry(&self, mut entry: JournalEntry) -> DownloadResult<DbHandle> {
        self.modify(move |file| {
            let handle = file.next_handle;
            file.next_handle += 1;
            entry.db_handle = handle;
            file.entries.push(entry);
            Ok(DbHandle::Assigned(handle))
        })
        .await
    }

    async fn update_entry(&self, entry: JournalEntry) -> DownloadResult<()> {
        self.modify(move |file| {
            match file.entries.iter_mut().find(|e| e.db_handle == entry.db_handle) {
                Some(existing) => {
                    *existing = entry;
                    Ok(())
                }
                None => Err(DownloadError::JournalError(format!(
                    "记录不存在: {}",
                    entry.db_handle
                ))),
            }
        })
        .await
    }

    async fn remove_entry(&self, db_handle: i64) -> DownloadResult<()> {
        self.modify(move |file| {
            file.entries.retain(|e| e.db_handle != db_handle);
            Ok(())
        })
        .await
    }

    async fn remove_entries_between(
        &self,
        begin: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> DownloadResult<usize> {
        self.modify(move |file| {
            let before = file.entries.len();
            file.entries.retain(|e| !entry_in_range(e, begin, end));
            Ok(before - file.entries.len())
        })
        .await
    }

    async fn check_visited_referrer_before(&self, referrer: &str) -> bool {
        let guard = self.state.lock().await;
        match guard.as_ref() {
            Some(file) => referrer_seen(referrer, &file.entries),
            None => false,
        }
    }
}
