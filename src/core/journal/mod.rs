//! 历史记录适配层
//!
//! 协调器把持久化存储当作一个异步日志来使用：新下载确定路径后写入一条记录，
//! 并拿到持久句柄；之后的进度与状态变化以“覆盖写”的方式同步。

mod json;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::core::download::{DangerType, DbHandle, LifeState};
use crate::core::error::DownloadResult;

pub use json::JsonJournal;
pub use memory::MemoryJournal;

/// 每个已持久化的下载对应一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub db_handle: i64,
    pub url_chain: Vec<String>,
    pub referrer: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
    pub full_path: PathBuf,
    pub state: LifeState,
    pub danger_type: DangerType,
}

/// 持久化历史记录
///
/// 所有方法的结果都会回到协调器的控制线程上处理。
#[async_trait]
pub trait HistoryJournal: Send + Sync {
    /// 读取全部记录，按开始时间升序返回
    async fn load(&self) -> DownloadResult<Vec<JournalEntry>>;

    /// 写入新记录并分配句柄。存储不可用时返回 `DbHandle::Uninitialized`
    async fn add_entry(&self, entry: JournalEntry) -> DownloadResult<DbHandle>;

    async fn update_entry(&self, entry: JournalEntry) -> DownloadResult<()>;

    async fn remove_entry(&self, db_handle: i64) -> DownloadResult<()>;

    /// 删除 `[begin, end)` 内已结束的记录，`end` 为空表示不设上限
    async fn remove_entries_between(
        &self,
        begin: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> DownloadResult<usize>;

    /// 引用页是否曾经访问过
    async fn check_visited_referrer_before(&self, referrer: &str) -> bool;
}

/// 比较两个 URL 的来源（协议 + 主机 + 端口）
pub(crate) fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin() && a.origin().is_tuple(),
        _ => false,
    }
}

pub(crate) fn entry_in_range(
    entry: &JournalEntry,
    begin: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> bool {
    entry.start_time >= begin
        && end.map_or(true, |end| entry.start_time < end)
        && entry.state.is_terminal()
}

pub(crate) fn referrer_seen<'a>(
    referrer: &str,
    entries: impl IntoIterator<Item = &'a JournalEntry>,
) -> bool {
    if referrer.is_empty() {
        return false;
    }
    entries.into_iter().any(|entry| {
        same_origin(&entry.referrer, referrer)
            || entry.url_chain.iter().any(|url| same_origin(url, referrer))
    })
}

#[cfg(test)]
pub(crate) fn sample_entry(handle: i64, url: &str, state: LifeState) -> JournalEntry {
    JournalEntry {
        db_handle: handle,
        url_chain: vec![url.to_string()],
        referrer: String::new(),
        start_time: Utc::now(),
        end_time: None,
        received_bytes: 0,
        total_bytes: None,
        full_path: PathBuf::from(format!("/tmp/entry-{}", handle)),
        state,
        danger_type: DangerType::NotDangerous,
    }
}
