use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{entry_in_range, referrer_seen, same_origin, HistoryJournal, JournalEntry};
use crate::core::download::DbHandle;
use crate::core::error::{DownloadError, DownloadResult};

struct MemoryState {
    entries: BTreeMap<i64, JournalEntry>,
    next_handle: i64,
    visited: HashSet<String>,
}

/// 进程内历史记录，用于无痕模式和测试
pub struct MemoryJournal {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: BTreeMap::new(),
                next_handle: 1,
                visited: HashSet::new(),
            }),
            offline: AtomicBool::new(false),
        }
    }

    /// 预置历史记录
    pub fn with_entries(entries: Vec<JournalEntry>) -> Self {
        let journal = Self::new();
        {
            let mut state = journal.lock();
            for entry in entries {
                state.next_handle = state.next_handle.max(entry.db_handle + 1);
                state.entries.insert(entry.db_handle, entry);
            }
        }
        journal
    }

    pub fn record_visit(&self, url: &str) {
        self.lock().visited.insert(url.to_string());
    }

    /// 模拟存储离线：新记录拿不到句柄
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn entry(&self, db_handle: i64) -> Option<JournalEntry> {
        self.lock().entries.get(&db_handle).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // 锁内没有会 panic 的操作，中毒时直接沿用内部数据
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl HistoryJournal for MemoryJournal {
    async fn load(&self) -> DownloadResult<Vec<JournalEntry>> {
        let mut entries: Vec<_> = self.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.start_time);
        Ok(entries)
    }

    async fn add_entry(&self, mut entry: JournalEntry) -> DownloadResult<DbHandle> {
        if self.offline.load(Ordering::SeqCst) {
            return Ok(DbHandle::Uninitialized);
        }
        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        entry.db_handle = handle;
        state.entries.insert(handle, entry);
        Ok(DbHandle::Assigned(handle))
    }

    async fn update_entry(&self, entry: JournalEntry) -> DownloadResult<()> {
        let mut state = self.lock();
        match state.entries.get_mut(&entry.db_handle) {
            Some(existing) => {
                *existing = entry;
                Ok(())
            }
            None => Err(DownloadError::JournalError(format!(
                "记录不存在: {}",
                entry.db_handle
            ))),
        }
    }

    async fn remove_entry(&self, db_handle: i64) -> DownloadResult<()> {
        self.lock().entries.remove(&db_handle);
        Ok(())
    }

    async fn remove_entries_between(
        &self,
        begin: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> DownloadResult<usize> {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, e| !entry_in_range(e, begin, end));
        Ok(before - state.entries.len())
    }

    async fn check_visited_referrer_before(&self, referrer: &str) -> bool {
        let state = self.lock();
        state.visited.iter().any(|url| same_origin(url, referrer))
            || referrer_seen(referrer, state.entries.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::download::LifeState;
    use crate::core::journal::sample_entry;
    use chrono::Duration;

    #[actix_rt::test]
    async fn test_handles_are_monotonic() {
        let journal = MemoryJournal::new();
        let a = journal
            .add_entry(sample_entry(-1, "https://example.com/a", LifeState::InProgress))
            .await
            .unwrap();
        let b = journal
            .add_entry(sample_entry(-1, "https://example.com/b", LifeState::InProgress))
            .await
            .unwrap();
        assert_eq!(a, DbHandle::Assigned(1));
        assert_eq!(b, DbHandle::Assigned(2));
    }

    #[actix_rt::test]
    async fn test_offline_returns_sentinel() {
        let journal = MemoryJournal::new();
        journal.set_offline(true);
        let handle = journal
            .add_entry(sample_entry(-1, "https://example.com/a", LifeState::InProgress))
            .await
            .unwrap();
        assert_eq!(handle, DbHandle::Uninitialized);
        assert!(journal.entries().is_empty());
    }

    #[actix_rt::test]
    async fn test_load_sorted_by_start_time() {
        let now = Utc::now();
        let mut late = sample_entry(1, "https://example.com/late", LifeState::Complete);
        late.start_time = now;
        let mut early = sample_entry(2, "https://example.com/early", LifeState::Complete);
        early.start_time = now - Duration::minutes(5);

        let journal = MemoryJournal::with_entries(vec![late, early]);
        let loaded = journal.load().await.unwrap();
        assert_eq!(loaded[0].db_handle, 2);
        assert_eq!(loaded[1].db_handle, 1);
    }

    #[actix_rt::test]
    async fn test_visited_referrer() {
        let journal = MemoryJournal::with_entries(vec![sample_entry(
            1,
            "https://files.example.com/a.zip",
            LifeState::Complete,
        )]);
        assert!(journal.check_visited_referrer_before("https://files.example.com/index.html").await);
        assert!(!journal.check_visited_referrer_before("https://other.example.com/").await);

        journal.record_visit("https://other.example.com/page");
        assert!(journal.check_visited_referrer_before("https://other.example.com/").await);
        assert!(!journal.check_visited_referrer_before("").await);
    }
}
