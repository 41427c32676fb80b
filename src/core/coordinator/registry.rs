use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::core::download::{DbHandle, DownloadId, DownloadRecord, LifeState};

/// 一条记录在各个索引中的归属
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexMembership {
    pub in_master: bool,
    pub active: bool,
    pub in_progress: bool,
    pub history: bool,
    pub awaiting_handle: bool,
    pub save_page: bool,
}

impl IndexMembership {
    pub fn in_any_index(&self) -> bool {
        self.active || self.in_progress || self.history || self.awaiting_handle || self.save_page
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("{index} 索引引用了不存在的下载 {id}")]
    DanglingReference { index: &'static str, id: DownloadId },

    #[error("下载 {0} 不在任何索引中")]
    Orphan(DownloadId),

    #[error("句柄 {handle} 指向的下载 {id} 句柄不一致")]
    HandleMismatch { handle: i64, id: DownloadId },

    #[error("下载 {0} 已分配句柄但不在历史索引中")]
    UnindexedHandle(DownloadId),

    #[error("活动下载 {0} 不处于下载中状态")]
    ActiveNotInProgress(DownloadId),

    #[error("下载中的 {0} 不在活动索引中")]
    InProgressNotActive(DownloadId),

    #[error("进行中索引的 {0} 不在活动索引中")]
    InProgressOutsideActive(DownloadId),

    #[error("下载 {0} 处于删除中状态却仍被持有")]
    RemovingHeld(DownloadId),

    #[error("等待句柄的下载 {0} 状态错误")]
    AwaitingMismatch(DownloadId),
}

/// 下载记录的唯一所有者，以及指向它们的各个索引
///
/// - `active`: 仍在下载中的记录
/// - `in_progress`: 已确定路径、尚未进入最终重命名的记录（`active` 的子集）
/// - `history`: 已分配持久句柄的记录
/// - `awaiting_handle`: 已结束、但历史记录写入仍未返回句柄的记录
/// - `save_page`: 由外部直接写入的“网页另存为”下载
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    downloads: HashMap<DownloadId, DownloadRecord>,
    active: HashSet<DownloadId>,
    in_progress: HashSet<DownloadId>,
    history: BTreeMap<i64, DownloadId>,
    awaiting_handle: HashSet<DownloadId>,
    save_page: HashSet<DownloadId>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    pub fn insert_active(&mut self, record: DownloadRecord) {
        let id = record.id;
        self.downloads.insert(id, record);
        self.active.insert(id);
    }

    /// 历史记录中恢复的下载，句柄冲突时返回 false
    pub fn insert_history(&mut self, record: DownloadRecord) -> bool {
        let Some(handle) = record.db_handle.value() else {
            return false;
        };
        if self.history.contains_key(&handle) {
            return false;
        }
        let id = record.id;
        self.downloads.insert(id, record);
        self.history.insert(handle, id);
        true
    }

    pub fn insert_save_page(&mut self, record: DownloadRecord) {
        let id = record.id;
        self.downloads.insert(id, record);
        self.save_page.insert(id);
    }

    pub fn get(&self, id: DownloadId) -> Option<&DownloadRecord> {
        self.downloads.get(&id)
    }

    pub fn get_mut(&mut self, id: DownloadId) -> Option<&mut DownloadRecord> {
        self.downloads.get_mut(&id)
    }

    /// 只返回活动中的记录
    pub fn active(&self, id: DownloadId) -> Option<&DownloadRecord> {
        if self.active.contains(&id) {
            self.downloads.get(&id)
        } else {
            None
        }
    }

    pub fn active_mut(&mut self, id: DownloadId) -> Option<&mut DownloadRecord> {
        if self.active.contains(&id) {
            self.downloads.get_mut(&id)
        } else {
            None
        }
    }

    pub fn is_active(&self, id: DownloadId) -> bool {
        self.active.contains(&id)
    }

    pub fn is_save_page(&self, id: DownloadId) -> bool {
        self.save_page.contains(&id)
    }

    pub fn id_for_handle(&self, handle: i64) -> Option<DownloadId> {
        self.history.get(&handle).copied()
    }

    pub fn by_handle(&self, handle: i64) -> Option<&DownloadRecord> {
        self.id_for_handle(handle).and_then(|id| self.downloads.get(&id))
    }

    pub fn mark_in_progress(&mut self, id: DownloadId) {
        if self.active.contains(&id) {
            self.in_progress.insert(id);
        }
    }

    pub fn leave_in_progress(&mut self, id: DownloadId) {
        self.in_progress.remove(&id);
    }

    pub fn leave_active(&mut self, id: DownloadId) {
        self.in_progress.remove(&id);
        self.active.remove(&id);
    }

    pub fn leave_save_page(&mut self, id: DownloadId) {
        self.save_page.remove(&id);
    }

    /// 记录持久句柄并加入历史索引
    pub fn attach_handle(&mut self, id: DownloadId, handle: i64) -> bool {
        if self.history.contains_key(&handle) {
            return false;
        }
        let Some(record) = self.downloads.get_mut(&id) else {
            return false;
        };
        if let Some(old) = record.db_handle.value() {
            self.history.remove(&old);
        }
        record.db_handle = DbHandle::Assigned(handle);
        self.history.insert(handle, id);
        self.awaiting_handle.remove(&id);
        true
    }

    pub fn await_handle(&mut self, id: DownloadId) {
        if self.downloads.contains_key(&id) {
            self.awaiting_handle.insert(id);
        }
    }

    /// 从所有索引和主表中移除，返回的记录处于删除中状态
    pub fn evict(&mut self, id: DownloadId) -> Option<DownloadRecord> {
        let mut record = self.downloads.remove(&id)?;
        self.active.remove(&id);
        self.in_progress.remove(&id);
        self.awaiting_handle.remove(&id);
        self.save_page.remove(&id);
        if let Some(handle) = record.db_handle.value() {
            if self.history.get(&handle) == Some(&id) {
                self.history.remove(&handle);
            }
        }
        record.mark_removing();
        Some(record)
    }

    pub fn clear(&mut self) -> usize {
        let count = self.downloads.len();
        self.downloads.clear();
        self.active.clear();
        self.in_progress.clear();
        self.history.clear();
        self.awaiting_handle.clear();
        self.save_page.clear();
        count
    }

    pub fn active_ids(&self) -> Vec<DownloadId> {
        self.active.iter().copied().collect()
    }

    pub fn in_progress_ids(&self) -> impl Iterator<Item = DownloadId> + '_ {
        self.in_progress.iter().copied()
    }

    /// 按句柄顺序遍历历史记录
    pub fn history(&self) -> impl Iterator<Item = &DownloadRecord> + '_ {
        self.history.values().filter_map(|id| self.downloads.get(id))
    }

    pub fn records(&self) -> impl Iterator<Item = &DownloadRecord> + '_ {
        self.downloads.values()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn membership(&self, id: DownloadId) -> IndexMembership {
        let in_history = self
            .downloads
            .get(&id)
            .and_then(|r| r.db_handle.value())
            .map(|h| self.history.get(&h) == Some(&id))
            .unwrap_or(false);
        IndexMembership {
            in_master: self.downloads.contains_key(&id),
            active: self.active.contains(&id),
            in_progress: self.in_progress.contains(&id),
            history: in_history,
            awaiting_handle: self.awaiting_handle.contains(&id),
            save_page: self.save_page.contains(&id),
        }
    }

    /// 检查主表与各索引之间的一致性
    pub fn verify(&self) -> Result<(), ConsistencyError> {
        self.check_references("active", self.active.iter())?;
        self.check_references("in_progress", self.in_progress.iter())?;
        self.check_references("history", self.history.values())?;
        self.check_references("awaiting_handle", self.awaiting_handle.iter())?;
        self.check_references("save_page", self.save_page.iter())?;

        for (handle, id) in &self.history {
            if self.downloads[id].db_handle != DbHandle::Assigned(*handle) {
                return Err(ConsistencyError::HandleMismatch {
                    handle: *handle,
                    id: *id,
                });
            }
        }

        for id in &self.in_progress {
            if !self.active.contains(id) {
                return Err(ConsistencyError::InProgressOutsideActive(*id));
            }
        }

        for (id, record) in &self.downloads {
            let membership = self.membership(*id);
            if !membership.in_any_index() {
                return Err(ConsistencyError::Orphan(*id));
            }
            if record.life_state == LifeState::Removing {
                return Err(ConsistencyError::RemovingHeld(*id));
            }
            if record.db_handle.is_assigned() && !membership.history {
                return Err(ConsistencyError::UnindexedHandle(*id));
            }
            if membership.active && record.life_state != LifeState::InProgress {
                return Err(ConsistencyError::ActiveNotInProgress(*id));
            }
            if record.life_state == LifeState::InProgress
                && !membership.save_page
                && !membership.active
            {
                return Err(ConsistencyError::InProgressNotActive(*id));
            }
            if membership.awaiting_handle
                && (record.db_handle.is_assigned() || !record.journal_pending)
            {
                return Err(ConsistencyError::AwaitingMismatch(*id));
            }
        }
        Ok(())
    }

    fn check_references<'a>(
        &self,
        index: &'static str,
        mut ids: impl Iterator<Item = &'a DownloadId>,
    ) -> Result<(), ConsistencyError> {
        match ids.find(|id| !self.downloads.contains_key(id)) {
            Some(id) => Err(ConsistencyError::DanglingReference { index, id: *id }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::download::DownloadCreateInfo;

    fn record() -> DownloadRecord {
        let info = DownloadCreateInfo::new("https://example.com/a.zip");
        DownloadRecord::new(DownloadId::new(), &info, false)
    }

    #[test]
    fn test_active_lifecycle_is_consistent() {
        let mut registry = DownloadRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert_active(r);
        registry.mark_in_progress(id);
        assert!(registry.verify().is_ok());

        assert!(registry.attach_handle(id, 1));
        let membership = registry.membership(id);
        assert!(membership.active && membership.in_progress && membership.history);
        assert!(registry.verify().is_ok());

        registry.get_mut(id).unwrap().cancel();
        registry.leave_active(id);
        assert!(registry.verify().is_ok());
        assert_eq!(registry.by_handle(1).map(|r| r.id), Some(id));

        let evicted = registry.evict(id).unwrap();
        assert_eq!(evicted.life_state, LifeState::Removing);
        assert_eq!(registry.membership(id), IndexMembership::default());
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn test_handle_collision_rejected() {
        let mut registry = DownloadRegistry::new();
        let a = record();
        let b = record();
        let (a_id, b_id) = (a.id, b.id);
        registry.insert_active(a);
        registry.insert_active(b);
        assert!(registry.attach_handle(a_id, 5));
        assert!(!registry.attach_handle(b_id, 5));
        assert_eq!(registry.id_for_handle(5), Some(a_id));
    }

    #[test]
    fn test_verify_detects_orphan() {
        let mut registry = DownloadRegistry::new();
        let mut r = record();
        r.cancel();
        let id = r.id;
        registry.downloads.insert(id, r);
        assert_eq!(registry.verify(), Err(ConsistencyError::Orphan(id)));
    }

    #[test]
    fn test_verify_detects_dangling_reference() {
        let mut registry = DownloadRegistry::new();
        let id = DownloadId::new();
        registry.history.insert(3, id);
        assert_eq!(
            registry.verify(),
            Err(ConsistencyError::DanglingReference { index: "history", id })
        );
    }

    #[test]
    fn test_verify_detects_stale_active_entry() {
        let mut registry = DownloadRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert_active(r);
        registry.get_mut(id).unwrap().cancel();
        assert_eq!(registry.verify(), Err(ConsistencyError::ActiveNotInProgress(id)));
    }

    #[test]
    fn test_verify_detects_handle_mismatch() {
        let mut registry = DownloadRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert_active(r);
        registry.attach_handle(id, 2);
        registry.get_mut(id).unwrap().db_handle = DbHandle::Assigned(9);
        assert_eq!(
            registry.verify(),
            Err(ConsistencyError::HandleMismatch { handle: 2, id })
        );
    }

    #[test]
    fn test_awaiting_handle_keeps_cancelled_record() {
        let mut registry = DownloadRegistry::new();
        let mut r = record();
        r.journal_pending = true;
        let id = r.id;
        registry.insert_active(r);
        registry.get_mut(id).unwrap().cancel();
        registry.leave_active(id);
        registry.await_handle(id);
        assert!(registry.verify().is_ok());

        assert!(registry.attach_handle(id, 4));
        registry.get_mut(id).unwrap().journal_pending = false;
        assert!(!registry.membership(id).awaiting_handle);
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut registry = DownloadRegistry::new();
        let r = record();
        let id = r.id;
        registry.insert_active(r);
        registry.attach_handle(id, 1);
        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
        assert_eq!(registry.history_len(), 0);
        assert!(registry.verify().is_ok());
    }
}
