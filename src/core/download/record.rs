use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::create_info::{DownloadCreateInfo, DownloadStateInfo};
use super::state::{DangerType, DbHandle, DownloadId, LifeState, SafetyState};
use crate::core::journal::JournalEntry;

/// 单个下载的可变状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub db_handle: DbHandle,
    pub url_chain: Vec<String>,
    pub referrer: String,
    pub mime_type: String,
    pub content_disposition: String,
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 首次确定的保存路径，只写一次
    pub target_path: Option<PathBuf>,
    /// 当前磁盘上的路径，每次重命名都会更新
    pub final_path: Option<PathBuf>,
    pub safety_state: SafetyState,
    pub danger_type: DangerType,
    pub life_state: LifeState,
    pub interrupt_reason: Option<i32>,
    pub is_temporary: bool,
    pub is_off_the_record: bool,
    pub is_extension_install: bool,
    pub path_uniquifier: u32,
    pub all_data_saved: bool,
    pub file_externally_removed: bool,
    /// 已向历史记录提交、句柄尚未返回
    pub journal_pending: bool,
    /// 已进入最终重命名阶段
    pub completing: bool,
    pub state_info: DownloadStateInfo,
}

impl DownloadRecord {
    pub fn new(id: DownloadId, info: &DownloadCreateInfo, is_off_the_record: bool) -> Self {
        Self {
            id,
            db_handle: DbHandle::Uninitialized,
            url_chain: info.url_chain.clone(),
            referrer: info.referrer.clone(),
            mime_type: info.mime_type.clone(),
            content_disposition: info.content_disposition.clone(),
            received_bytes: 0,
            total_bytes: info.total_bytes,
            start_time: info.start_time,
            end_time: None,
            target_path: None,
            final_path: None,
            safety_state: SafetyState::Safe,
            danger_type: DangerType::NotDangerous,
            life_state: LifeState::InProgress,
            interrupt_reason: None,
            is_temporary: info.is_temporary,
            is_off_the_record,
            is_extension_install: false,
            path_uniquifier: 0,
            all_data_saved: false,
            file_externally_removed: false,
            journal_pending: false,
            completing: false,
            state_info: DownloadStateInfo::from_create_info(info),
        }
    }

    /// 从历史记录恢复。持久化时仍在下载中的条目视为已取消
    pub fn from_history(id: DownloadId, entry: &JournalEntry) -> Self {
        let life_state = match entry.state {
            LifeState::InProgress | LifeState::Removing => LifeState::Cancelled,
            other => other,
        };
        let safety_state = match (entry.danger_type, life_state) {
            (DangerType::NotDangerous, _) => SafetyState::Safe,
            (_, LifeState::Complete) => SafetyState::Validated,
            _ => SafetyState::Dangerous,
        };
        Self {
            id,
            db_handle: DbHandle::Assigned(entry.db_handle),
            url_chain: entry.url_chain.clone(),
            referrer: entry.referrer.clone(),
            mime_type: String::new(),
            content_disposition: String::new(),
            received_bytes: entry.received_bytes,
            total_bytes: entry.total_bytes,
            start_time: entry.start_time,
            end_time: entry.end_time,
            target_path: Some(entry.full_path.clone()),
            final_path: Some(entry.full_path.clone()),
            safety_state,
            danger_type: entry.danger_type,
            life_state,
            interrupt_reason: None,
            is_temporary: false,
            is_off_the_record: false,
            is_extension_install: false,
            path_uniquifier: 0,
            all_data_saved: life_state == LifeState::Complete,
            file_externally_removed: false,
            journal_pending: false,
            completing: false,
            state_info: DownloadStateInfo::default(),
        }
    }

    pub fn url(&self) -> &str {
        self.url_chain.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_partial(&self) -> bool {
        self.life_state == LifeState::InProgress
    }

    pub fn is_in_progress(&self) -> bool {
        self.life_state == LifeState::InProgress
    }

    pub fn is_complete(&self) -> bool {
        self.life_state == LifeState::Complete
    }

    pub fn is_dangerous(&self) -> bool {
        self.safety_state == SafetyState::Dangerous
    }

    /// 进度更新，只在下载中时生效
    pub fn update(&mut self, received_bytes: u64) {
        if !self.is_in_progress() {
            return;
        }
        self.received_bytes = received_bytes;
    }

    pub fn on_all_data_saved(&mut self, size: u64) {
        self.all_data_saved = true;
        self.received_bytes = size;
        if self.total_bytes.map_or(true, |total| total < size) {
            self.total_bytes = Some(size);
        }
    }

    pub fn mark_url_dangerous(&mut self) {
        self.state_info.is_dangerous_url = true;
        self.update_safety_state();
    }

    /// 写入文件检查结果，保持已确定的目标路径不变
    pub fn set_file_check_results(&mut self, state: DownloadStateInfo) {
        let is_dangerous_url = self.state_info.is_dangerous_url;
        self.state_info = state;
        self.state_info.is_dangerous_url |= is_dangerous_url;
        self.is_extension_install = self.state_info.is_extension_install;
        self.update_safety_state();
    }

    fn update_safety_state(&mut self) {
        if self.safety_state == SafetyState::Validated {
            return;
        }
        self.danger_type = if self.state_info.is_dangerous_url {
            DangerType::DangerousUrl
        } else if self.state_info.is_dangerous_file {
            DangerType::DangerousFile
        } else {
            DangerType::NotDangerous
        };
        self.safety_state = if self.danger_type == DangerType::NotDangerous {
            SafetyState::Safe
        } else {
            SafetyState::Dangerous
        };
    }

    /// 设置初始保存路径。已经设置过时返回 false，路径保持不变
    pub fn on_path_determined(&mut self, path: PathBuf) -> bool {
        if self.target_path.is_some() {
            return false;
        }
        self.final_path = Some(path.clone());
        self.target_path = Some(path);
        true
    }

    pub fn rename(&mut self, path: PathBuf) {
        self.final_path = Some(path);
    }

    pub fn interrupted(&mut self, size: u64, reason: i32) {
        if !self.is_in_progress() {
            return;
        }
        self.received_bytes = size;
        self.interrupt_reason = Some(reason);
        self.life_state = LifeState::Interrupted;
        self.end_time = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        if !self.is_in_progress() {
            return;
        }
        self.life_state = LifeState::Cancelled;
        self.end_time = Some(Utc::now());
    }

    /// 用户确认危险下载
    pub fn validate_dangerous(&mut self) -> bool {
        if self.safety_state != SafetyState::Dangerous {
            return false;
        }
        self.safety_state = SafetyState::Validated;
        true
    }

    pub fn on_renamed_to_final(&mut self, path: PathBuf, uniquifier: u32) {
        if uniquifier > 0 {
            self.path_uniquifier = uniquifier;
        }
        self.final_path = Some(path);
        self.completing = false;
        self.life_state = LifeState::Complete;
        self.end_time = Some(Utc::now());
    }

    pub fn mark_removing(&mut self) {
        self.life_state = LifeState::Removing;
    }

    pub fn on_downloaded_file_removed(&mut self) {
        self.file_externally_removed = true;
    }

    /// 用于最终重命名的目标路径：危险文件经确认后恢复真实文件名
    pub fn final_target(&self) -> Option<PathBuf> {
        let target = self.target_path.as_ref()?;
        match (&self.state_info.target_name, self.safety_state) {
            (Some(name), SafetyState::Validated) => {
                Some(target.parent().unwrap_or(Path::new("")).join(name))
            }
            _ => Some(target.clone()),
        }
    }

    pub fn file_name(&self) -> Option<String> {
        self.final_path
            .as_ref()
            .or(self.target_path.as_ref())
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn directory(&self) -> Option<&Path> {
        self.final_path.as_deref().and_then(Path::parent)
    }

    /// 按小写关键字匹配 URL 或文件名
    pub fn matches_query(&self, query_lower: &str) -> bool {
        if query_lower.is_empty() {
            return true;
        }
        if self.url().to_lowercase().contains(query_lower) {
            return true;
        }
        self.file_name()
            .map(|name| name.to_lowercase().contains(query_lower))
            .unwrap_or(false)
    }

    pub fn to_journal_entry(&self) -> JournalEntry {
        JournalEntry {
            db_handle: self.db_handle.value().unwrap_or(-1),
            url_chain: self.url_chain.clone(),
            referrer: self.referrer.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            received_bytes: self.received_bytes,
            total_bytes: self.total_bytes,
            full_path: self.final_path.clone().unwrap_or_default(),
            state: self.life_state,
            danger_type: self.danger_type,
        }
    }
}
