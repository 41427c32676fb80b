use actix::Message;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use super::registry::{ConsistencyError, IndexMembership};
use crate::core::collaborators::DownloadObserver;
use crate::core::download::{DownloadCreateInfo, DownloadId, DownloadRecord};

/// 网络层报告新下载，关闭后返回 None
pub struct CreateDownload {
    pub info: DownloadCreateInfo,
}
impl Message for CreateDownload { type Result = Option<DownloadId>; }

/// 开始路径决策流程
pub struct StartDownload {
    pub id: DownloadId,
}
impl Message for StartDownload { type Result = (); }

/// 用户在保存对话框中选定了路径
pub struct FileSelected {
    pub id: DownloadId,
    pub path: PathBuf,
}
impl Message for FileSelected { type Result = (); }

pub struct FileSelectionCancelled {
    pub id: DownloadId,
}
impl Message for FileSelectionCancelled { type Result = (); }

/// 进度更新
pub struct UpdateDownload {
    pub id: DownloadId,
    pub received_bytes: u64,
}
impl Message for UpdateDownload { type Result = (); }

/// 网络层收完数据。`error` 为 0 或连接关闭视为成功
pub struct ResponseCompleted {
    pub id: DownloadId,
    pub size: u64,
    pub error: i32,
    pub hash: Option<String>,
}
impl Message for ResponseCompleted { type Result = (); }

pub struct InterruptDownload {
    pub id: DownloadId,
    pub received_bytes: u64,
    pub error: i32,
}
impl Message for InterruptDownload { type Result = (); }

pub struct CancelDownload {
    pub id: DownloadId,
}
impl Message for CancelDownload { type Result = (); }

/// 用户确认保留危险下载
pub struct ValidateDangerousDownload {
    pub id: DownloadId,
}
impl Message for ValidateDangerousDownload { type Result = (); }

/// 满足条件时进入完成流程，返回是否已开始
pub struct MaybeCompleteDownload {
    pub id: DownloadId,
}
impl Message for MaybeCompleteDownload { type Result = bool; }

/// 按持久句柄删除
pub struct RemoveDownload {
    pub handle: i64,
}
impl Message for RemoveDownload { type Result = bool; }

/// 删除开始时间在 `[begin, end)` 内的已结束下载
pub struct RemoveDownloadsBetween {
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}
impl Message for RemoveDownloadsBetween { type Result = usize; }

pub struct RemoveDownloads {
    pub begin: DateTime<Utc>,
}
impl Message for RemoveDownloads { type Result = usize; }

/// 清空全部历史；无痕模式下同时清空父协调器
pub struct RemoveAllDownloads;
impl Message for RemoveAllDownloads { type Result = usize; }

/// 关闭协调器，保留文件删除完成后返回
pub struct Shutdown;
impl Message for Shutdown { type Result = (); }

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub(crate) u64);

pub struct AddObserver {
    pub observer: Box<dyn DownloadObserver>,
}
impl Message for AddObserver { type Result = ObserverId; }

pub struct RemoveObserver {
    pub id: ObserverId,
}
impl Message for RemoveObserver { type Result = bool; }

pub struct GetDownload {
    pub id: DownloadId,
}
impl Message for GetDownload { type Result = Option<DownloadRecord>; }

pub struct GetDownloadByHandle {
    pub handle: i64,
}
impl Message for GetDownloadByHandle { type Result = Option<DownloadRecord>; }

/// 历史中非临时的下载，`dir` 为空表示所有目录
pub struct GetAllDownloads {
    pub dir: Option<PathBuf>,
}
impl Message for GetAllDownloads { type Result = Vec<DownloadRecord>; }

pub struct GetTemporaryDownloads {
    pub dir: PathBuf,
}
impl Message for GetTemporaryDownloads { type Result = Vec<DownloadRecord>; }

/// 未完成或仍待确认的下载，包含父协调器的结果
pub struct GetCurrentDownloads {
    pub dir: Option<PathBuf>,
}
impl Message for GetCurrentDownloads { type Result = Vec<DownloadRecord>; }

pub struct SearchDownloads {
    pub query: String,
}
impl Message for SearchDownloads { type Result = Vec<DownloadRecord>; }

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub in_progress_count: usize,
    pub received_bytes: u64,
    pub total_bytes: u64,
    /// 所有进行中的下载都知道总大小
    pub progress_known: bool,
    pub download_count: usize,
    pub history_count: usize,
    pub history_loaded: bool,
    pub shut_down: bool,
}

impl DownloadStats {
    /// 总体进度百分比，大小未知时返回 None
    pub fn percent(&self) -> Option<u8> {
        if !self.progress_known || self.total_bytes == 0 {
            return None;
        }
        Some(((self.received_bytes.min(self.total_bytes) * 100) / self.total_bytes) as u8)
    }
}

pub struct GetStats;
impl Message for GetStats { type Result = DownloadStats; }

pub struct GetIndexMembership {
    pub id: DownloadId,
}
impl Message for GetIndexMembership { type Result = IndexMembership; }

pub struct VerifyConsistency;
impl Message for VerifyConsistency { type Result = Result<(), ConsistencyError>; }

/// 外部直接写入的下载（网页另存为），不经过路径决策
pub struct SavePageDownloadStarted {
    pub info: DownloadCreateInfo,
}
impl Message for SavePageDownloadStarted { type Result = Option<DownloadId>; }

pub struct SavePageDownloadFinished {
    pub id: DownloadId,
    pub size: u64,
}
impl Message for SavePageDownloadFinished { type Result = (); }

/// 忘记上次选择的保存目录
pub struct ClearLastDownloadPath;
impl Message for ClearLastDownloadPath { type Result = (); }

/// 父协调器的下载集合发生变化
pub struct ParentModelChanged;
impl Message for ParentModelChanged { type Result = (); }

/// 父协调器正在关闭
pub struct ParentGoingDown;
impl Message for ParentGoingDown { type Result = (); }
