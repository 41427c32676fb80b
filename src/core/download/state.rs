use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 进程内的下载标识，创建时分配，在历史记录句柄返回之前使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 历史记录分配的持久句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DbHandle {
    #[default]
    Uninitialized,
    Assigned(i64),
}

impl DbHandle {
    pub fn is_assigned(&self) -> bool {
        matches!(self, DbHandle::Assigned(_))
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            DbHandle::Assigned(handle) => Some(*handle),
            DbHandle::Uninitialized => None,
        }
    }
}

impl fmt::Display for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbHandle::Assigned(handle) => write!(f, "{}", handle),
            DbHandle::Uninitialized => write!(f, "<uninitialized>"),
        }
    }
}

/// 安全状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyState {
    Safe,
    Dangerous,
    /// 危险下载已被用户确认
    Validated,
}

/// 危险原因，写入历史记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DangerType {
    #[default]
    NotDangerous,
    DangerousFile,
    DangerousUrl,
}

/// 下载生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifeState {
    InProgress,
    Complete,
    Cancelled,
    Interrupted,
    /// 已从所有索引中移除，等待释放
    Removing,
}

impl LifeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifeState::Complete | LifeState::Cancelled | LifeState::Interrupted
        )
    }
}

impl fmt::Display for LifeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifeState::InProgress => "下载中",
            LifeState::Complete => "已完成",
            LifeState::Cancelled => "已取消",
            LifeState::Interrupted => "已中断",
            LifeState::Removing => "移除中",
        };
        write!(f, "{}", name)
    }
}
