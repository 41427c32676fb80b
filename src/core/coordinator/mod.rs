//! 下载协调器
//!
//! - `actor`: `DownloadCoordinator` 本体与内部流程
//! - `handlers`: 各消息的处理
//! - `messages`: 对外消息定义
//! - `registry`: 下载记录与索引

mod actor;
mod handlers;
pub mod messages;
pub mod registry;


pub use actor::DownloadCoordinator;
pub use messages::*;
pub use registry::{ConsistencyError, DownloadRegistry, IndexMembership};
