//! `download` 模块定义单个下载的数据模型
//!
//! - `state`: 标识与状态枚举
//! - `create_info`: 网络层上报的创建信息与路径决策状态
//! - `record`: `DownloadRecord` 及其状态迁移

pub mod create_info;
pub mod record;
pub mod state;

pub use create_info::{in_progress_path, DownloadCreateInfo, DownloadStateInfo};
pub use record::DownloadRecord;
pub use state::{DangerType, DbHandle, DownloadId, LifeState, SafetyState};
