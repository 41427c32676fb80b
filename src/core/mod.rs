//! Core: 下载生命周期的状态机、路径决策、文件系统检查、历史记录与协调器

pub mod collaborators;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod journal;
pub mod prober;
pub mod resolver;

pub use collaborators::{
    Collaborators, DownloadFileHandler, DownloadObserver, DownloadUi, HostBlocklistClassifier,
    NoopClassifier, SafetyClassifier,
};
pub use coordinator::DownloadCoordinator;
pub use download::{DownloadCreateInfo, DownloadId, DownloadRecord, LifeState, SafetyState};
pub use error::{DownloadError, DownloadResult};
pub use journal::{HistoryJournal, JsonJournal, MemoryJournal};
pub use prober::FileProber;
pub use resolver::DownloadPrefs;
