//! 文件系统检查
//!
//! 所有磁盘操作都在单线程的 `SyncArbiter` 上串行执行，因此两次路径检查之间
//! 不会分配到同一个“不存在”的文件名。

use actix::prelude::*;
use rand::Rng;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::download::{in_progress_path, DownloadId, DownloadStateInfo};
use crate::core::error::{DownloadError, DownloadResult};

/// 同名文件最多尝试的编号
pub const MAX_UNIQUE_FILES: u32 = 100;
const UNCONFIRMED_PREFIX: &str = "Unconfirmed";
const MAX_UNCONFIRMED_NUMBER: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathUniquifier {
    /// 0 表示原路径可用
    Available(u32),
    Exhausted,
}

/// `report.pdf` -> `report (1).pdf`
pub fn append_number_to_path(path: &Path, number: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, number, ext.to_string_lossy()),
        None => format!("{} ({})", stem, number),
    };
    path.with_file_name(name)
}

fn path_and_partial_free(path: &Path) -> bool {
    !path.exists() && !in_progress_path(path).exists()
}

/// 找到第一个自身和 `.crdownload` 变体都不存在的编号
pub fn get_unique_path_number(path: &Path) -> PathUniquifier {
    if path_and_partial_free(path) {
        return PathUniquifier::Available(0);
    }
    (1..=MAX_UNIQUE_FILES)
        .find(|n| path_and_partial_free(&append_number_to_path(path, *n)))
        .map(PathUniquifier::Available)
        .unwrap_or(PathUniquifier::Exhausted)
}

/// 通过创建并删除一个探测文件判断目录是否可写
pub fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".dlcoord-probe-{}", uuid::Uuid::new_v4()));
    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn unconfirmed_path(dir: &Path) -> PathBuf {
    let mut rng = rand::thread_rng();
    loop {
        let n = rng.gen_range(0..=MAX_UNCONFIRMED_NUMBER);
        let candidate = dir.join(format!("{} {}.crdownload", UNCONFIRMED_PREFIX, n));
        if !candidate.exists() {
            return candidate;
        }
    }
}

/// 检查建议路径并在需要时写入占位文件
pub fn check_suggested_path(
    mut state: DownloadStateInfo,
    default_dir: &Path,
    fallback_dir: &Path,
) -> DownloadStateInfo {
    if let Err(e) = fs::create_dir_all(default_dir) {
        log::warn!("无法创建下载目录 {}: {}", default_dir.display(), e);
    }

    let dir = state
        .suggested_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let file_name = state
        .suggested_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();

    if !is_writable(&dir) {
        log::info!("目录不可写: {}，改用 {}", dir.display(), fallback_dir.display());
        state.prompt_user_for_save_location = true;
        state.suggested_path = fallback_dir.join(&file_name);
    }

    if state.is_dangerous() {
        state.target_name = Some(file_name.to_string_lossy().into_owned());
        let dir = state
            .suggested_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        state.suggested_path = unconfirmed_path(&dir);
    } else if state.force_file_name.is_none() {
        match get_unique_path_number(&state.suggested_path) {
            PathUniquifier::Available(0) => {}
            PathUniquifier::Available(n) => {
                state.suggested_path = append_number_to_path(&state.suggested_path, n);
                state.path_uniquifier = n;
            }
            PathUniquifier::Exhausted => {
                log::info!("找不到可用的文件名: {}", state.suggested_path.display());
                state.prompt_user_for_save_location = true;
            }
        }
    }

    if let Some(reservation) = state.reservation_path() {
        if let Err(e) = fs::write(&reservation, b"") {
            log::warn!("写入占位文件失败 {}: {}，改为询问保存位置", reservation.display(), e);
            state.prompt_user_for_save_location = true;
        }
    }
    state
}

/// 重命名为最终文件名；`uniquify` 为真时先避开已存在的同名文件
pub fn finalize(current: &Path, target: &Path, uniquify: bool) -> DownloadResult<(PathBuf, u32)> {
    let (final_path, number) = if uniquify {
        match get_unique_path_number(target) {
            PathUniquifier::Available(0) => (target.to_path_buf(), 0),
            PathUniquifier::Available(n) => (append_number_to_path(target, n), n),
            PathUniquifier::Exhausted => {
                return Err(DownloadError::PathExhausted(target.to_path_buf()))
            }
        }
    } else {
        (target.to_path_buf(), 0)
    };
    if current != final_path {
        fs::rename(current, &final_path)?;
    }
    Ok((final_path, number))
}

/// 删除文件，文件不存在视为成功
pub fn delete_file(path: &Path) -> DownloadResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// 删除下载目录中无人引用、早于 `older_than` 的空 `.crdownload` 文件
pub fn sweep_orphaned_reservations(
    dir: &Path,
    referenced: &HashSet<PathBuf>,
    older_than: SystemTime,
) -> DownloadResult<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_partial = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(".crdownload"))
            .unwrap_or(false);
        if !is_partial || referenced.contains(&path) {
            continue;
        }
        let metadata = entry.metadata()?;
        let stale = metadata.modified().map(|m| m < older_than).unwrap_or(false);
        if metadata.is_file() && metadata.len() == 0 && stale {
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::debug!("删除遗留的占位文件: {}", path.display());
                    removed += 1;
                }
                Err(e) => log::warn!("删除遗留占位文件失败 {}: {}", path.display(), e),
            }
        }
    }
    Ok(removed)
}

/// 文件系统检查 Actor
#[derive(Default)]
pub struct FileProber;

impl Actor for FileProber {
    type Context = SyncContext<Self>;
}

impl FileProber {
    /// 启动单线程的检查 Actor，需要在 actix System 内调用
    pub fn start_serial() -> Addr<Self> {
        SyncArbiter::start(1, || FileProber)
    }
}

pub struct CheckSuggestedPath {
    pub state: DownloadStateInfo,
    pub default_dir: PathBuf,
    pub fallback_dir: PathBuf,
}
impl Message for CheckSuggestedPath { type Result = DownloadStateInfo; }

pub struct FinalizeDownload {
    pub current: PathBuf,
    pub target: PathBuf,
    pub uniquify: bool,
}
impl Message for FinalizeDownload { type Result = DownloadResult<(PathBuf, u32)>; }

pub struct DeleteFile {
    pub path: PathBuf,
}
impl Message for DeleteFile { type Result = DownloadResult<()>; }

/// 返回文件已不在磁盘上的下载
pub struct FindRemovedFiles {
    pub candidates: Vec<(DownloadId, PathBuf)>,
}
impl Message for FindRemovedFiles { type Result = Vec<DownloadId>; }

pub struct SweepOrphanedReservations {
    pub dir: PathBuf,
    pub referenced: HashSet<PathBuf>,
    pub older_than: SystemTime,
}
impl Message for SweepOrphanedReservations { type Result = DownloadResult<usize>; }

/// 在文件线程上执行的任意磁盘操作，与其他检查按到达顺序执行
pub struct RunFileTask {
    task: Box<dyn FnOnce() + Send>,
}

impl RunFileTask {
    pub fn new(task: impl FnOnce() + Send + 'static) -> Self {
        Self { task: Box::new(task) }
    }
}
impl Message for RunFileTask { type Result = (); }

impl Handler<CheckSuggestedPath> for FileProber {
    type Result = MessageResult<CheckSuggestedPath>;

    fn handle(&mut self, msg: CheckSuggestedPath, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(check_suggested_path(msg.state, &msg.default_dir, &msg.fallback_dir))
    }
}

impl Handler<FinalizeDownload> for FileProber {
    type Result = DownloadResult<(PathBuf, u32)>;

    fn handle(&mut self, msg: FinalizeDownload, _ctx: &mut Self::Context) -> Self::Result {
        finalize(&msg.current, &msg.target, msg.uniquify)
    }
}

impl Handler<DeleteFile> for FileProber {
    type Result = DownloadResult<()>;

    fn handle(&mut self, msg: DeleteFile, _ctx: &mut Self::Context) -> Self::Result {
        delete_file(&msg.path)
    }
}

impl Handler<FindRemovedFiles> for FileProber {
    type Result = MessageResult<FindRemovedFiles>;

    fn handle(&mut self, msg: FindRemovedFiles, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(
            msg.candidates
                .into_iter()
                .filter(|(_, path)| !path.exists())
                .map(|(id, _)| id)
                .collect(),
        )
    }
}

impl Handler<SweepOrphanedReservations> for FileProber {
    type Result = DownloadResult<usize>;

    fn handle(&mut self, msg: SweepOrphanedReservations, _ctx: &mut Self::Context) -> Self::Result {
        sweep_orphaned_reservations(&msg.dir, &msg.referenced, msg.older_than)
    }
}

impl Handler<RunFileTask> for FileProber {
    type Result = ();

    fn handle(&mut self, msg: RunFileTask, _ctx: &mut Self::Context) {
        (msg.task)();
    }
}
