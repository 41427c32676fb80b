use actix::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::messages::{AddObserver, ObserverId, ParentGoingDown, ParentModelChanged, RemoveObserver};
use super::registry::DownloadRegistry;
use crate::core::collaborators::{Collaborators, DownloadObserver};
use crate::core::download::{
    in_progress_path, DbHandle, DownloadId, DownloadRecord, DownloadStateInfo, SafetyState,
};
use crate::core::error::{net_error, DownloadError, DownloadResult};
use crate::core::journal::JournalEntry;
use crate::core::prober::{
    CheckSuggestedPath, DeleteFile, FinalizeDownload, FindRemovedFiles, SweepOrphanedReservations,
};
use crate::core::resolver::{self, DownloadPrefs, ResolveRequest};

/// 下载结束的原因
#[derive(Debug, Clone, Copy)]
pub(super) enum AbortReason {
    Cancelled,
    Interrupted { received_bytes: u64, error: i32 },
}

/// 下载协调器 Actor
///
/// 所有下载状态只在这个 Actor 的邮箱线程上修改。异步步骤（安全检查、历史记录、
/// 文件系统检查）完成后回到这里继续，继续之前都会确认下载仍处于活动状态。
pub struct DownloadCoordinator {
    pub(super) registry: DownloadRegistry,
    pub(super) prefs: DownloadPrefs,
    pub(super) collab: Collaborators,
    pub(super) observers: BTreeMap<ObserverId, Box<dyn DownloadObserver>>,
    next_observer_id: u64,
    /// 无痕模式下指向普通模式的协调器
    pub(super) parent: Option<Addr<DownloadCoordinator>>,
    pub(super) parent_observer: Option<ObserverId>,
    pub(super) is_off_the_record: bool,
    pub(super) last_download_path: Option<PathBuf>,
    pub(super) history_loaded: bool,
    pub(super) shut_down: bool,
    /// 关闭时仍在等待句柄的危险下载，句柄返回后删除其历史记录
    pub(super) pending_discards: HashSet<DownloadId>,
    started_at: SystemTime,
    sweep_orphans: bool,
    next_fake_handle: i64,
}

impl DownloadCoordinator {
    pub fn new(prefs: DownloadPrefs, collab: Collaborators) -> Self {
        Self {
            registry: DownloadRegistry::new(),
            prefs,
            collab,
            observers: BTreeMap::new(),
            next_observer_id: 1,
            parent: None,
            parent_observer: None,
            is_off_the_record: false,
            last_download_path: None,
            history_loaded: false,
            shut_down: false,
            pending_discards: HashSet::new(),
            started_at: SystemTime::now(),
            sweep_orphans: false,
            // -1 留给未分配句柄的记录
            next_fake_handle: -2,
        }
    }

    /// 无痕模式的子协调器
    pub fn off_the_record(
        parent: Addr<DownloadCoordinator>,
        prefs: DownloadPrefs,
        collab: Collaborators,
    ) -> Self {
        let mut coordinator = Self::new(prefs, collab);
        coordinator.parent = Some(parent);
        coordinator.is_off_the_record = true;
        coordinator
    }

    /// 启动时清理上次遗留的空占位文件
    pub fn with_orphan_sweep(mut self, enabled: bool) -> Self {
        self.sweep_orphans = enabled;
        self
    }

    pub(super) fn add_observer(&mut self, mut observer: Box<dyn DownloadObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        observer.model_changed();
        self.observers.insert(id, observer);
        id
    }

    pub(super) fn notify_model_changed(&mut self) {
        for observer in self.observers.values_mut() {
            observer.model_changed();
        }
    }

    pub(super) fn notify_updated(&mut self, id: DownloadId) {
        if let Some(record) = self.registry.get(id) {
            for observer in self.observers.values_mut() {
                observer.download_updated(record);
            }
        }
    }

    pub(super) fn assert_consistent(&self) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.registry.verify() {
                panic!("下载索引不一致: {}", e);
            }
        }
    }

    fn take_fake_handle(&mut self) -> i64 {
        let handle = self.next_fake_handle;
        self.next_fake_handle -= 1;
        handle
    }

    // ---- 历史记录 ----

    fn load_history(&mut self, ctx: &mut Context<Self>) {
        let journal = self.collab.journal.clone();
        ctx.spawn(
            async move { journal.load().await }
                .into_actor(self)
                .map(|result, act, ctx| act.on_history_loaded(result, ctx)),
        );
    }

    fn on_history_loaded(&mut self, result: DownloadResult<Vec<JournalEntry>>, ctx: &mut Context<Self>) {
        if self.shut_down {
            return;
        }
        let mut entries = result.unwrap_or_else(|e| {
            log::error!("加载历史记录失败: {}", e);
            Vec::new()
        });
        entries.sort_by_key(|e| e.start_time);

        for entry in &entries {
            let mut record = DownloadRecord::from_history(DownloadId::new(), entry);
            record.is_off_the_record = self.is_off_the_record;
            if !self.registry.insert_history(record) {
                log::warn!("历史记录句柄重复，已忽略: {}", entry.db_handle);
            }
        }
        self.history_loaded = true;
        log::info!("已恢复 {} 条下载历史", self.registry.history_len());
        self.notify_model_changed();
        self.assert_consistent();

        let candidates: Vec<_> = self
            .registry
            .history()
            .filter(|r| r.is_complete())
            .filter_map(|r| r.final_path.clone().map(|p| (r.id, p)))
            .collect();
        if !candidates.is_empty() {
            ctx.spawn(
                self.collab
                    .prober
                    .send(FindRemovedFiles { candidates })
                    .into_actor(self)
                    .map(|result, act, _ctx| match result {
                        Ok(removed) => {
                            for id in removed {
                                if let Some(record) = act.registry.get_mut(id) {
                                    record.on_downloaded_file_removed();
                                    act.notify_updated(id);
                                }
                            }
                        }
                        Err(e) => log::warn!("检查已删除文件失败: {}", e),
                    }),
            );
        }

        if self.sweep_orphans {
            let referenced: HashSet<PathBuf> = self
                .registry
                .records()
                .filter_map(on_disk_path)
                .collect();
            let msg = SweepOrphanedReservations {
                dir: self.prefs.download_dir.clone(),
                referenced,
                older_than: self.started_at,
            };
            ctx.spawn(self.collab.prober.send(msg).into_actor(self).map(
                |result, _act, _ctx| match result {
                    Ok(Ok(0)) => {}
                    Ok(Ok(count)) => log::info!("清理了 {} 个遗留的占位文件", count),
                    Ok(Err(e)) => log::warn!("清理遗留占位文件失败: {}", e),
                    Err(e) => log::warn!("清理遗留占位文件失败: {}", e),
                },
            ));
        }
    }

    pub(super) fn update_journal(&self, id: DownloadId) {
        let Some(record) = self.registry.get(id) else {
            return;
        };
        // 临时句柄没有对应的持久记录
        let Some(handle) = record.db_handle.value().filter(|h| *h > 0) else {
            return;
        };
        let entry = record.to_journal_entry();
        let journal = self.collab.journal.clone();
        actix::spawn(async move {
            if let Err(e) = journal.update_entry(entry).await {
                log::warn!("更新历史记录 {} 失败: {}", handle, e);
            }
        });
    }

    pub(super) fn remove_journal_entry(&self, handle: i64) {
        if handle <= 0 {
            return;
        }
        let journal = self.collab.journal.clone();
        actix::spawn(async move {
            if let Err(e) = journal.remove_entry(handle).await {
                log::warn!("删除历史记录 {} 失败: {}", handle, e);
            }
        });
    }

    pub(super) fn delete_file_future(&self, path: PathBuf) -> impl Future<Output = ()> + 'static {
        let request = self.collab.prober.send(DeleteFile { path: path.clone() });
        async move {
            match request.await.map_err(DownloadError::from).and_then(|r| r) {
                Ok(()) => log::debug!("已删除 {}", path.display()),
                Err(e) => log::warn!("删除文件失败 {}: {}", path.display(), e),
            }
        }
    }

    // ---- 路径决策 ----

    pub(super) fn start_download(&mut self, id: DownloadId, ctx: &mut Context<Self>) {
        let Some(record) = self.registry.active(id) else {
            return;
        };
        if record.target_path.is_some() {
            log::debug!("下载 {} 已确定路径，忽略重复的开始请求", id);
            return;
        }
        let classifier = self.collab.classifier.clone();
        let url_chain = record.url_chain.clone();
        let referrer = record.referrer.clone();
        ctx.spawn(
            async move { classifier.check_download_url(&url_chain, &referrer).await }
                .into_actor(self)
                .map(move |dangerous, act, ctx| act.on_url_checked(id, dangerous, ctx)),
        );
    }

    fn on_url_checked(&mut self, id: DownloadId, dangerous: bool, ctx: &mut Context<Self>) {
        let Some(record) = self.registry.active_mut(id) else {
            log::debug!("下载 {} 在安全检查期间已结束", id);
            return;
        };
        if dangerous {
            log::warn!("下载地址被标记为危险: {}", record.url());
            record.mark_url_dangerous();
        }
        let journal = self.collab.journal.clone();
        let referrer = record.referrer.clone();
        ctx.spawn(
            async move { journal.check_visited_referrer_before(&referrer).await }
                .into_actor(self)
                .map(move |visited, act, ctx| act.on_referrer_checked(id, visited, ctx)),
        );
    }

    fn on_referrer_checked(&mut self, id: DownloadId, visited: bool, ctx: &mut Context<Self>) {
        let Some(record) = self.registry.active(id) else {
            log::debug!("下载 {} 在引用页检查期间已结束", id);
            return;
        };
        let resolution = resolver::resolve(
            &ResolveRequest::from_record(record),
            &self.prefs,
            self.last_download_path.as_deref(),
            visited,
        );
        let msg = CheckSuggestedPath {
            state: resolution.apply_to(&record.state_info),
            default_dir: self.prefs.download_dir.clone(),
            fallback_dir: self.prefs.fallback_dir.clone(),
        };
        ctx.spawn(self.collab.prober.send(msg).into_actor(self).map(
            move |result, act, ctx| match result {
                Ok(state) => act.on_path_checked(id, state, ctx),
                Err(e) => {
                    log::error!("文件系统检查失败: {}", e);
                    act.abort_download(
                        id,
                        AbortReason::Interrupted {
                            received_bytes: 0,
                            error: net_error::FILE_FAILED,
                        },
                        ctx,
                    );
                }
            },
        ));
    }

    fn on_path_checked(&mut self, id: DownloadId, state: DownloadStateInfo, ctx: &mut Context<Self>) {
        if !self.registry.is_active(id) {
            // 下载已经结束，占位文件没人会用
            if let Some(path) = state.reservation_path() {
                ctx.spawn(self.delete_file_future(path).into_actor(self));
            }
            return;
        }
        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        record.path_uniquifier = state.path_uniquifier;
        record.set_file_check_results(state);
        let suggested = record.state_info.suggested_path.clone();
        let prompt = record.state_info.prompt_user_for_save_location;
        self.notify_updated(id);

        if prompt {
            self.collab.ui.choose_download_path(id, &suggested);
            for observer in self.observers.values_mut() {
                observer.select_file_dialog_displayed(id);
            }
        } else {
            self.continue_with_path(id, suggested, ctx);
        }
    }

    /// 确定保存路径并登记到历史记录。路径只能确定一次
    pub(super) fn continue_with_path(&mut self, id: DownloadId, path: PathBuf, ctx: &mut Context<Self>) {
        let Some(record) = self.registry.active_mut(id) else {
            return;
        };
        if !record.on_path_determined(path.clone()) {
            log::debug!("下载 {} 的路径已确定，忽略 {}", id, path.display());
            return;
        }
        // 危险文件已经使用临时文件名
        let working_path = if record.is_dangerous() {
            path
        } else {
            in_progress_path(&path)
        };
        record.rename(working_path.clone());
        record.journal_pending = true;
        let entry = record.to_journal_entry();
        log::info!("下载 {} 保存到 {}", id, working_path.display());

        self.registry.mark_in_progress(id);
        self.collab.file_handler.rename_in_progress(id, &working_path);

        let journal = self.collab.journal.clone();
        ctx.spawn(
            async move { journal.add_entry(entry).await }
                .into_actor(self)
                .map(move |result, act, ctx| act.on_create_entry_complete(id, result, ctx)),
        );
        self.notify_updated(id);
        self.assert_consistent();
    }

    pub(super) fn on_create_entry_complete(
        &mut self,
        id: DownloadId,
        result: DownloadResult<DbHandle>,
        ctx: &mut Context<Self>,
    ) {
        if self.shut_down {
            if let (true, Ok(DbHandle::Assigned(handle))) = (self.pending_discards.remove(&id), &result) {
                self.remove_journal_entry(*handle);
            }
            return;
        }
        let handle = match result {
            Ok(DbHandle::Assigned(handle)) => handle,
            Ok(DbHandle::Uninitialized) => {
                log::warn!("历史记录没有分配句柄，下载 {} 使用临时句柄", id);
                self.take_fake_handle()
            }
            Err(e) => {
                log::warn!("写入历史记录失败，下载 {} 使用临时句柄: {}", id, e);
                self.take_fake_handle()
            }
        };

        let Some(record) = self.registry.get_mut(id) else {
            log::debug!("下载 {} 已被移除，删除对应的历史记录", id);
            self.remove_journal_entry(handle);
            return;
        };
        record.journal_pending = false;
        if !self.registry.attach_handle(id, handle) {
            log::error!("句柄 {} 已被其他下载占用", handle);
            let fake = self.take_fake_handle();
            self.registry.attach_handle(id, fake);
        }

        if let Some(record) = self.registry.get(id) {
            self.collab.ui.show_download_started(record);
        }
        self.notify_model_changed();

        let in_progress = self.registry.get(id).map_or(false, |r| r.is_in_progress());
        if !in_progress {
            self.update_journal(id);
        } else if !self.registry.is_save_page(id) {
            self.maybe_complete(id, ctx);
        }
        self.assert_consistent();
    }

    // ---- 完成 ----

    pub(super) fn maybe_complete(&mut self, id: DownloadId, ctx: &mut Context<Self>) -> bool {
        if self.shut_down {
            return false;
        }
        let Some(record) = self.registry.active(id) else {
            return false;
        };
        if !record.all_data_saved
            || record.is_dangerous()
            || !record.db_handle.is_assigned()
            || record.completing
        {
            return false;
        }
        let (Some(current), Some(target)) = (record.final_path.clone(), record.final_target()) else {
            return false;
        };
        let uniquify = record.safety_state == SafetyState::Validated
            && record.state_info.target_name.is_some();

        if let Some(record) = self.registry.get_mut(id) {
            record.completing = true;
        }
        self.registry.leave_in_progress(id);
        self.update_journal(id);
        log::debug!("下载 {} 开始最终重命名: {}", id, target.display());

        let msg = FinalizeDownload {
            current,
            target,
            uniquify,
        };
        ctx.spawn(
            self.collab
                .prober
                .send(msg)
                .into_actor(self)
                .map(move |result, act, ctx| {
                    act.on_finalized(id, result.map_err(DownloadError::from).and_then(|r| r), ctx)
                }),
        );
        self.assert_consistent();
        true
    }

    fn on_finalized(
        &mut self,
        id: DownloadId,
        result: DownloadResult<(PathBuf, u32)>,
        ctx: &mut Context<Self>,
    ) {
        if !self.registry.is_active(id) {
            log::debug!("下载 {} 在重命名期间已结束", id);
            return;
        }
        match result {
            Ok((path, uniquifier)) => {
                if let Some(record) = self.registry.get_mut(id) {
                    log::info!("下载完成: {}", path.display());
                    record.on_renamed_to_final(path, uniquifier);
                }
                self.registry.leave_active(id);
                self.update_journal(id);
                self.collab.file_handler.complete(id);
                self.notify_updated(id);
                self.assert_consistent();
            }
            Err(e) => {
                log::error!("下载 {} 重命名失败: {}", id, e);
                let received_bytes = self.registry.get(id).map_or(0, |r| r.received_bytes);
                self.abort_download(
                    id,
                    AbortReason::Interrupted {
                        received_bytes,
                        error: net_error::FILE_FAILED,
                    },
                    ctx,
                );
            }
        }
    }

    // ---- 取消与中断 ----

    pub(super) fn abort_download(
        &mut self,
        id: DownloadId,
        reason: AbortReason,
        ctx: &mut Context<Self>,
    ) -> bool {
        let Some(record) = self.registry.active_mut(id) else {
            return false;
        };
        match reason {
            AbortReason::Cancelled => record.cancel(),
            AbortReason::Interrupted {
                received_bytes,
                error,
            } => record.interrupted(received_bytes, error),
        }
        record.completing = false;
        let discard = record.is_dangerous();
        let journaled = record.db_handle.is_assigned();
        let pending = record.journal_pending;
        log::info!("下载 {} {}", id, record.life_state);

        self.registry.leave_active(id);
        self.collab.file_handler.cancel(id);

        if discard {
            self.discard_download(id, ctx);
        } else if journaled {
            self.update_journal(id);
            self.notify_updated(id);
        } else if pending {
            self.registry.await_handle(id);
            self.notify_updated(id);
        } else {
            // 从未写入历史记录，直接丢弃
            self.registry.evict(id);
            self.notify_model_changed();
        }
        self.assert_consistent();
        true
    }

    /// 丢弃未完成的危险下载：删除磁盘文件与历史记录
    pub(super) fn discard_download(&mut self, id: DownloadId, ctx: &mut Context<Self>) {
        let Some(record) = self.registry.evict(id) else {
            return;
        };
        log::info!("丢弃危险下载: {}", record.url());
        if let Some(path) = on_disk_path(&record) {
            ctx.spawn(self.delete_file_future(path).into_actor(self));
        }
        if let Some(handle) = record.db_handle.value() {
            self.remove_journal_entry(handle);
        }
        self.notify_model_changed();
    }

    // ---- 查询 ----

    pub(super) fn in_directory(record: &DownloadRecord, dir: Option<&Path>) -> bool {
        match dir {
            None => true,
            Some(dir) => record.directory() == Some(dir),
        }
    }
}

/// 下载在磁盘上占用的文件：当前路径，或路径检查写下的占位文件
pub(super) fn on_disk_path(record: &DownloadRecord) -> Option<PathBuf> {
    record.final_path.clone().or_else(|| {
        if record.state_info.suggested_path.as_os_str().is_empty() {
            None
        } else {
            record.state_info.reservation_path()
        }
    })
}

impl Actor for DownloadCoordinator {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!(
            "下载协调器已启动{}",
            if self.is_off_the_record { "（无痕模式）" } else { "" }
        );
        self.started_at = SystemTime::now();

        if let Some(parent) = self.parent.clone() {
            let observer = ParentObserver {
                child: ctx.address(),
            };
            ctx.spawn(
                parent
                    .send(AddObserver {
                        observer: Box::new(observer),
                    })
                    .into_actor(self)
                    .map(|result, act, _ctx| match result {
                        Ok(id) if act.shut_down => {
                            if let Some(parent) = &act.parent {
                                parent.do_send(RemoveObserver { id });
                            }
                        }
                        Ok(id) => act.parent_observer = Some(id),
                        Err(e) => log::warn!("无法关注父协调器: {}", e),
                    }),
            );
        }
        self.load_history(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::info!("下载协调器已停止");
    }
}

/// 把父协调器的变化转发给无痕模式的子协调器
struct ParentObserver {
    child: Addr<DownloadCoordinator>,
}

impl DownloadObserver for ParentObserver {
    fn model_changed(&mut self) {
        self.child.do_send(ParentModelChanged);
    }

    fn manager_going_down(&mut self) {
        self.child.do_send(ParentGoingDown);
    }
}
