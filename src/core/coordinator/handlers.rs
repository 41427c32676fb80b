use actix::prelude::*;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::path::Path;

use super::actor::{on_disk_path, AbortReason, DownloadCoordinator};
use super::messages::*;
use crate::core::download::{DownloadId, DownloadRecord};
use crate::core::error::net_error;

impl Handler<CreateDownload> for DownloadCoordinator {
    type Result = MessageResult<CreateDownload>;

    fn handle(&mut self, msg: CreateDownload, _ctx: &mut Self::Context) -> Self::Result {
        if self.shut_down {
            log::warn!("协调器已关闭，忽略新下载: {}", msg.info.url());
            return MessageResult(None);
        }
        let id = DownloadId::new();
        let record = DownloadRecord::new(id, &msg.info, self.is_off_the_record);
        log::info!("新下载 {}: {}", id, record.url());
        self.registry.insert_active(record);
        self.assert_consistent();
        MessageResult(Some(id))
    }
}

impl Handler<StartDownload> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: StartDownload, ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        self.start_download(msg.id, ctx);
    }
}

impl Handler<FileSelected> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: FileSelected, ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        let Some(record) = self.registry.active(msg.id) else {
            return;
        };
        if record.state_info.prompt_user_for_save_location {
            self.last_download_path = msg.path.parent().map(Path::to_path_buf);
        }
        self.continue_with_path(msg.id, msg.path, ctx);
    }
}

impl Handler<FileSelectionCancelled> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: FileSelectionCancelled, ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        log::info!("用户取消了保存对话框: {}", msg.id);
        self.abort_download(msg.id, AbortReason::Cancelled, ctx);
    }
}

impl Handler<UpdateDownload> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: UpdateDownload, _ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        let Some(record) = self.registry.active_mut(msg.id) else {
            return;
        };
        record.update(msg.received_bytes);
        self.update_journal(msg.id);
        self.notify_updated(msg.id);
    }
}

impl Handler<ResponseCompleted> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: ResponseCompleted, ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        let Some(record) = self.registry.active_mut(msg.id) else {
            return;
        };
        if !net_error::is_benign_completion(msg.error) {
            self.abort_download(
                msg.id,
                AbortReason::Interrupted {
                    received_bytes: msg.size,
                    error: msg.error,
                },
                ctx,
            );
            return;
        }

        record.on_all_data_saved(msg.size);
        if let Some(hash) = msg.hash.filter(|h| !h.is_empty()) {
            let classifier = self.collab.classifier.clone();
            let url = record.url().to_string();
            let id = msg.id;
            actix::spawn(async move {
                if classifier.check_download_hash(&url, &hash).await {
                    log::warn!("下载 {} 的内容哈希命中黑名单: {}", id, url);
                } else {
                    log::debug!("下载 {} 的内容哈希检查通过", id);
                }
            });
        }
        self.update_journal(msg.id);
        self.notify_updated(msg.id);
        self.maybe_complete(msg.id, ctx);
    }
}

impl Handler<InterruptDownload> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: InterruptDownload, ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        self.abort_download(
            msg.id,
            AbortReason::Interrupted {
                received_bytes: msg.received_bytes,
                error: msg.error,
            },
            ctx,
        );
    }
}

impl Handler<CancelDownload> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: CancelDownload, ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        self.abort_download(msg.id, AbortReason::Cancelled, ctx);
    }
}

impl Handler<ValidateDangerousDownload> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: ValidateDangerousDownload, ctx: &mut Self::Context) {
        if self.shut_down {
            return;
        }
        let Some(record) = self.registry.active_mut(msg.id) else {
            return;
        };
        if !record.validate_dangerous() {
            return;
        }
        log::info!("用户确认保留危险下载: {}", record.url());
        self.update_journal(msg.id);
        self.notify_updated(msg.id);
        self.maybe_complete(msg.id, ctx);
    }
}

impl Handler<MaybeCompleteDownload> for DownloadCoordinator {
    type Result = bool;

    fn handle(&mut self, msg: MaybeCompleteDownload, ctx: &mut Self::Context) -> bool {
        self.maybe_complete(msg.id, ctx)
    }
}

impl Handler<RemoveDownload> for DownloadCoordinator {
    type Result = bool;

    fn handle(&mut self, msg: RemoveDownload, ctx: &mut Self::Context) -> bool {
        if self.shut_down {
            return false;
        }
        let Some(id) = self.registry.id_for_handle(msg.handle) else {
            return false;
        };
        if self.registry.is_active(id) {
            self.abort_download(id, AbortReason::Cancelled, ctx);
            // 危险下载在取消时已被整体丢弃
            if self.registry.get(id).is_none() {
                return true;
            }
        }
        self.remove_journal_entry(msg.handle);
        self.registry.evict(id);
        self.notify_model_changed();
        self.assert_consistent();
        true
    }
}

impl DownloadCoordinator {
    fn remove_between(&mut self, begin: DateTime<Utc>, end: Option<DateTime<Utc>>) -> usize {
        if self.shut_down {
            return 0;
        }
        let journal = self.collab.journal.clone();
        actix::spawn(async move {
            if let Err(e) = journal.remove_entries_between(begin, end).await {
                log::warn!("清理历史记录失败: {}", e);
            }
        });

        let doomed: Vec<DownloadId> = self
            .registry
            .history()
            .filter(|r| r.life_state.is_terminal())
            .filter(|r| r.start_time >= begin && end.map_or(true, |end| r.start_time < end))
            .map(|r| r.id)
            .collect();
        for id in &doomed {
            self.registry.evict(*id);
        }
        if !doomed.is_empty() {
            log::info!("删除了 {} 条下载记录", doomed.len());
            self.notify_model_changed();
        }
        self.assert_consistent();
        doomed.len()
    }
}

impl Handler<RemoveDownloadsBetween> for DownloadCoordinator {
    type Result = usize;

    fn handle(&mut self, msg: RemoveDownloadsBetween, _ctx: &mut Self::Context) -> usize {
        self.remove_between(msg.begin, msg.end)
    }
}

impl Handler<RemoveDownloads> for DownloadCoordinator {
    type Result = usize;

    fn handle(&mut self, msg: RemoveDownloads, _ctx: &mut Self::Context) -> usize {
        self.remove_between(msg.begin, None)
    }
}

impl Handler<RemoveAllDownloads> for DownloadCoordinator {
    type Result = usize;

    fn handle(&mut self, _msg: RemoveAllDownloads, _ctx: &mut Self::Context) -> usize {
        if let Some(parent) = &self.parent {
            parent.do_send(RemoveAllDownloads);
        }
        self.remove_between(DateTime::<Utc>::MIN_UTC, None)
    }
}

impl Handler<Shutdown> for DownloadCoordinator {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, _msg: Shutdown, _ctx: &mut Self::Context) -> Self::Result {
        if self.shut_down {
            return Box::pin(async {});
        }
        self.shut_down = true;
        log::info!("下载协调器正在关闭");
        for observer in self.observers.values_mut() {
            observer.manager_going_down();
        }

        let mut deletions = Vec::new();
        for id in self.registry.active_ids() {
            let Some(record) = self.registry.get_mut(id) else {
                continue;
            };
            self.collab.file_handler.cancel(id);
            if record.is_dangerous() {
                if let Some(path) = on_disk_path(record) {
                    deletions.push(path);
                }
                if let Some(handle) = record.db_handle.value() {
                    self.remove_journal_entry(handle);
                } else if record.journal_pending {
                    self.pending_discards.insert(id);
                }
            } else {
                record.cancel();
                self.update_journal(id);
            }
        }
        let cleared = self.registry.clear();
        log::debug!("关闭时释放了 {} 条下载记录", cleared);

        if let Some(observer_id) = self.parent_observer.take() {
            if let Some(parent) = self.parent.take() {
                parent.do_send(RemoveObserver { id: observer_id });
            }
        }

        let futures: Vec<_> = deletions
            .into_iter()
            .map(|path| self.delete_file_future(path))
            .collect();
        Box::pin(async move {
            join_all(futures).await;
            log::info!("下载协调器已关闭");
        })
    }
}

impl Handler<AddObserver> for DownloadCoordinator {
    type Result = MessageResult<AddObserver>;

    fn handle(&mut self, msg: AddObserver, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.add_observer(msg.observer))
    }
}

impl Handler<RemoveObserver> for DownloadCoordinator {
    type Result = bool;

    fn handle(&mut self, msg: RemoveObserver, _ctx: &mut Self::Context) -> bool {
        self.observers.remove(&msg.id).is_some()
    }
}

impl Handler<GetDownload> for DownloadCoordinator {
    type Result = MessageResult<GetDownload>;

    fn handle(&mut self, msg: GetDownload, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.registry.get(msg.id).cloned())
    }
}

impl Handler<GetDownloadByHandle> for DownloadCoordinator {
    type Result = MessageResult<GetDownloadByHandle>;

    fn handle(&mut self, msg: GetDownloadByHandle, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.registry.by_handle(msg.handle).cloned())
    }
}

impl Handler<GetAllDownloads> for DownloadCoordinator {
    type Result = MessageResult<GetAllDownloads>;

    fn handle(&mut self, msg: GetAllDownloads, _ctx: &mut Self::Context) -> Self::Result {
        let dir = msg.dir.as_deref();
        MessageResult(
            self.registry
                .history()
                .filter(|r| !r.is_temporary && Self::in_directory(r, dir))
                .cloned()
                .collect(),
        )
    }
}

impl Handler<GetTemporaryDownloads> for DownloadCoordinator {
    type Result = MessageResult<GetTemporaryDownloads>;

    fn handle(&mut self, msg: GetTemporaryDownloads, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(
            self.registry
                .history()
                .filter(|r| r.is_temporary && r.directory() == Some(msg.dir.as_path()))
                .cloned()
                .collect(),
        )
    }
}

impl Handler<GetCurrentDownloads> for DownloadCoordinator {
    type Result = ResponseFuture<Vec<DownloadRecord>>;

    fn handle(&mut self, msg: GetCurrentDownloads, _ctx: &mut Self::Context) -> Self::Result {
        let dir = msg.dir.as_deref();
        let mut local: Vec<DownloadRecord> = self
            .registry
            .records()
            .filter(|r| !r.is_temporary)
            .filter(|r| r.is_partial() || r.is_dangerous())
            .filter(|r| Self::in_directory(r, dir))
            .cloned()
            .collect();
        local.sort_by_key(|r| r.start_time);

        let Some(parent) = self.parent.clone() else {
            return Box::pin(async move { local });
        };
        Box::pin(async move {
            match parent.send(GetCurrentDownloads { dir: msg.dir }).await {
                Ok(mut from_parent) => local.append(&mut from_parent),
                Err(e) => log::warn!("查询父协调器失败: {}", e),
            }
            local
        })
    }
}

impl Handler<SearchDownloads> for DownloadCoordinator {
    type Result = ResponseFuture<Vec<DownloadRecord>>;

    fn handle(&mut self, msg: SearchDownloads, _ctx: &mut Self::Context) -> Self::Result {
        let query = msg.query.to_lowercase();
        let is_otr = self.is_off_the_record;
        let mut local: Vec<DownloadRecord> = self
            .registry
            .history()
            .filter(|r| !r.is_temporary && !r.is_extension_install)
            .filter(|r| r.is_off_the_record == is_otr)
            .filter(|r| r.matches_query(&query))
            .cloned()
            .collect();

        let Some(parent) = self.parent.clone() else {
            return Box::pin(async move { local });
        };
        Box::pin(async move {
            match parent.send(SearchDownloads { query: msg.query }).await {
                Ok(mut from_parent) => local.append(&mut from_parent),
                Err(e) => log::warn!("查询父协调器失败: {}", e),
            }
            local
        })
    }
}

impl Handler<GetStats> for DownloadCoordinator {
    type Result = MessageResult<GetStats>;

    fn handle(&mut self, _msg: GetStats, _ctx: &mut Self::Context) -> Self::Result {
        let mut stats = DownloadStats {
            progress_known: true,
            download_count: self.registry.len(),
            history_count: self.registry.history_len(),
            history_loaded: self.history_loaded,
            shut_down: self.shut_down,
            ..Default::default()
        };
        for id in self.registry.in_progress_ids() {
            let Some(record) = self.registry.get(id) else {
                continue;
            };
            stats.in_progress_count += 1;
            stats.received_bytes += record.received_bytes;
            match record.total_bytes {
                Some(total) if total > 0 => stats.total_bytes += total,
                _ => stats.progress_known = false,
            }
        }
        MessageResult(stats)
    }
}

impl Handler<GetIndexMembership> for DownloadCoordinator {
    type Result = MessageResult<GetIndexMembership>;

    fn handle(&mut self, msg: GetIndexMembership, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.registry.membership(msg.id))
    }
}

impl Handler<VerifyConsistency> for DownloadCoordinator {
    type Result = MessageResult<VerifyConsistency>;

    fn handle(&mut self, _msg: VerifyConsistency, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.registry.verify())
    }
}

impl Handler<SavePageDownloadStarted> for DownloadCoordinator {
    type Result = MessageResult<SavePageDownloadStarted>;

    fn handle(&mut self, msg: SavePageDownloadStarted, ctx: &mut Self::Context) -> Self::Result {
        if self.shut_down {
            return MessageResult(None);
        }
        let id = DownloadId::new();
        let mut record = DownloadRecord::new(id, &msg.info, self.is_off_the_record);
        if let Some(path) = msg.info.force_file_name.clone() {
            record.on_path_determined(path);
        }
        record.journal_pending = true;
        let entry = record.to_journal_entry();
        log::info!("网页另存为: {}", record.url());
        self.registry.insert_save_page(record);

        let journal = self.collab.journal.clone();
        ctx.spawn(
            async move { journal.add_entry(entry).await }
                .into_actor(self)
                .map(move |result, act, ctx| act.on_create_entry_complete(id, result, ctx)),
        );
        self.notify_model_changed();
        self.assert_consistent();
        MessageResult(Some(id))
    }
}

impl Handler<SavePageDownloadFinished> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, msg: SavePageDownloadFinished, _ctx: &mut Self::Context) {
        if self.shut_down || !self.registry.is_save_page(msg.id) {
            return;
        }
        let Some(record) = self.registry.get_mut(msg.id) else {
            return;
        };
        record.on_all_data_saved(msg.size);
        let final_path = record.final_path.clone().unwrap_or_default();
        record.on_renamed_to_final(final_path, 0);
        let journaled = record.db_handle.is_assigned();

        self.registry.leave_save_page(msg.id);
        if journaled {
            self.update_journal(msg.id);
        } else {
            self.registry.await_handle(msg.id);
        }
        self.notify_updated(msg.id);
        self.assert_consistent();
    }
}

impl Handler<ClearLastDownloadPath> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, _msg: ClearLastDownloadPath, _ctx: &mut Self::Context) {
        self.last_download_path = None;
    }
}

impl Handler<ParentModelChanged> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, _msg: ParentModelChanged, _ctx: &mut Self::Context) {
        if !self.shut_down {
            self.notify_model_changed();
        }
    }
}

impl Handler<ParentGoingDown> for DownloadCoordinator {
    type Result = ();

    fn handle(&mut self, _msg: ParentGoingDown, _ctx: &mut Self::Context) {
        log::info!("父协调器已关闭");
        self.parent = None;
        self.parent_observer = None;
    }
}
