use actix::Addr;
use awc::http::header::{self, HeaderMap};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::transfers::Transfers;
use crate::config::Config;
use crate::core::coordinator::{
    CreateDownload, DownloadCoordinator, InterruptDownload, ResponseCompleted, StartDownload,
    UpdateDownload,
};
use crate::core::download::{DownloadCreateInfo, DownloadId};
use crate::core::error::{net_error, DownloadError, DownloadResult};

const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(200);

/// 一次下载请求
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub referrer: String,
    /// 指定的保存路径，原样使用
    pub force_file_name: Option<PathBuf>,
    pub save_as: bool,
}

/// 由响应头构造下载信息
pub fn create_info(request: &FetchRequest, headers: &HeaderMap) -> DownloadCreateInfo {
    let header_str = |name| headers.get(name).and_then(|v| v.to_str().ok());
    let mut info = DownloadCreateInfo::new(request.url.clone());
    info.referrer = request.referrer.clone();
    info.content_disposition = header_str(header::CONTENT_DISPOSITION)
        .unwrap_or_default()
        .to_string();
    info.mime_type = header_str(header::CONTENT_TYPE)
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    info.total_bytes = header_str(header::CONTENT_LENGTH).and_then(|v| v.parse().ok());
    // 命令行发起的下载都视为用户操作
    info.has_user_gesture = true;
    info.prompt_user_for_save_location = request.save_as;
    info.force_file_name = request.force_file_name.clone();
    info
}

/// 已登记、等待写入的下载。文件在登记前打开，之后的重命名不影响写入
struct Staged {
    id: DownloadId,
    file: tokio::fs::File,
    cancelled: Arc<AtomicBool>,
}

/// 基于 awc 的网络层
///
/// 数据先写入暂存文件，协调器确定路径后由 `NetFileHandler` 移动到
/// `.crdownload` 文件，写入不受影响。
#[derive(Clone)]
pub struct Fetcher {
    coordinator: Addr<DownloadCoordinator>,
    transfers: Transfers,
    staging_dir: PathBuf,
    user_agent: String,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(coordinator: Addr<DownloadCoordinator>, transfers: Transfers, config: &Config) -> Self {
        Self {
            coordinator,
            transfers,
            staging_dir: PathBuf::from(&config.download_dir),
            user_agent: config.user_agent.clone(),
            timeout: Duration::from_secs(config.timeout),
        }
    }

    /// 下载一个地址，数据收完或出错后返回
    pub async fn fetch(&self, request: FetchRequest) -> DownloadResult<DownloadId> {
        let client = awc::Client::builder()
            .timeout(self.timeout)
            .add_default_header((header::USER_AGENT, self.user_agent.clone()))
            .finish();
        let response = client
            .get(request.url.as_str())
            .send()
            .await
            .map_err(|e| DownloadError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DownloadError::ServerError(format!(
                "{} 返回 {}",
                request.url,
                response.status()
            )));
        }
        let info = create_info(&request, response.headers());
        let staged = self.begin(info).await?;
        let id = staged.id;
        self.pump(staged, response).await;
        Ok(id)
    }

    /// 创建暂存文件并向协调器登记
    async fn begin(&self, info: DownloadCreateInfo) -> DownloadResult<Staged> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let staged = self.staging_dir.join(format!(".dlcoord-{}.tmp", Uuid::new_v4()));
        let file = tokio::fs::File::create(&staged).await?;

        let url = info.url().to_string();
        let Some(id) = self.coordinator.send(CreateDownload { info }).await? else {
            drop(file);
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(DownloadError::Unknown(format!("协调器已关闭，放弃下载 {}", url)));
        };
        let cancelled = self.transfers.register(id, staged);
        self.coordinator.do_send(StartDownload { id });
        Ok(Staged {
            id,
            file,
            cancelled,
        })
    }

    /// 把响应体写入暂存文件并上报进度
    async fn pump<S, E>(&self, staged: Staged, mut body: S)
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let Staged {
            id,
            mut file,
            cancelled,
        } = staged;
        let mut received = 0u64;
        let mut last_update = Instant::now();
        while let Some(chunk) = body.next().await {
            if cancelled.load(Ordering::SeqCst) {
                log::debug!("下载 {} 已取消，停止接收", id);
                return;
            }
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("下载 {} 网络流错误: {}", id, e);
                    self.interrupt(id, received, net_error::FAILED);
                    return;
                }
            };
            if let Err(e) = file.write_all(&bytes).await {
                log::error!("下载 {} 写入失败: {}", id, e);
                self.interrupt(id, received, DownloadError::from(e).net_error_code());
                return;
            }
            received += bytes.len() as u64;
            if last_update.elapsed() >= PROGRESS_UPDATE_INTERVAL {
                self.coordinator.do_send(UpdateDownload {
                    id,
                    received_bytes: received,
                });
                last_update = Instant::now();
            }
        }

        if let Err(e) = file.flush().await {
            self.interrupt(id, received, DownloadError::from(e).net_error_code());
            return;
        }
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        self.coordinator.do_send(ResponseCompleted {
            id,
            size: received,
            error: net_error::OK,
            hash: None,
        });
    }

    fn interrupt(&self, id: DownloadId, received_bytes: u64, error: i32) {
        self.coordinator.do_send(InterruptDownload {
            id,
            received_bytes,
            error,
        });
    }
}
