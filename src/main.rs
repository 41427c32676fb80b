use actix::prelude::*;
use anyhow::{bail, Context as _};
use clap::CommandFactory;
use log::LevelFilter;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use dlcoord::cli::{self, Command, GetArgs};
use dlcoord::config::Config;
use dlcoord::core::coordinator::*;
use dlcoord::core::prober::RunFileTask;
use dlcoord::core::{
    Collaborators, DownloadId, DownloadRecord, FileProber, HostBlocklistClassifier, JsonJournal,
    LifeState,
};
use dlcoord::net::{FetchRequest, Fetcher, NetFileHandler, Transfers};
use dlcoord::ui::{self, ConsoleUi, DownloadSummary, ProgressObserver, UiRequest};
use dlcoord::utils::logger;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HISTORY_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // 解析参数和配置
    let (args, config) = match cli::Args::parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("参数解析失败: {}", e);
            std::process::exit(1);
        }
    };

    let level = logger::parse_level(&config.log_level).unwrap_or(LevelFilter::Info);
    logger::init(Path::new(&config.log_file), level, config.log_max_size)
        .context("初始化日志失败")?;
    log::info!("程序启动，配置文件: {}", args.config);
    log::info!("{}", config.get_summary());

    let Some(command) = args.command.clone() else {
        println!("{}\n", config.get_summary());
        cli::Args::command().print_help()?;
        return Ok(());
    };

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let transfers = Transfers::new();
    let journal = Arc::new(JsonJournal::new(&config.history_file));
    let file_thread = FileProber::start_serial();
    let coordinator = start_coordinator(
        &config,
        journal.clone(),
        file_thread.clone(),
        transfers.clone(),
        ui_tx,
    )
    .await?;

    let result = match command {
        Command::Get(get) => run_get(&coordinator, transfers, &config, &get, ui_rx).await,
        Command::List { dir } => {
            let records = coordinator
                .send(GetAllDownloads {
                    dir: dir.map(PathBuf::from),
                })
                .await?;
            print_records(&records);
            Ok(())
        }
        Command::Search { query } => {
            let records = coordinator.send(SearchDownloads { query }).await?;
            print_records(&records);
            Ok(())
        }
        Command::Remove { handle } => {
            if coordinator.send(RemoveDownload { handle }).await? {
                ui::print_success(&format!("已删除记录 {}", handle));
            } else {
                ui::print_warning(&format!("没有句柄为 {} 的记录", handle));
            }
            Ok(())
        }
        Command::Clear { since_minutes } => {
            let removed = match since_minutes {
                Some(minutes) => {
                    let begin = chrono::Utc::now() - chrono::Duration::minutes(minutes);
                    coordinator.send(RemoveDownloads { begin }).await?
                }
                None => coordinator.send(RemoveAllDownloads).await?,
            };
            ui::print_success(&format!("已清除 {} 条记录", removed));
            Ok(())
        }
    };

    coordinator.send(Shutdown).await?;
    // 等待文件线程上排队的删除完成
    file_thread.send(RunFileTask::new(|| {})).await?;
    journal.flush().await;
    log::info!("程序退出");
    result
}

/// 组装协作方并启动协调器，等待历史记录加载完成
async fn start_coordinator(
    config: &Config,
    journal: Arc<JsonJournal>,
    file_thread: Addr<FileProber>,
    transfers: Transfers,
    ui_tx: UnboundedSender<UiRequest>,
) -> anyhow::Result<Addr<DownloadCoordinator>> {
    let classifier = HostBlocklistClassifier::new(config.dangerous_hosts.clone());
    let collab = Collaborators::new(journal, file_thread.clone())
        .with_classifier(Arc::new(classifier))
        .with_file_handler(Box::new(NetFileHandler::new(transfers, file_thread)))
        .with_ui(Box::new(ConsoleUi::new(ui_tx.clone())));
    let coordinator = DownloadCoordinator::new(config.download_prefs(), collab)
        .with_orphan_sweep(config.sweep_orphaned_reservations)
        .start();
    coordinator
        .send(AddObserver {
            observer: Box::new(ProgressObserver::new(ui_tx)),
        })
        .await?;

    let started = Instant::now();
    while !coordinator.send(GetStats).await?.history_loaded {
        if started.elapsed() > HISTORY_LOAD_TIMEOUT {
            bail!("加载下载历史超时");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(coordinator)
}

fn print_records(records: &[DownloadRecord]) {
    if records.is_empty() {
        println!("没有下载记录");
        return;
    }
    for record in records {
        println!("{}", ui::format_record(record));
    }
}

fn ask(request: &UiRequest) {
    match request {
        UiRequest::ChoosePath { suggested_path, .. } => {
            println!(
                "保存到 [{}]? 回车确认，输入其他路径另存，q 取消:",
                suggested_path.display()
            );
        }
        UiRequest::ConfirmDangerous { file_name, .. } => {
            ui::print_warning(&format!("{} 可能会损害您的计算机，是否保留? [y/N]", file_name));
        }
    }
}

fn answer(coordinator: &Addr<DownloadCoordinator>, request: UiRequest, line: &str) {
    match request {
        UiRequest::ChoosePath { id, suggested_path } => {
            match ui::parse_path_answer(line, &suggested_path) {
                Some(path) => coordinator.do_send(FileSelected { id, path }),
                None => coordinator.do_send(FileSelectionCancelled { id }),
            }
        }
        UiRequest::ConfirmDangerous { id, .. } => {
            if ui::parse_confirm_answer(line) {
                coordinator.do_send(ValidateDangerousDownload { id });
            } else {
                coordinator.do_send(CancelDownload { id });
            }
        }
    }
}

/// 下载所有地址，同时回答协调器的询问，全部结束后打印摘要
async fn run_get(
    coordinator: &Addr<DownloadCoordinator>,
    transfers: Transfers,
    config: &Config,
    get: &GetArgs,
    mut ui_rx: UnboundedReceiver<UiRequest>,
) -> anyhow::Result<()> {
    let urls = get.get_urls()?;
    let force_file_name = match (&get.file_name, urls.len()) {
        (Some(name), 1) => Some(PathBuf::from(&config.download_dir).join(name)),
        (Some(_), _) => {
            ui::print_warning("多个地址时忽略 --file-name");
            None
        }
        (None, _) => None,
    };

    let started = Instant::now();
    let fetcher = Fetcher::new(coordinator.clone(), transfers, config);
    let mut tasks = Vec::new();
    for url in urls {
        let request = FetchRequest {
            url: url.clone(),
            referrer: get.referrer.clone(),
            force_file_name: force_file_name.clone(),
            save_as: get.save_as,
        };
        let fetcher = fetcher.clone();
        tasks.push(actix::spawn(async move {
            let result = fetcher.fetch(request).await;
            (url, result)
        }));
    }
    log::info!("开始下载 {} 个地址", tasks.len());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: VecDeque<UiRequest> = VecDeque::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut seen: HashSet<DownloadId> = HashSet::new();

    loop {
        tokio::select! {
            Some(request) = ui_rx.recv() => {
                pending.push_back(request);
                if pending.len() == 1 {
                    ask(&pending[0]);
                }
            }
            line = stdin.next_line(), if !pending.is_empty() => {
                let line = line?.unwrap_or_default();
                if let Some(request) = pending.pop_front() {
                    answer(coordinator, request, &line);
                }
                if let Some(next) = pending.front() {
                    ask(next);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                ui::print_warning("收到中断信号，正在取消下载");
                log::info!("用户中断下载");
                for record in coordinator.send(GetCurrentDownloads { dir: None }).await? {
                    seen.insert(record.id);
                    coordinator.do_send(CancelDownload { id: record.id });
                }
                for task in &tasks {
                    task.abort();
                }
                break;
            }
            _ = ticker.tick() => {
                if pending.is_empty() && tasks.iter().all(|t| t.is_finished()) {
                    let current = coordinator.send(GetCurrentDownloads { dir: None }).await?;
                    if current.iter().all(|r| !r.is_in_progress()) {
                        break;
                    }
                }
            }
        }
    }

    let mut summary = DownloadSummary::default();
    for task in tasks {
        match task.await {
            Ok((_, Ok(id))) => {
                seen.insert(id);
            }
            Ok((url, Err(e))) => {
                log::error!("下载失败: {} - {}", url, e);
                ui::print_error(&format!("{}: {}", url, e));
                summary.total_files += 1;
                summary.failed_count += 1;
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::error!("下载任务异常结束: {}", e),
        }
    }
    for id in seen {
        let Some(record) = coordinator.send(GetDownload { id }).await? else {
            continue;
        };
        match record.life_state {
            LifeState::Complete => {
                let path = record.final_path.as_deref().map(Path::display);
                if let Some(path) = path {
                    ui::print_success(&path.to_string());
                }
            }
            LifeState::Interrupted => ui::print_error(&format!(
                "{} (错误 {})",
                record.url(),
                record.interrupt_reason.unwrap_or(0)
            )),
            _ => {}
        }
        summary.add(&record);
    }
    summary.elapsed_time = started.elapsed();
    println!("{}", summary);
    log::info!(
        "下载结束 - 成功: {}, 失败: {}, 取消: {}",
        summary.success_count,
        summary.failed_count,
        summary.cancelled_count
    );
    Ok(())
}
