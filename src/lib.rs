//! dlcoord: 下载生命周期协调器
//!
//! - `core`: 下载记录、路径决策、文件系统检查、历史记录与协调器 Actor
//! - `net`: 基于 awc 的网络层，把下载事件上报给协调器
//! - `ui`: 终端进度条与保存路径询问
//! - `cli` / `config` / `utils`: 命令行、配置文件、日志与校验

pub mod cli;
pub mod config;
pub mod core;
pub mod net;
pub mod ui;
pub mod utils;
