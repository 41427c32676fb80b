//! CLI: 命令行接口和参数解析模块
//!
//! ## 支持的命令
//!
//! - 下载：`dlcoord get <url>...`、`dlcoord get -f urls.txt`
//! - 另存为：`dlcoord get --save-as <url>`
//! - 历史：`dlcoord list`、`dlcoord search <关键字>`
//! - 清理：`dlcoord remove <句柄>`、`dlcoord clear [--since-minutes N]`
//! - 编辑配置：`dlcoord -e`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/dlcoord/dlcoord.conf`
//! - macOS: `~/Library/Application Support/dlcoord/dlcoord.conf`
//! - Linux: `~/.config/dlcoord/dlcoord.conf`

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::utils::validator;

/// 构建信息，来自 build.rs
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    dirs::config_dir()
        .map(|d| d.join("dlcoord").join("dlcoord.conf"))
        .unwrap_or_else(|| Path::new(".").join("dlcoord.conf"))
        .display()
        .to_string()
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// dlcoord 命令行参数
///
/// 示例用法：
///   dlcoord get https://example.com/file.zip
///   dlcoord -d /tmp get --save-as https://example.com/file.zip
///   dlcoord search report
///   dlcoord -e  # 编辑配置文件
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dlcoord",
    author = "panzhifu",
    version = VERSION,
    about = "一个用 Rust 编写的下载生命周期协调器",
    long_about = "跟踪每个下载从创建、决定保存路径、危险文件确认到完成或取消的全过程，并保存下载历史。\n\n示例：\n  dlcoord get https://example.com/file.zip\n  dlcoord list\n  dlcoord clear --since-minutes 60\n"
)]
pub struct Args {
    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, global = true, default_value_t = default_config_path())]
    pub config: String,

    /// 用系统默认编辑器打开配置文件并退出
    #[arg(short = 'e', long = "edit")]
    pub edit_config: bool,

    /// 指定下载目录，覆盖配置文件中的设置
    #[arg(short = 'd', long, global = true)]
    pub download_dir: Option<String>,

    /// 指定历史文件，覆盖配置文件中的设置
    #[arg(long = "history", global = true)]
    pub history_file: Option<String>,

    /// 每次下载都询问保存位置
    #[arg(long, global = true)]
    pub prompt: bool,

    /// 日志级别
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// 下载一个或多个地址
    Get(GetArgs),
    /// 列出下载历史
    List {
        /// 只列出该目录中的下载
        #[arg(long)]
        dir: Option<String>,
    },
    /// 按文件名或地址搜索下载历史
    Search {
        query: String,
    },
    /// 按句柄删除一条下载记录
    Remove {
        handle: i64,
    },
    /// 清除下载记录
    Clear {
        /// 只清除最近 N 分钟内开始的记录
        #[arg(long)]
        since_minutes: Option<i64>,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GetArgs {
    /// 要下载的URL列表
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径，每行一个URL
    #[arg(short, long)]
    pub file: Option<String>,

    /// 指定保存的文件名，原样使用
    #[arg(short = 'n', long)]
    pub file_name: Option<String>,

    /// 引用页地址
    #[arg(long, default_value = "")]
    pub referrer: String,

    /// 询问保存位置
    #[arg(long)]
    pub save_as: bool,
}

impl Args {
    pub fn parse_args() -> Result<(Self, Config), DownloadError> {
        let args = Args::parse();

        if args.edit_config {
            // 先确保文件存在
            Config::load(&args.config)?;
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let mut config = Config::load(&args.config)?;
        config.merge_from_args(&args);
        config.validate()?;
        Ok((args, config))
    }
}

impl GetArgs {
    /// 合并命令行和文件中的地址
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = self.urls.clone();

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path)?;
            // 按行读取URL，忽略空行和注释
            urls.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }

        if urls.is_empty() {
            return Err(DownloadError::InvalidUrl(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }
        if let Some(bad) = urls.iter().find(|u| !validator::is_valid_url(u)) {
            return Err(DownloadError::InvalidUrl(bad.clone()));
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["dlcoord", "get", "https://example.com/file.zip"]).unwrap();
        match args.command {
            Some(Command::Get(get)) => {
                assert_eq!(get.urls, vec!["https://example.com/file.zip"]);
                assert!(!get.save_as);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::try_parse_from(["dlcoord", "list", "-d", "/tmp/dl", "--prompt"]).unwrap();
        assert_eq!(args.download_dir.as_deref(), Some("/tmp/dl"));
        assert!(args.prompt);
        assert!(matches!(args.command, Some(Command::List { dir: None })));
    }

    #[test]
    fn test_clear_and_remove() {
        let args = Args::try_parse_from(["dlcoord", "clear", "--since-minutes", "30"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Clear {
                since_minutes: Some(30)
            })
        ));
        let args = Args::try_parse_from(["dlcoord", "remove", "7"]).unwrap();
        assert!(matches!(args.command, Some(Command::Remove { handle: 7 })));
        assert!(Args::try_parse_from(["dlcoord", "remove", "abc"]).is_err());
    }

    #[test]
    fn test_url_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let url_file = dir.path().join("urls.txt");
        fs::write(
            &url_file,
            "# 这是一个注释\nhttps://example.com/file1.zip\n\nhttps://example.com/file2.zip\n",
        )
        .unwrap();

        let args = Args::try_parse_from([
            "dlcoord",
            "get",
            "-f",
            url_file.to_str().unwrap(),
            "https://example.com/file0.zip",
        ])
        .unwrap();
        let Some(Command::Get(get)) = args.command else {
            panic!("expected get");
        };
        let urls = get.get_urls().unwrap();
        assert_eq!(
            urls,
            vec![
                "https://example.com/file0.zip",
                "https://example.com/file1.zip",
                "https://example.com/file2.zip"
            ]
        );
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let get = GetArgs {
            urls: vec!["not-a-url".to_string()],
            file: None,
            file_name: None,
            referrer: String::new(),
            save_as: false,
        };
        assert!(matches!(get.get_urls(), Err(DownloadError::InvalidUrl(_))));

        let empty = GetArgs { urls: Vec::new(), ..get };
        assert!(empty.get_urls().is_err());
    }
}
