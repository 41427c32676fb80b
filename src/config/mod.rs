use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::DownloadError;
use crate::core::resolver::DownloadPrefs;
use crate::utils::validator;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 下载目录不可写时改用的目录，留空使用系统文档目录
    pub fallback_dir: String,
    /// 每次下载前询问保存位置
    pub prompt_for_download: bool,
    /// 下载目录由管理员锁定，永不询问
    pub download_dir_managed: bool,
    /// 下载完成后自动打开的扩展名
    pub auto_open_extensions: Vec<String>,
    /// 可信的扩展商店地址
    pub trusted_gallery_origins: Vec<String>,
    /// 下载历史文件
    pub history_file: String,
    /// 视为危险的下载域名
    pub dangerous_hosts: Vec<String>,
    /// 启动时清理上次遗留的空占位文件
    pub sweep_orphaned_reservations: bool,
    /// 网络超时时间（秒）
    pub timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 日志文件
    pub log_file: String,
    /// 日志级别：error / warn / info / debug / trace
    pub log_level: String,
    /// 日志文件最大大小（字节），超过后轮转
    pub log_max_size: u64,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("dlcoord"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        let prefs = DownloadPrefs::default();
        Self {
            download_dir: prefs.download_dir.display().to_string(),
            fallback_dir: String::new(),
            prompt_for_download: false,
            download_dir_managed: false,
            auto_open_extensions: Vec::new(),
            trusted_gallery_origins: vec!["https://chrome.google.com".to_string()],
            history_file: data_dir().join("history.json").display().to_string(),
            dangerous_hosts: Vec::new(),
            sweep_orphaned_reservations: true,
            timeout: 30,
            user_agent: format!("dlcoord/{}", env!("CARGO_PKG_VERSION")),
            log_file: data_dir().join("logs").join("dlcoord.log").display().to_string(),
            log_level: "info".to_string(),
            log_max_size: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在时写入默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    // 格式错误时不覆盖用户的文件
                    log::warn!("配置文件格式错误: {}，使用默认配置", e);
                    Ok(Config::default())
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::ConfigError(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)?;
        Ok(())
    }

    fn generate_tutorial_content() -> String {
        r#"# dlcoord 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖这里的设置，优先级：命令行 > 配置文件 > 默认值
#
# 配置文件位置：
# - Windows: %APPDATA%/dlcoord/dlcoord.conf
# - macOS: ~/Library/Application Support/dlcoord/dlcoord.conf
# - Linux: ~/.config/dlcoord/dlcoord.conf
#
# 使用示例：
#   dlcoord get https://example.com/file.zip             # 下载到默认目录
#   dlcoord -d /tmp get https://example.com/file.zip     # 指定下载目录
#   dlcoord get --save-as https://example.com/file.zip   # 询问保存位置
#   dlcoord list                                         # 查看下载历史
#   dlcoord search report                                # 按文件名或地址搜索
#   dlcoord remove 3                                     # 删除一条历史记录
#   dlcoord clear --since-minutes 60                     # 清除最近一小时的记录
#
# ==================== 保存位置 ====================
#
# download_dir                 默认下载目录
# fallback_dir                 下载目录不可写时使用的目录，留空为系统文档目录
# prompt_for_download          每次下载前询问保存位置
# download_dir_managed         下载目录被锁定时设为 true，此时永不询问
#
# 同名文件会自动编号：report.pdf、report (1).pdf ... 最多 100 个。
# 下载过程中文件名为 <文件名>.crdownload，完成后改回真实名称。
#
# ==================== 安全 ====================
#
# 可执行文件（exe、msi、bat 等）下载后先以 "Unconfirmed <编号>.crdownload"
# 保存，需要确认后才会改回真实名称；未确认就退出会删除该文件。
#
# auto_open_extensions         自动打开的扩展名，例如 ["pdf"]
# trusted_gallery_origins      扩展安装包只有来自这些地址才不视为危险
# dangerous_hosts              来自这些域名（含子域名）的下载一律视为危险
#
# ==================== 历史与清理 ====================
#
# history_file                 下载历史（JSON）
# sweep_orphaned_reservations  启动时删除无人引用的空 .crdownload 占位文件
#
# ==================== 网络与日志 ====================
#
# timeout                      网络超时时间（秒）
# user_agent                   请求使用的 User-Agent
# log_file / log_level         日志文件与级别
# log_max_size                 日志文件超过该大小（字节）后轮转为 .backup
#
# ==================== 配置项 ===================="#
            .to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.download_dir.is_empty() {
            return Err(DownloadError::ConfigError("下载目录不能为空".to_string()));
        }
        if self.history_file.is_empty() {
            return Err(DownloadError::ConfigError("历史文件路径不能为空".to_string()));
        }
        if self.timeout == 0 {
            return Err(DownloadError::ConfigError("超时时间必须大于0".to_string()));
        }
        if self.log_max_size == 0 {
            return Err(DownloadError::ConfigError("日志文件大小必须大于0".to_string()));
        }
        validator::validate_log_level(&self.log_level)
            .map_err(|e| DownloadError::ConfigError(e.to_string()))?;
        validator::validate_extensions(&self.auto_open_extensions)
            .map_err(|e| DownloadError::ConfigError(e.to_string()))?;
        for origin in &self.trusted_gallery_origins {
            if !validator::is_valid_url(origin) {
                return Err(DownloadError::ConfigError(format!("无效的商店地址: {}", origin)));
            }
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(history) = &args.history_file {
            self.history_file = history.clone();
        }
        if args.prompt {
            self.prompt_for_download = true;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
    }

    /// 转换为协调器使用的偏好设置
    pub fn download_prefs(&self) -> DownloadPrefs {
        let download_dir = PathBuf::from(&self.download_dir);
        let fallback_dir = if self.fallback_dir.is_empty() {
            dirs::document_dir().unwrap_or_else(|| download_dir.clone())
        } else {
            PathBuf::from(&self.fallback_dir)
        };
        DownloadPrefs {
            download_dir,
            fallback_dir,
            prompt_for_download: self.prompt_for_download,
            download_dir_managed: self.download_dir_managed,
            auto_open_extensions: self
                .auto_open_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect::<HashSet<_>>(),
            trusted_gallery_origins: self.trusted_gallery_origins.clone(),
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 询问保存位置: {}\n\
            - 历史文件: {}\n\
            - 危险域名: {}\n\
            - 清理遗留占位文件: {}\n\
            - 超时时间: {} 秒\n\
            - 日志: {} ({})",
            self.download_dir,
            if self.download_dir_managed {
                "已锁定"
            } else if self.prompt_for_download {
                "启用"
            } else {
                "禁用"
            },
            self.history_file,
            if self.dangerous_hosts.is_empty() {
                "无".to_string()
            } else {
                self.dangerous_hosts.join(", ")
            },
            if self.sweep_orphaned_reservations { "启用" } else { "禁用" },
            self.timeout,
            self.log_file,
            self.log_level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.prompt_for_download);
        assert!(config.sweep_orphaned_reservations);
        assert_eq!(config.timeout, 30);
        assert_eq!(config.log_level, "info");
        assert_ok!(config.validate());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.timeout = 0;
        assert_err!(config.validate());

        config = Config::default();
        config.log_level = "verbose".to_string();
        assert_err!(config.validate());

        config = Config::default();
        config.auto_open_extensions = vec!["p df".to_string()];
        assert_err!(config.validate());

        config = Config::default();
        config.trusted_gallery_origins = vec!["not a url".to_string()];
        assert_err!(config.validate());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dlcoord.conf");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.download_dir = "/srv/downloads".to_string();
        config.dangerous_hosts = vec!["evil.example".to_string()];
        config.save_with_tutorial(path).expect("保存带教程的配置失败");

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("dlcoord 配置文件"));
        assert!(content.contains("使用示例"));

        let loaded = Config::load(path).expect("加载配置失败");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlcoord.conf");
        let loaded = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlcoord.conf");
        fs::write(&path, "prompt_for_download = true\ntimeout = 5\n").unwrap();
        let loaded = Config::load(path.to_str().unwrap()).unwrap();
        assert!(loaded.prompt_for_download);
        assert_eq!(loaded.timeout, 5);
        assert_eq!(loaded.log_level, "info");
    }

    #[test]
    fn test_merge_from_args() {
        let args = crate::cli::Args::try_parse_from([
            "dlcoord",
            "-d",
            "/tmp/dl",
            "--prompt",
            "--history",
            "/tmp/h.json",
            "list",
        ])
        .unwrap();
        let mut config = Config::default();
        config.merge_from_args(&args);
        assert_eq!(config.download_dir, "/tmp/dl");
        assert_eq!(config.history_file, "/tmp/h.json");
        assert!(config.prompt_for_download);
    }

    #[test]
    fn test_download_prefs() {
        let mut config = Config::default();
        config.download_dir = "/tmp/dl".to_string();
        config.fallback_dir = "/tmp/docs".to_string();
        config.auto_open_extensions = vec![".PDF".to_string(), "txt".to_string()];
        let prefs = config.download_prefs();
        assert_eq!(prefs.download_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(prefs.fallback_dir, PathBuf::from("/tmp/docs"));
        assert!(prefs.auto_open_extensions.contains("pdf"));
        assert!(prefs.should_auto_open(Path::new("/tmp/dl/a.PDF")));
    }

    #[test]
    fn test_config_summary() {
        let summary = Config::default().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("下载目录"));
        assert!(summary.contains("危险域名: 无"));
    }
}
