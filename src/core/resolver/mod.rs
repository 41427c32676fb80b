//! 路径决策
//!
//! 纯函数：根据请求信息、用户偏好与引用页历史，决定建议保存路径、是否弹出
//! 保存对话框、是否视为危险下载。不做任何文件系统访问，磁盘上的检查交给
//! `prober` 完成。

pub mod danger;
pub mod filename;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::core::download::{DownloadRecord, DownloadStateInfo};
use danger::{
    file_danger_level, is_download_from_gallery, is_extension_file, is_extension_install,
    DangerLevel,
};

/// 决策时冻结的一份用户偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadPrefs {
    pub download_dir: PathBuf,
    /// 目录不可写时改用的目录
    pub fallback_dir: PathBuf,
    pub prompt_for_download: bool,
    /// 下载目录由策略锁定，永不弹出对话框
    pub download_dir_managed: bool,
    /// 自动打开的扩展名（小写，不带点）
    pub auto_open_extensions: HashSet<String>,
    pub trusted_gallery_origins: Vec<String>,
}

impl Default for DownloadPrefs {
    fn default() -> Self {
        let download_dir = dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("downloads"));
        let fallback_dir = dirs::document_dir().unwrap_or_else(|| download_dir.clone());
        Self {
            download_dir,
            fallback_dir,
            prompt_for_download: false,
            download_dir_managed: false,
            auto_open_extensions: HashSet::new(),
            trusted_gallery_origins: Vec::new(),
        }
    }
}

impl DownloadPrefs {
    /// 扩展文件本身永远不会自动打开
    pub fn should_auto_open(&self, path: &Path) -> bool {
        if is_extension_file(path) {
            return false;
        }
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .map(|ext| self.auto_open_extensions.contains(&ext))
            .unwrap_or(false)
    }
}

/// 决策输入，取自下载记录
#[derive(Debug, Clone)]
pub struct ResolveRequest<'a> {
    pub url: &'a str,
    pub referrer: &'a str,
    pub mime_type: &'a str,
    pub content_disposition: &'a str,
    pub state: &'a DownloadStateInfo,
}

impl<'a> ResolveRequest<'a> {
    pub fn from_record(record: &'a DownloadRecord) -> Self {
        Self {
            url: record.url(),
            referrer: &record.referrer,
            mime_type: &record.mime_type,
            content_disposition: &record.content_disposition,
            state: &record.state_info,
        }
    }
}

/// 决策结果
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResolution {
    pub suggested_path: PathBuf,
    pub prompt_required: bool,
    pub is_dangerous: bool,
    pub is_extension_install: bool,
}

impl CandidateResolution {
    /// 把结果写回路径决策状态，交给文件系统检查
    pub fn apply_to(&self, state: &DownloadStateInfo) -> DownloadStateInfo {
        DownloadStateInfo {
            suggested_path: self.suggested_path.clone(),
            prompt_user_for_save_location: self.prompt_required,
            is_dangerous_file: self.is_dangerous,
            is_extension_install: self.is_extension_install,
            ..state.clone()
        }
    }
}

pub fn resolve(
    request: &ResolveRequest<'_>,
    prefs: &DownloadPrefs,
    last_download_path: Option<&Path>,
    visited_referrer_before: bool,
) -> CandidateResolution {
    let state = request.state;
    let mut prompt = state.prompt_user_for_save_location;

    // 用户明确要求另存为时，不当作扩展安装
    let extension_install = !prompt && is_extension_install(request.url, request.mime_type);

    let suggested_path = match &state.force_file_name {
        Some(forced) => forced.clone(),
        None => {
            let generated = PathBuf::from(filename::generate_file_name(
                request.url,
                request.content_disposition,
                request.mime_type,
            ));
            if prefs.prompt_for_download
                && !extension_install
                && !prefs.should_auto_open(&generated)
            {
                prompt = true;
            }
            if prefs.download_dir_managed {
                prompt = false;
            }
            let dir = match last_download_path {
                Some(last) if prompt => last,
                _ => prefs.download_dir.as_path(),
            };
            dir.join(generated)
        }
    };

    let is_dangerous = if !prompt && state.force_file_name.is_none() {
        is_dangerous_file(
            request,
            &suggested_path,
            extension_install,
            prefs,
            visited_referrer_before,
        )
    } else {
        false
    };

    CandidateResolution {
        suggested_path,
        prompt_required: prompt,
        is_dangerous,
        is_extension_install: extension_install,
    }
}

fn is_dangerous_file(
    request: &ResolveRequest<'_>,
    path: &Path,
    extension_install: bool,
    prefs: &DownloadPrefs,
    visited_referrer_before: bool,
) -> bool {
    let gesture = request.state.has_user_gesture;
    match file_danger_level(path) {
        DangerLevel::Dangerous => return !(prefs.should_auto_open(path) && gesture),
        DangerLevel::AllowOnUserGesture if !gesture || !visited_referrer_before => return true,
        _ => {}
    }
    extension_install
        && !is_download_from_gallery(request.url, request.referrer, &prefs.trusted_gallery_origins)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs() -> DownloadPrefs {
        DownloadPrefs {
            download_dir: PathBuf::from("/downloads"),
            fallback_dir: PathBuf::from("/documents"),
            prompt_for_download: false,
            download_dir_managed: false,
            auto_open_extensions: HashSet::new(),
            trusted_gallery_origins: vec!["https://gallery.example.com".to_string()],
        }
    }

    fn request<'a>(url: &'a str, state: &'a DownloadStateInfo) -> ResolveRequest<'a> {
        ResolveRequest {
            url,
            referrer: "",
            mime_type: "",
            content_disposition: "",
            state,
        }
    }

    #[test]
    fn test_default_directory_and_generated_name() {
        let state = DownloadStateInfo::default();
        let res = resolve(
            &request("https://example.com/files/report.pdf", &state),
            &prefs(),
            None,
            false,
        );
        assert_eq!(res.suggested_path, PathBuf::from("/downloads/report.pdf"));
        assert!(!res.prompt_required);
        assert!(!res.is_dangerous);
    }

    #[test]
    fn test_forced_name_skips_everything() {
        let state = DownloadStateInfo {
            force_file_name: Some(PathBuf::from("/tmp/setup.exe")),
            ..Default::default()
        };
        let mut p = prefs();
        p.prompt_for_download = true;
        let res = resolve(&request("https://example.com/setup.exe", &state), &p, None, false);
        assert_eq!(res.suggested_path, PathBuf::from("/tmp/setup.exe"));
        assert!(!res.prompt_required);
        assert!(!res.is_dangerous);
    }

    #[test]
    fn test_prompt_uses_last_directory() {
        let state = DownloadStateInfo::default();
        let mut p = prefs();
        p.prompt_for_download = true;
        let res = resolve(
            &request("https://example.com/a.zip", &state),
            &p,
            Some(Path::new("/home/me/picked")),
            false,
        );
        assert!(res.prompt_required);
        assert_eq!(res.suggested_path, PathBuf::from("/home/me/picked/a.zip"));
        // 弹框时不判定危险
        assert!(!res.is_dangerous);
    }

    #[test]
    fn test_managed_directory_never_prompts() {
        let state = DownloadStateInfo::default();
        let mut p = prefs();
        p.prompt_for_download = true;
        p.download_dir_managed = true;
        let res = resolve(
            &request("https://example.com/a.zip", &state),
            &p,
            Some(Path::new("/elsewhere")),
            false,
        );
        assert!(!res.prompt_required);
        assert_eq!(res.suggested_path, PathBuf::from("/downloads/a.zip"));
    }

    #[test]
    fn test_auto_open_suppresses_prompt() {
        let state = DownloadStateInfo::default();
        let mut p = prefs();
        p.prompt_for_download = true;
        p.auto_open_extensions.insert("pdf".to_string());
        let res = resolve(&request("https://example.com/a.pdf", &state), &p, None, false);
        assert!(!res.prompt_required);
    }

    #[test]
    fn test_dangerous_tier() {
        let mut state = DownloadStateInfo::default();
        let res = resolve(&request("https://example.com/setup.exe", &state), &prefs(), None, true);
        assert!(res.is_dangerous);

        // 自动打开 + 用户手势 才放行
        let mut p = prefs();
        p.auto_open_extensions.insert("exe".to_string());
        assert!(resolve(&request("https://example.com/setup.exe", &state), &p, None, true).is_dangerous);
        state.has_user_gesture = true;
        assert!(!resolve(&request("https://example.com/setup.exe", &state), &p, None, false).is_dangerous);
    }

    #[test]
    fn test_user_gesture_tier() {
        let mut state = DownloadStateInfo::default();
        let url = "https://example.com/tool.jar";
        assert!(resolve(&request(url, &state), &prefs(), None, true).is_dangerous);
        state.has_user_gesture = true;
        assert!(resolve(&request(url, &state), &prefs(), None, false).is_dangerous);
        assert!(!resolve(&request(url, &state), &prefs(), None, true).is_dangerous);
    }

    #[test]
    fn test_extension_install_from_gallery() {
        let state = DownloadStateInfo {
            has_user_gesture: true,
            ..Default::default()
        };
        let mut req = request("https://gallery.example.com/addon.user.js", &state);
        req.referrer = "https://gallery.example.com/detail";
        let res = resolve(&req, &prefs(), None, true);
        assert!(res.is_extension_install);
        assert!(!res.is_dangerous);

        req.referrer = "https://other.example.net/";
        assert!(resolve(&req, &prefs(), None, true).is_dangerous);
    }

    #[test]
    fn test_save_as_is_not_extension_install() {
        let state = DownloadStateInfo {
            prompt_user_for_save_location: true,
            ..Default::default()
        };
        let res = resolve(
            &request("https://gallery.example.com/addon.crx", &state),
            &prefs(),
            None,
            false,
        );
        assert!(res.prompt_required);
        assert!(!res.is_extension_install);
    }

    #[test]
    fn test_apply_keeps_request_fields() {
        let state = DownloadStateInfo {
            has_user_gesture: true,
            ..Default::default()
        };
        let res = resolve(&request("https://example.com/setup.exe", &state), &prefs(), None, true);
        let applied = res.apply_to(&state);
        assert!(applied.has_user_gesture);
        assert!(applied.is_dangerous_file);
        assert_eq!(applied.suggested_path, PathBuf::from("/downloads/setup.exe"));
    }
}
