use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 网络层报告新下载时携带的请求信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadCreateInfo {
    /// 重定向链，最后一个为实际下载地址
    pub url_chain: Vec<String>,
    pub referrer: String,
    pub content_disposition: String,
    pub mime_type: String,
    pub total_bytes: Option<u64>,
    pub start_time: DateTime<Utc>,
    pub has_user_gesture: bool,
    /// 调用方明确要求“另存为”
    pub prompt_user_for_save_location: bool,
    /// 调用方指定的保存路径，原样使用
    pub force_file_name: Option<PathBuf>,
    pub is_temporary: bool,
}

impl DownloadCreateInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url_chain: vec![url.into()],
            referrer: String::new(),
            content_disposition: String::new(),
            mime_type: String::new(),
            total_bytes: None,
            start_time: Utc::now(),
            has_user_gesture: false,
            prompt_user_for_save_location: false,
            force_file_name: None,
            is_temporary: false,
        }
    }

    pub fn url(&self) -> &str {
        self.url_chain.last().map(String::as_str).unwrap_or("")
    }
}

/// 路径决策过程中的中间状态，在各个异步环节之间传递
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadStateInfo {
    pub suggested_path: PathBuf,
    /// 危险文件使用临时名保存时，记录其真实文件名
    pub target_name: Option<String>,
    pub force_file_name: Option<PathBuf>,
    pub has_user_gesture: bool,
    pub prompt_user_for_save_location: bool,
    pub path_uniquifier: u32,
    pub is_dangerous_file: bool,
    pub is_dangerous_url: bool,
    pub is_extension_install: bool,
}

impl DownloadStateInfo {
    pub fn from_create_info(info: &DownloadCreateInfo) -> Self {
        Self {
            force_file_name: info.force_file_name.clone(),
            has_user_gesture: info.has_user_gesture,
            prompt_user_for_save_location: info.prompt_user_for_save_location,
            ..Default::default()
        }
    }

    pub fn is_dangerous(&self) -> bool {
        self.is_dangerous_file || self.is_dangerous_url
    }

    /// 路径检查完成后，如果需要占位文件，返回占位文件所在路径
    pub fn reservation_path(&self) -> Option<PathBuf> {
        if self.prompt_user_for_save_location || self.force_file_name.is_some() {
            return None;
        }
        if self.is_dangerous() {
            Some(self.suggested_path.clone())
        } else {
            Some(in_progress_path(&self.suggested_path))
        }
    }
}

/// 下载进行中使用的中间文件名：`<name>.crdownload`
pub fn in_progress_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".crdownload");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_path() {
        let path = in_progress_path(Path::new("/tmp/report.pdf"));
        assert_eq!(path, PathBuf::from("/tmp/report.pdf.crdownload"));
    }

    #[test]
    fn test_reservation_path() {
        let mut state = DownloadStateInfo {
            suggested_path: PathBuf::from("/tmp/report.pdf"),
            ..Default::default()
        };
        assert_eq!(
            state.reservation_path(),
            Some(PathBuf::from("/tmp/report.pdf.crdownload"))
        );

        state.is_dangerous_file = true;
        assert_eq!(state.reservation_path(), Some(PathBuf::from("/tmp/report.pdf")));

        state.prompt_user_for_save_location = true;
        assert_eq!(state.reservation_path(), None);
    }

    #[test]
    fn test_state_from_create_info() {
        let mut info = DownloadCreateInfo::new("https://example.com/a.zip");
        info.has_user_gesture = true;
        info.force_file_name = Some(PathBuf::from("/tmp/b.zip"));
        let state = DownloadStateInfo::from_create_info(&info);
        assert!(state.has_user_gesture);
        assert_eq!(state.force_file_name, Some(PathBuf::from("/tmp/b.zip")));
        assert!(!state.is_dangerous());
    }
}
