use std::path::Path;
use url::Url;

/// 文件类型的危险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DangerLevel {
    NotDangerous,
    /// 需要用户手势并且访问过引用页才放行
    AllowOnUserGesture,
    Dangerous,
}

const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "msi", "com", "scr", "pif", "bat", "cmd", "vbs", "vbe", "wsf", "wsh", "cpl", "reg",
    "lnk", "hta", "dll", "sys", "ps1", "psm1", "application",
];

const USER_GESTURE_EXTENSIONS: &[&str] = &[
    "jar", "jnlp", "sh", "bash", "command", "apk", "dmg", "pkg", "deb", "rpm", "app", "crx",
];

const EXTENSION_MIME_TYPE: &str = "application/x-chrome-extension";

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// 根据文件扩展名判断危险等级
pub fn file_danger_level(path: &Path) -> DangerLevel {
    let Some(ext) = extension_of(path) else {
        return DangerLevel::NotDangerous;
    };
    if DANGEROUS_EXTENSIONS.contains(&ext.as_str()) {
        DangerLevel::Dangerous
    } else if USER_GESTURE_EXTENSIONS.contains(&ext.as_str()) {
        DangerLevel::AllowOnUserGesture
    } else {
        DangerLevel::NotDangerous
    }
}

pub fn is_extension_file(path: &Path) -> bool {
    extension_of(path).as_deref() == Some("crx")
}

/// `*.user.js` 用户脚本（HTML 页面除外）
pub fn is_user_script_url(url: &str, mime_type: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if mime_type.eq_ignore_ascii_case("text/html") {
        return false;
    }
    parsed.path().to_ascii_lowercase().ends_with(".user.js")
}

/// 是否为扩展安装：用户脚本、扩展 MIME 类型或 `.crx` 文件
pub fn is_extension_install(url: &str, mime_type: &str) -> bool {
    if is_user_script_url(url, mime_type) || mime_type.eq_ignore_ascii_case(EXTENSION_MIME_TYPE) {
        return true;
    }
    Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase().ends_with(".crx"))
        .unwrap_or(false)
}

fn origin_trusted(url: &str, trusted_origins: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return false;
    }
    trusted_origins.iter().any(|trusted| {
        Url::parse(trusted)
            .map(|t| t.origin() == origin)
            .unwrap_or(false)
    })
}

/// 下载地址与引用页都来自可信的扩展库时才算库内下载
pub fn is_download_from_gallery(url: &str, referrer: &str, trusted_origins: &[String]) -> bool {
    origin_trusted(url, trusted_origins) && origin_trusted(referrer, trusted_origins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_danger_levels() {
        assert_eq!(file_danger_level(Path::new("setup.EXE")), DangerLevel::Dangerous);
        assert_eq!(
            file_danger_level(Path::new("tool.jar")),
            DangerLevel::AllowOnUserGesture
        );
        assert_eq!(file_danger_level(Path::new("report.pdf")), DangerLevel::NotDangerous);
        assert_eq!(file_danger_level(Path::new("README")), DangerLevel::NotDangerous);
    }

    #[test]
    fn test_extension_install_detection() {
        assert!(is_extension_install("https://example.com/x/addon.crx", ""));
        assert!(is_extension_install("https://example.com/script.user.js", "text/javascript"));
        assert!(!is_extension_install("https://example.com/script.user.js", "text/html"));
        assert!(is_extension_install("https://example.com/get?id=1", EXTENSION_MIME_TYPE));
        assert!(!is_extension_install("https://example.com/a.zip", "application/zip"));
    }

    #[test]
    fn test_gallery_requires_both_origins() {
        let trusted = vec!["https://gallery.example.com".to_string()];
        assert!(is_download_from_gallery(
            "https://gallery.example.com/a.crx",
            "https://gallery.example.com/detail/a",
            &trusted
        ));
        assert!(!is_download_from_gallery(
            "https://gallery.example.com/a.crx",
            "https://evil.example.net/",
            &trusted
        ));
        assert!(!is_download_from_gallery("https://gallery.example.com/a.crx", "", &trusted));
    }
}
