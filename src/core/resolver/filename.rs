use regex::Regex;
use std::sync::OnceLock;
use url::Url;

const DEFAULT_FILE_NAME: &str = "download";

fn disposition_ext_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)filename\*\s*=\s*([A-Za-z0-9_-]*)'[^']*'([^;\s]+)"#)
            .expect("filename* regex")
    })
}

fn disposition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*(?:"([^"]*)"|([^;]+))"#).expect("filename regex")
    })
}

/// 从 Content-Disposition 中取文件名，优先使用 RFC 5987 的 `filename*`
pub fn filename_from_disposition(disposition: &str) -> Option<String> {
    if let Some(caps) = disposition_ext_regex().captures(disposition) {
        if let Some(value) = caps.get(2) {
            if let Ok(decoded) = urlencoding::decode(value.as_str()) {
                let decoded = decoded.trim().to_string();
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        }
    }
    let caps = disposition_regex().captures(disposition)?;
    let value = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// 从 URL 中取文件名：最后一个路径段，否则主机名
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let from_path = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .and_then(|segment| urlencoding::decode(segment).ok())
        .map(|s| s.into_owned())
        .filter(|s| !s.trim().is_empty());
    from_path.or_else(|| parsed.host_str().map(str::to_string))
}

/// 按 MIME 类型推断扩展名
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let ext = match essence.as_str() {
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/json" => "json",
        "application/gzip" | "application/x-gzip" => "gz",
        "application/x-tar" => "tar",
        "application/xml" | "text/xml" => "xml",
        "application/x-chrome-extension" => "crx",
        "application/javascript" | "text/javascript" => "js",
        "text/html" => "html",
        "text/plain" => "txt",
        "text/css" => "css",
        "text/csv" => "csv",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        _ => return None,
    };
    Some(ext)
}

/// 替换掉文件系统不接受的字符
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.').trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        DEFAULT_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// 根据请求信息生成文件名
pub fn generate_file_name(url: &str, content_disposition: &str, mime_type: &str) -> String {
    let raw = filename_from_disposition(content_disposition)
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
    let mut name = sanitize_file_name(&raw);
    if std::path::Path::new(&name).extension().is_none() {
        if let Some(ext) = extension_for_mime(mime_type) {
            name = format!("{}.{}", name, ext);
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_plain_and_quoted() {
        assert_eq!(
            filename_from_disposition("attachment; filename=report.pdf"),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="quarterly report.pdf""#),
            Some("quarterly report.pdf".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_disposition_prefers_extended_value() {
        let header = r#"attachment; filename="fallback.txt"; filename*=UTF-8''%E6%8A%A5%E5%91%8A.pdf"#;
        assert_eq!(filename_from_disposition(header), Some("报告.pdf".to_string()));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/files/my%20file.zip?x=1"),
            Some("my file.zip".to_string())
        );
        assert_eq!(
            filename_from_url("https://example.com/"),
            Some("example.com".to_string())
        );
        assert_eq!(filename_from_url("not a url"), None);
    }

    #[test]
    fn test_generate_adds_mime_extension() {
        assert_eq!(
            generate_file_name("https://example.com/export", "", "application/pdf"),
            "export.pdf"
        );
        assert_eq!(
            generate_file_name("https://example.com/a.zip", "", "application/pdf"),
            "a.zip"
        );
        assert_eq!(generate_file_name("", "", ""), "download");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_file_name("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_name("a:b?.txt"), "a_b_.txt");
        assert_eq!(sanitize_file_name("..."), "download");
    }
}
