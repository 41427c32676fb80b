use anyhow::Result;
use url::Url;

/// 只接受带主机名的 http / https / ftp 地址
pub fn is_valid_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https" | "ftp") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

pub fn validate_urls(urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        anyhow::bail!("URL列表不能为空");
    }
    if let Some(bad) = urls.iter().find(|u| !is_valid_url(u)) {
        anyhow::bail!("无效的URL: {}", bad);
    }
    Ok(())
}

pub fn validate_log_level(level: &str) -> Result<()> {
    match level.to_ascii_lowercase().as_str() {
        "off" | "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
        _ => anyhow::bail!("无效的日志级别: {}", level),
    }
}

/// 扩展名只能由字母和数字组成，可以带前导点
pub fn validate_extensions(extensions: &[String]) -> Result<()> {
    for ext in extensions {
        let bare = ext.trim_start_matches('.');
        if bare.is_empty() || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
            anyhow::bail!("无效的扩展名: {:?}", ext);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(is_valid_url("https://example.com"));
        assert!(is_valid_url("http://example.com/a.zip?x=1"));
        assert!(is_valid_url("ftp://mirror.example.com/pub/a.iso"));
        assert!(!is_valid_url("invalid-url"));
        assert!(!is_valid_url("file:///etc/passwd"));
        assert!(!is_valid_url("https://"));
    }

    #[test]
    fn test_urls_validation() {
        let valid_urls = vec![
            "https://example.com".to_string(),
            "http://example.com".to_string(),
        ];
        assert!(validate_urls(&valid_urls).is_ok());

        let invalid_urls = vec![
            "invalid-url".to_string(),
            "https://example.com".to_string(),
        ];
        assert!(validate_urls(&invalid_urls).is_err());
        assert!(validate_urls(&[]).is_err());
    }

    #[test]
    fn test_log_level_validation() {
        assert!(validate_log_level("INFO").is_ok());
        assert!(validate_log_level("trace").is_ok());
        assert!(validate_log_level("loud").is_err());
    }

    #[test]
    fn test_extension_validation() {
        assert!(validate_extensions(&["pdf".to_string(), ".txt".to_string()]).is_ok());
        assert!(validate_extensions(&[".".to_string()]).is_err());
        assert!(validate_extensions(&["tar.gz".to_string()]).is_err());
    }
}
