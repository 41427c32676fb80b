use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("IO错误: {0}")]
    IoError(#[from] io::Error),

    #[error("历史记录错误: {0}")]
    JournalError(String),

    #[error("序列化错误: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("服务器错误: {0}")]
    ServerError(String),

    #[error("找不到可用的文件名: {}", .0.display())]
    PathExhausted(PathBuf),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("消息投递失败: {0}")]
    MailboxError(#[from] actix::MailboxError),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// 映射为中断下载时记录的网络错误码
    pub fn net_error_code(&self) -> i32 {
        match self {
            DownloadError::IoError(e) => match e.kind() {
                io::ErrorKind::PermissionDenied => net_error::FILE_ACCESS_DENIED,
                _ => net_error::FILE_FAILED,
            },
            DownloadError::PathExhausted(_) => net_error::FILE_FAILED,
            DownloadError::NetworkError(_) | DownloadError::ServerError(_) => net_error::FAILED,
            _ => net_error::FAILED,
        }
    }
}

impl From<String> for DownloadError {
    fn from(error: String) -> Self {
        DownloadError::Unknown(error)
    }
}

impl From<&str> for DownloadError {
    fn from(error: &str) -> Self {
        DownloadError::Unknown(error.to_string())
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// 网络层上报的错误码（与浏览器网络栈的取值保持一致）
pub mod net_error {
    pub const OK: i32 = 0;
    pub const FAILED: i32 = -2;
    pub const FILE_FAILED: i32 = -8;
    pub const FILE_ACCESS_DENIED: i32 = -10;
    pub const CONNECTION_CLOSED: i32 = -100;

    /// 部分服务器声明的 Content-Length 大于实际内容，随后直接关闭连接，
    /// 这种情况按下载成功处理
    pub fn is_benign_completion(code: i32) -> bool {
        code == OK || code == CONNECTION_CLOSED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let denied = DownloadError::IoError(io::Error::new(io::ErrorKind::PermissionDenied, "ro"));
        assert_eq!(denied.net_error_code(), net_error::FILE_ACCESS_DENIED);

        let server = DownloadError::ServerError("503".to_string());
        assert_eq!(server.net_error_code(), net_error::FAILED);
    }

    #[test]
    fn test_benign_completion() {
        assert!(net_error::is_benign_completion(net_error::OK));
        assert!(net_error::is_benign_completion(net_error::CONNECTION_CLOSED));
        assert!(!net_error::is_benign_completion(net_error::FAILED));
    }

    #[test]
    fn test_error_conversion() {
        let error: DownloadError = "测试错误".into();
        assert!(matches!(error, DownloadError::Unknown(_)));

        let error: DownloadError = "测试错误".to_string().into();
        assert!(matches!(error, DownloadError::Unknown(_)));
    }
}
