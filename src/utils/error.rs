use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Ingestion from {from} to {to} is not supported")]
    UnsupportedRoute { from: String, to: String },

    #[error("ClickHouse connection failed: {message}")]
    ConnectionError { message: String },

    #[error("{}", remote_fetch_message(.status, .message))]
    RemoteFetchFailed {
        status: Option<u16>,
        message: String,
    },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("ClickHouse query failed (code {code:?}): {message}")]
    QueryFailed { code: Option<u32>, message: String },

    #[error("HTTP request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Encoding error: {message}")]
    EncodingError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

fn remote_fetch_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Remote fetch failed: HTTP error code: {} ({})", code, message),
        None => format!("Remote fetch failed: {}", message),
    }
}

/// 錯誤分類：讓呼叫端判斷是否值得重試
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 設定或請求本身有誤，重試不會改變結果
    Validation,
    /// 網路或服務暫時性問題
    Transient,
    /// 檔案內容、編碼或 SQL 執行問題
    Data,
    /// 本機 I/O
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// CLI 的結束碼
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl EtlError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        EtlError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EtlError::NotFound { what: what.into() }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        EtlError::ConnectionError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::InvalidInput { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::UnsupportedRoute { .. }
            | EtlError::NotFound { .. } => ErrorCategory::Validation,
            EtlError::ConnectionError { .. }
            | EtlError::RemoteFetchFailed { .. }
            | EtlError::ApiError(_) => ErrorCategory::Transient,
            EtlError::QueryFailed { .. }
            | EtlError::CsvError(_)
            | EtlError::SerializationError(_)
            | EtlError::EncodingError { .. }
            | EtlError::ProcessingError { .. } => ErrorCategory::Data,
            EtlError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Validation => ErrorSeverity::High,
            ErrorCategory::Transient => ErrorSeverity::Medium,
            ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 只有暫時性錯誤才建議重試；核心本身從不自動重試
    pub fn is_retryable(&self) -> bool {
        match self {
            // 4xx 代表來源本身有問題
            EtlError::RemoteFetchFailed {
                status: Some(code), ..
            } => *code >= 500 || *code == 408 || *code == 429,
            _ => self.category() == ErrorCategory::Transient,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::InvalidInput { message } => format!("請求內容不正確: {}", message),
            EtlError::ConfigValidationError { field, message } => {
                format!("設定錯誤 ({}): {}", field, message)
            }
            EtlError::InvalidConfigValueError { field, reason, .. } => {
                format!("設定值不正確 ({}): {}", field, reason)
            }
            EtlError::MissingConfigError { field } => format!("缺少必要設定: {}", field),
            EtlError::UnsupportedRoute { from, to } => {
                format!("不支援從 {} 匯入到 {}", from, to)
            }
            EtlError::ConnectionError { message } => format!("無法連線到 ClickHouse: {}", message),
            EtlError::RemoteFetchFailed { status, .. } => match status {
                Some(code) => format!("下載遠端檔案失敗 (HTTP {})", code),
                None => "下載遠端檔案失敗".to_string(),
            },
            EtlError::NotFound { what } => format!("找不到: {}", what),
            _ => self.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Validation => "Check the request parameters and configuration",
            ErrorCategory::Transient => "Check network connectivity and credentials, then retry",
            ErrorCategory::Data => "Check the file format, delimiter, encoding and column selection",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = EtlError::UnsupportedRoute {
            from: "flatfile".to_string(),
            to: "flatfile".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(!err.is_retryable());
        assert!(!EtlError::invalid_input("no columns").is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(EtlError::connection("refused").is_retryable());
        let timeout = EtlError::RemoteFetchFailed {
            status: None,
            message: "timed out".to_string(),
        };
        assert!(timeout.is_retryable());
    }

    #[test]
    fn test_remote_fetch_client_error_is_not_retryable() {
        let err = EtlError::RemoteFetchFailed {
            status: Some(404),
            message: "Not Found".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn test_every_failure_exits_non_zero() {
        let errors = [
            EtlError::invalid_input("bad"),
            EtlError::connection("refused"),
            EtlError::QueryFailed {
                code: Some(27),
                message: "parse".to_string(),
            },
            EtlError::IoError(std::io::Error::other("disk")),
        ];
        let codes: Vec<i32> = errors.iter().map(|e| e.severity().exit_code()).collect();
        assert_eq!(codes, vec![1, 2, 1, 3]);
    }
}
