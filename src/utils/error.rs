use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Reference file has no '{column}' column (found: {})", found.join(", "))]
    MissingColumnError { column: String, found: Vec<String> },

    #[error("Reference file produced no identifiers in column '{column}'")]
    EmptyReferenceSetError { column: String },

    #[error("Order source unavailable after {attempts} attempts: {message}")]
    SourceUnavailableError { attempts: u32, message: String },

    #[error("Order source request failed: {message}")]
    SourceRequestError { status: Option<u16>, message: String },

    #[error("Notification ledger '{location}' is corrupt: {message}")]
    LedgerCorruptError { location: String, message: String },

    #[error("Notification failed for order {order_id}: {message}")]
    NotificationError { order_id: String, message: String },
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    TransientSource,
    Data,
    Notification,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// 依嚴重程度決定行程結束碼
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl MonitorError {
    pub fn config(message: impl Into<String>) -> Self {
        MonitorError::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            MonitorError::ConfigError { .. }
            | MonitorError::ConfigValidationError { .. }
            | MonitorError::InvalidConfigValueError { .. }
            | MonitorError::MissingConfigError { .. } => ErrorCategory::Configuration,
            MonitorError::ApiError(_) | MonitorError::SourceUnavailableError { .. } => {
                ErrorCategory::TransientSource
            }
            MonitorError::CsvError(_)
            | MonitorError::SerializationError(_)
            | MonitorError::MissingColumnError { .. }
            | MonitorError::EmptyReferenceSetError { .. }
            | MonitorError::SourceRequestError { .. }
            | MonitorError::LedgerCorruptError { .. } => ErrorCategory::Data,
            MonitorError::NotificationError { .. } => ErrorCategory::Notification,
            MonitorError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MonitorError::EmptyReferenceSetError { .. } => ErrorSeverity::Low,
            MonitorError::ApiError(_)
            | MonitorError::SourceUnavailableError { .. }
            | MonitorError::NotificationError { .. } => ErrorSeverity::Medium,
            MonitorError::LedgerCorruptError { .. } | MonitorError::IoError(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// 可由呼叫端在下一次排程時自動恢復的錯誤
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::TransientSource)
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            MonitorError::ApiError(_) => "Check network connectivity and the reference file URL",
            MonitorError::CsvError(_) => "Make sure the reference file is valid UTF-8 CSV",
            MonitorError::IoError(_) => "Check file permissions and available disk space",
            MonitorError::SerializationError(_) => "Inspect the payload that failed to (de)serialize",
            MonitorError::ConfigError { .. }
            | MonitorError::ConfigValidationError { .. }
            | MonitorError::InvalidConfigValueError { .. } => {
                "Fix the configuration file and run `order-monitor status` to verify"
            }
            MonitorError::MissingConfigError { .. } => {
                "Set the missing value in the configuration file or the environment"
            }
            MonitorError::MissingColumnError { .. } => {
                "Check `references.column` against the header row of the reference file"
            }
            MonitorError::EmptyReferenceSetError { .. } => {
                "The reference file has no identifiers; verify the uploaded file"
            }
            MonitorError::SourceUnavailableError { .. } => {
                "The order API is unreachable; the next scheduled run will try again"
            }
            MonitorError::SourceRequestError { .. } => {
                "Verify the API key, base URL and document type of the order source"
            }
            MonitorError::LedgerCorruptError { .. } => {
                "Restore the ledger file from backup or repair it by hand; do not delete it"
            }
            MonitorError::NotificationError { .. } => {
                "Check SMTP settings with `order-monitor test`"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::TransientSource => format!("Temporary source failure: {}", self),
            ErrorCategory::Data => format!("Data problem: {}", self),
            ErrorCategory::Notification => format!("Notification problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}
