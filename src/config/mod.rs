#[cfg(feature = "cli")]
pub mod cli;

use crate::adapters::notifier::SmtpSettings;
use crate::adapters::order_api::{OrderApiConfig, RetryPolicy};
use crate::core::gate::OperatingHours;
use crate::core::references::{ReferenceOptions, DEFAULT_REFERENCE_COLUMN};
use crate::core::workflow::WorkflowConfig;
use crate::utils::error::{MonitorError, Result};
use crate::utils::validation::{
    validate_email, validate_file_extension, validate_hour_window, validate_non_empty_string,
    validate_path, validate_positive_number, validate_range, validate_secret, validate_timezone,
    validate_url, Validate,
};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "order-monitor.toml";

const REDACTED: &str = "[REDACTED]";

/// 回溯時間窗與排程間隔的上限
pub const MAX_LOOKBACK_HOURS: u64 = 24 * 366;
pub const MAX_INTERVAL_MINUTES: u64 = 24 * 60;

#[derive(Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub source: SourceConfig,
    pub references: ReferencesConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub mode: ModeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_key: String,
    pub auth_header: Option<String>,
    pub doc_type: Option<String>,
    pub page_size: Option<usize>,
    pub max_pages: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub max_retry_delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencesConfig {
    /// 本機 CSV 檔
    pub path: Option<String>,
    /// 或以 HTTPS 下載
    pub url: Option<String>,
    pub bearer_token: Option<String>,
    pub column: Option<String>,
    pub case_insensitive: Option<bool>,
    pub strip_leading_zeros: Option<bool>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub timezone: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub lookback_hours: u64,
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Madrid".to_string(),
            start_hour: 7,
            end_hour: 23,
            lookback_hours: 24,
            interval_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: "./state/processed_orders.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub subject_prefix: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// 開啟 debug 日誌
    pub test_mode: bool,
    /// 不寄信、不寫入真正的帳本，其餘流程照常執行
    pub test_email_only: bool,
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = self.redacted();
        f.debug_struct("MonitorConfig")
            .field("source", &redacted.source)
            .field("references", &redacted.references)
            .field("schedule", &redacted.schedule)
            .field("ledger", &redacted.ledger)
            .field("notification", &redacted.notification)
            .field("mode", &redacted.mode)
            .finish()
    }
}

impl MonitorConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(MonitorError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| MonitorError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${HOLDED_API_KEY})；未設定的變數保持原樣，由驗證回報
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| MonitorError::config(format!("invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 秘密欄位以 [REDACTED] 取代，給 status 與日誌使用
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.source.api_key = REDACTED.to_string();
        if copy.references.bearer_token.is_some() {
            copy.references.bearer_token = Some(REDACTED.to_string());
        }
        if copy.notification.smtp_password.is_some() {
            copy.notification.smtp_password = Some(REDACTED.to_string());
        }
        if let Some(url) = &copy.references.url {
            copy.references.url = Some(strip_query(url));
        }
        copy
    }

    pub fn timezone(&self) -> Result<Tz> {
        validate_timezone("schedule.timezone", &self.schedule.timezone)
    }

    pub fn operating_hours(&self) -> Result<OperatingHours> {
        OperatingHours::new(
            self.timezone()?,
            self.schedule.start_hour,
            self.schedule.end_hour,
        )
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.schedule.lookback_hours.min(MAX_LOOKBACK_HOURS) as i64)
    }

    pub fn reference_options(&self) -> ReferenceOptions {
        ReferenceOptions {
            column: self
                .references
                .column
                .clone()
                .unwrap_or_else(|| DEFAULT_REFERENCE_COLUMN.to_string()),
            case_insensitive: self.references.case_insensitive.unwrap_or(false),
            strip_leading_zeros: self.references.strip_leading_zeros.unwrap_or(false),
        }
    }

    pub fn reference_timeout(&self) -> Duration {
        Duration::from_secs(self.references.timeout_seconds.unwrap_or(30))
    }

    pub fn workflow_config(&self) -> Result<WorkflowConfig> {
        Ok(WorkflowConfig {
            operating_hours: self.operating_hours()?,
            lookback: self.lookback(),
            ledger_location: self.ledger.path.clone(),
            reference_options: self.reference_options(),
        })
    }

    pub fn order_api_config(&self) -> OrderApiConfig {
        let source = &self.source;
        OrderApiConfig {
            base_url: source.base_url.clone(),
            api_key: source.api_key.clone(),
            auth_header: source.auth_header.clone().unwrap_or_else(|| "key".to_string()),
            doc_type: source
                .doc_type
                .clone()
                .unwrap_or_else(|| "salesorder".to_string()),
            page_size: source.page_size,
            max_pages: source.max_pages.unwrap_or(100),
            timeout: Duration::from_secs(source.timeout_seconds.unwrap_or(30)),
            retry: RetryPolicy {
                max_attempts: source.retry_attempts.unwrap_or(3),
                base_delay: Duration::from_secs(source.retry_delay_seconds.unwrap_or(1)),
                max_delay: Duration::from_secs(source.max_retry_delay_seconds.unwrap_or(30)),
            },
        }
    }

    pub fn subject_prefix(&self) -> String {
        self.notification
            .subject_prefix
            .clone()
            .unwrap_or_else(|| "[Order Monitor]".to_string())
    }

    /// 只在實際寄信時需要；缺少的欄位回報 MissingConfigError
    pub fn smtp_settings(&self) -> Result<SmtpSettings> {
        let n = &self.notification;
        let host = required("notification.smtp_host", &n.smtp_host)?;
        let username = required("notification.smtp_username", &n.smtp_username)?;
        let password = required("notification.smtp_password", &n.smtp_password)?;

        Ok(SmtpSettings {
            host,
            port: n.smtp_port.unwrap_or(587),
            from: n.from.clone().unwrap_or_else(|| username.clone()),
            username,
            password,
            recipients: n.recipients.clone(),
            subject_prefix: self.subject_prefix(),
            timeout: Duration::from_secs(n.timeout_seconds.unwrap_or(30)),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode.test_email_only
    }

    fn validate_source(&self) -> Result<()> {
        let source = &self.source;
        validate_url("source.base_url", &source.base_url)?;
        validate_secret("source.api_key", &source.api_key)?;
        if let Some(header) = &source.auth_header {
            validate_non_empty_string("source.auth_header", header)?;
        }
        if let Some(doc_type) = &source.doc_type {
            validate_non_empty_string("source.doc_type", doc_type)?;
        }
        if let Some(page_size) = source.page_size {
            validate_positive_number("source.page_size", page_size as u64, 1)?;
        }
        if let Some(max_pages) = source.max_pages {
            validate_positive_number("source.max_pages", max_pages as u64, 1)?;
        }
        if let Some(timeout) = source.timeout_seconds {
            validate_positive_number("source.timeout_seconds", timeout, 1)?;
        }
        if let Some(attempts) = source.retry_attempts {
            validate_range("source.retry_attempts", attempts, 1, 10)?;
        }
        Ok(())
    }

    fn validate_references(&self) -> Result<()> {
        let references = &self.references;
        match (&references.path, &references.url) {
            (Some(path), None) => {
                validate_path("references.path", path)?;
                validate_file_extension("references.path", path, &["csv", "txt"])?;
            }
            (None, Some(url)) => {
                validate_url("references.url", url)?;
                if let Some(token) = &references.bearer_token {
                    validate_secret("references.bearer_token", token)?;
                }
            }
            (Some(_), Some(_)) => {
                return Err(MonitorError::ConfigValidationError {
                    field: "references".to_string(),
                    message: "set either 'path' or 'url', not both".to_string(),
                })
            }
            (None, None) => {
                return Err(MonitorError::MissingConfigError {
                    field: "references.path or references.url".to_string(),
                })
            }
        }

        if let Some(column) = &references.column {
            validate_non_empty_string("references.column", column)?;
        }
        Ok(())
    }

    fn validate_schedule(&self) -> Result<()> {
        let schedule = &self.schedule;
        validate_timezone("schedule.timezone", &schedule.timezone)?;
        validate_hour_window(
            "schedule.start_hour",
            schedule.start_hour,
            "schedule.end_hour",
            schedule.end_hour,
        )?;
        validate_range(
            "schedule.lookback_hours",
            schedule.lookback_hours,
            1,
            MAX_LOOKBACK_HOURS,
        )?;
        validate_range(
            "schedule.interval_minutes",
            schedule.interval_minutes,
            1,
            MAX_INTERVAL_MINUTES,
        )?;
        Ok(())
    }

    fn validate_notification(&self) -> Result<()> {
        let n = &self.notification;
        for recipient in &n.recipients {
            validate_email("notification.recipients", recipient)?;
        }

        // 測試模式不寄信，SMTP 設定可以省略
        if self.mode.test_email_only {
            return Ok(());
        }

        let host = required("notification.smtp_host", &n.smtp_host)?;
        validate_non_empty_string("notification.smtp_host", &host)?;
        if let Some(port) = n.smtp_port {
            validate_range("notification.smtp_port", port, 1, u16::MAX)?;
        }
        let username = required("notification.smtp_username", &n.smtp_username)?;
        validate_non_empty_string("notification.smtp_username", &username)?;
        let password = required("notification.smtp_password", &n.smtp_password)?;
        validate_secret("notification.smtp_password", &password)?;
        if let Some(from) = &n.from {
            validate_email("notification.from", from)?;
        }
        if n.recipients.is_empty() {
            return Err(MonitorError::MissingConfigError {
                field: "notification.recipients".to_string(),
            });
        }
        Ok(())
    }
}

impl Validate for MonitorConfig {
    fn validate(&self) -> Result<()> {
        self.validate_source()?;
        self.validate_references()?;
        self.validate_schedule()?;
        validate_path("ledger.path", &self.ledger.path)?;
        validate_file_extension("ledger.path", &self.ledger.path, &["json"])?;
        self.validate_notification()?;
        Ok(())
    }
}

fn required(field: &str, value: &Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(MonitorError::MissingConfigError {
            field: field.to_string(),
        }),
    }
}

fn strip_query(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}
