use crate::utils::error::{MonitorError, Result};
use chrono_tz::Tz;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(MonitorError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_file_extension(field_name: &str, file: &str, allowed_extensions: &[&str]) -> Result<()> {
    let extension = std::path::Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) if allowed_extensions.contains(&ext.as_str()) => Ok(()),
        Some(ext) => Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: file.to_string(),
            reason: format!(
                "Unsupported file extension: {}. Allowed extensions: {}",
                ext,
                allowed_extensions.join(", ")
            ),
        }),
        None => Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: file.to_string(),
            reason: "File has no extension or invalid filename".to_string(),
        }),
    }
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

/// 未替換的 `${VAR}` 代表環境變數沒有設定
pub fn validate_secret(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() || (value.starts_with("${") && value.ends_with('}')) {
        return Err(MonitorError::MissingConfigError {
            field: field_name.to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 營業時段：start 0..=23，end 1..=24，且 start < end
pub fn validate_hour_window(start_field: &str, start: u32, end_field: &str, end: u32) -> Result<()> {
    validate_range(start_field, start, 0, 23)?;
    validate_range(end_field, end, 1, 24)?;

    if start >= end {
        return Err(MonitorError::ConfigValidationError {
            field: format!("{}/{}", start_field, end_field),
            message: format!("start hour {} must be less than end hour {}", start, end),
        });
    }
    Ok(())
}

pub fn validate_timezone(field_name: &str, value: &str) -> Result<Tz> {
    value
        .parse::<Tz>()
        .map_err(|e| MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Unknown IANA time zone: {}", e),
        })
}

pub fn validate_email(field_name: &str, value: &str) -> Result<()> {
    let trimmed = value.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    };

    if !valid {
        return Err(MonitorError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Not a valid e-mail address".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("source.base_url", "https://example.com").is_ok());
        assert!(validate_url("source.base_url", "http://example.com").is_ok());
        assert!(validate_url("source.base_url", "").is_err());
        assert!(validate_url("source.base_url", "invalid-url").is_err());
        assert!(validate_url("source.base_url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_hour_window() {
        assert!(validate_hour_window("start", 7, "end", 23).is_ok());
        assert!(validate_hour_window("start", 0, "end", 24).is_ok());
        assert!(validate_hour_window("start", 23, "end", 7).is_err());
        assert!(validate_hour_window("start", 9, "end", 9).is_err());
        assert!(validate_hour_window("start", 24, "end", 24).is_err());
    }

    #[test]
    fn test_validate_timezone() {
        assert!(validate_timezone("schedule.timezone", "Europe/Madrid").is_ok());
        assert!(validate_timezone("schedule.timezone", "Mars/Olympus").is_err());
    }

    #[test]
    fn test_validate_secret_rejects_unsubstituted_placeholder() {
        assert!(validate_secret("source.api_key", "abc123").is_ok());
        assert!(validate_secret("source.api_key", "${ORDER_API_KEY}").is_err());
        assert!(validate_secret("source.api_key", "  ").is_err());
    }

    #[test]
    fn test_validate_file_extension() {
        assert!(validate_file_extension("references.path", "refs.csv", &["csv", "txt"]).is_ok());
        assert!(validate_file_extension("references.path", "REFS.CSV", &["csv", "txt"]).is_ok());
        assert!(validate_file_extension("references.path", "refs.xlsx", &["csv", "txt"]).is_err());
        assert!(validate_file_extension("references.path", "refs", &["csv", "txt"]).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("notification.to", "ops@example.com").is_ok());
        assert!(validate_email("notification.to", "ops@localhost").is_err());
        assert!(validate_email("notification.to", "@example.com").is_err());
    }
}
