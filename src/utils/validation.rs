use crate::domain::model::{FileConfig, Route, StoreConfig, TransferRequest};
use crate::utils::error::{EtlError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(EtlError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| EtlError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
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
        return Err(EtlError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 檔案位置可以是本機路徑或 http(s) URL
pub fn validate_location(field_name: &str, location: &str) -> Result<()> {
    let lower = location.trim().to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        validate_url(field_name, location.trim())
    } else {
        validate_path(field_name, location.trim())
    }
}

impl Validate for StoreConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("store.host", &self.host)?;
        if self.host.contains("://") || self.host.contains('/') {
            return Err(EtlError::InvalidConfigValueError {
                field: "store.host".to_string(),
                value: self.host.clone(),
                reason: "Host must not include a scheme or path".to_string(),
            });
        }
        if let Some(port) = self.port {
            validate_range("store.port", port, 1, u16::MAX)?;
        }
        validate_non_empty_string("store.database", &self.database)?;
        validate_non_empty_string("store.user", &self.user)?;
        Ok(())
    }
}

impl Validate for FileConfig {
    fn validate(&self) -> Result<()> {
        // 空的 location 表示呼叫端直接提供資料內容
        if !self.location.trim().is_empty() {
            validate_location("file.location", &self.location)?;
        }

        crate::adapters::flat_file::delimiter_byte(self.delimiter).map_err(|_| {
            EtlError::InvalidConfigValueError {
                field: "file.delimiter".to_string(),
                value: self.delimiter.to_string(),
                reason: "Delimiter must be a single ASCII character other than a quote or line break"
                    .to_string(),
            }
        })?;

        crate::adapters::flat_file::encoding_for(&self.encoding).map_err(|_| {
            EtlError::InvalidConfigValueError {
                field: "file.encoding".to_string(),
                value: self.encoding.clone(),
                reason: "Unknown character encoding".to_string(),
            }
        })?;
        Ok(())
    }
}

impl Validate for TransferRequest {
    fn validate(&self) -> Result<()> {
        let route = self.route().ok_or_else(|| EtlError::UnsupportedRoute {
            from: self.source_kind.to_string(),
            to: self.target_kind.to_string(),
        })?;

        validate_required_field("store_config", &self.store_config)?.validate()?;
        validate_required_field("file_config", &self.file_config)?.validate()?;

        match route {
            Route::StoreToFile => validate_non_empty_string("main_table", &self.main_table)?,
            Route::FileToStore => validate_non_empty_string("target_table", &self.target_table)?,
        }
        Ok(())
    }
}
