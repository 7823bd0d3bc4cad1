use crate::domain::model::{ColumnMetadata, EndpointKind, FileConfig, Route, StoreConfig, TransferRequest};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_path, validate_positive_number, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// 傳輸工作描述檔 (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job: JobInfo,
    pub store: StoreConfig,
    pub file: FileConfig,
    pub transfer: TransferSection,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    pub source: EndpointKind,
    pub target: EndpointKind,
    #[serde(default)]
    pub main_table: String,
    #[serde(default)]
    pub additional_tables: Vec<String>,
    #[serde(default)]
    pub join_condition: String,
    #[serde(default)]
    pub target_table: String,
    /// 要傳輸的欄位；空白代表全部
    #[serde(default)]
    pub columns: Vec<String>,
    pub batch_size: Option<usize>,
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub progress_interval: Option<u64>,
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var regex"))
}

impl JobConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CLICKHOUSE_TOKEN})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        env_var_pattern()
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn route(&self) -> Option<Route> {
        self.request_skeleton().route()
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.transfer.batch_size
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        self.transfer.output_dir.as_ref().map(PathBuf::from)
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn progress_interval(&self) -> Option<u64> {
        self.monitoring.as_ref().and_then(|m| m.progress_interval)
    }

    /// 依 `columns` 標記可用欄位的選取狀態
    ///
    /// `columns` 為空時全部選取；列出不存在的欄位視為錯誤。
    pub fn select_columns(&self, available: Vec<ColumnMetadata>) -> Result<Vec<ColumnMetadata>> {
        let wanted = &self.transfer.columns;
        if wanted.is_empty() {
            return Ok(available
                .into_iter()
                .map(|c| ColumnMetadata { selected: true, ..c })
                .collect());
        }

        if let Some(unknown) = wanted
            .iter()
            .find(|name| !available.iter().any(|c| &c.name == *name))
        {
            return Err(EtlError::invalid_input(format!(
                "Column '{}' is not present in the source",
                unknown
            )));
        }

        Ok(available
            .into_iter()
            .map(|c| {
                let selected = wanted.contains(&c.name);
                ColumnMetadata { selected, ..c }
            })
            .collect())
    }

    /// 組出傳輸請求
    pub fn to_request(&self, columns: Vec<ColumnMetadata>) -> TransferRequest {
        TransferRequest {
            selected_columns: columns,
            ..self.request_skeleton()
        }
    }

    fn request_skeleton(&self) -> TransferRequest {
        TransferRequest {
            source_kind: self.transfer.source,
            target_kind: self.transfer.target,
            store_config: Some(self.store.clone()),
            file_config: Some(self.file.clone()),
            main_table: self.transfer.main_table.clone(),
            additional_tables: self.transfer.additional_tables.clone(),
            join_condition: self.transfer.join_condition.clone(),
            selected_columns: Vec::new(),
            target_table: self.transfer.target_table.clone(),
        }
    }
}

impl Validate for JobConfig {
    fn validate(&self) -> Result<()> {
        self.request_skeleton().validate()?;

        if let Some(batch_size) = self.transfer.batch_size {
            validate_positive_number("transfer.batch_size", batch_size, 1)?;
        }
        if let Some(dir) = &self.transfer.output_dir {
            validate_path("transfer.output_dir", dir)?;
        }
        if self.route() == Some(Route::FileToStore) && self.file.location.trim().is_empty() {
            return Err(EtlError::MissingConfigError {
                field: "file.location".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EXPORT_JOB: &str = r#"
[job]
name = "events-export"

[store]
host = "localhost"
port = 8123
database = "analytics"
user = "etl"

[file]
delimiter = "|"
has_header = true

[transfer]
source = "clickhouse"
target = "flatfile"
main_table = "events"
additional_tables = ["users"]
join_condition = "events.user_id = users.id"
columns = ["events.id", "users.name"]
output_dir = "./exports"
"#;

    #[test]
    fn test_parse_export_job() {
        let config = JobConfig::from_toml_str(EXPORT_JOB).unwrap();

        assert_eq!(config.job.name, "events-export");
        assert_eq!(config.store.database, "analytics");
        assert_eq!(config.file.delimiter, '|');
        assert!(config.file.has_header);
        assert_eq!(config.file.encoding, "UTF-8");
        assert_eq!(config.route(), Some(Route::StoreToFile));
        assert_eq!(config.output_dir(), Some(PathBuf::from("./exports")));
        assert!(!config.monitoring_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("JOB_TEST_CH_TOKEN", "s3cret");

        let content = EXPORT_JOB.replace(
            "user = \"etl\"",
            "user = \"etl\"\ntoken = \"${JOB_TEST_CH_TOKEN}\"",
        );
        let config = JobConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.store.token.as_deref(), Some("s3cret"));

        std::env::remove_var("JOB_TEST_CH_TOKEN");
    }

    #[test]
    fn test_unset_env_var_is_left_in_place() {
        let content = EXPORT_JOB.replace("\"localhost\"", "\"${JOB_TEST_UNSET_HOST}\"");
        let config = JobConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.store.host, "${JOB_TEST_UNSET_HOST}");
    }

    #[test]
    fn test_same_side_job_fails_validation() {
        let content = EXPORT_JOB.replace("target = \"flatfile\"", "target = \"clickhouse\"");
        let config = JobConfig::from_toml_str(&content).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            EtlError::UnsupportedRoute { .. }
        ));
    }

    #[test]
    fn test_import_job_needs_file_location() {
        let content = EXPORT_JOB
            .replace("source = \"clickhouse\"", "source = \"flatfile\"")
            .replace("target = \"flatfile\"", "target = \"clickhouse\"\ntarget_table = \"events_copy\"");
        let config = JobConfig::from_toml_str(&content).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            EtlError::MissingConfigError { .. }
        ));
    }

    #[test]
    fn test_select_columns() {
        let config = JobConfig::from_toml_str(EXPORT_JOB).unwrap();
        let available = vec![
            ColumnMetadata::new("events.id", "UInt64"),
            ColumnMetadata::new("events.kind", "String"),
            ColumnMetadata::new("users.name", "String"),
        ];

        let columns = config.select_columns(available.clone()).unwrap();
        let selected: Vec<bool> = columns.iter().map(|c| c.selected).collect();
        assert_eq!(selected, vec![true, false, true]);

        let request = config.to_request(columns);
        assert!(request.has_selection());
        assert_eq!(request.additional_tables, vec!["users".to_string()]);

        let missing = vec![ColumnMetadata::new("events.id", "UInt64")];
        assert!(config.select_columns(missing).is_err());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = JobConfig::from_toml_str("[job\nname=").unwrap_err();
        assert!(matches!(err, EtlError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(EXPORT_JOB.as_bytes()).unwrap();

        let config = JobConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.transfer.main_table, "events");
    }
}
