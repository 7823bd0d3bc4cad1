use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 欄位描述；`type` 可以是推論出的語意型別 (Integer/Double/...) 或 ClickHouse 原生型別
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            selected: true,
        }
    }

    pub fn deselected(mut self) -> Self {
        self.selected = false;
        self
    }
}

/// 取出被選取的欄位名稱，保留原本順序
pub fn selected_names(columns: &[ColumnMetadata]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.selected)
        .map(|c| c.name.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    /// 以 ClickHouse 密碼 (X-ClickHouse-Key) 送出
    #[serde(default, alias = "jwtToken")]
    pub token: Option<String>,
    #[serde(default)]
    pub secure: bool,
}

fn default_user() -> String {
    "default".to_string()
}

impl StoreConfig {
    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or(if self.secure { 8443 } else { 8123 })
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.effective_port())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// 本機路徑或 http(s) URL
    #[serde(alias = "fileName", default)]
    pub location: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default, alias = "has_header")]
    pub has_header: bool,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "UTF-8".to_string()
}

impl FileConfig {
    pub fn new(location: impl Into<String>, delimiter: char, has_header: bool) -> Self {
        Self {
            location: location.into(),
            delimiter,
            has_header,
            encoding: default_encoding(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointKind {
    #[serde(rename = "clickhouse", alias = "ClickHouse")]
    ClickHouse,
    #[serde(rename = "flatfile", alias = "FlatFile")]
    FlatFile,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::ClickHouse => write!(f, "clickhouse"),
            EndpointKind::FlatFile => write!(f, "flatfile"),
        }
    }
}

/// 支援的兩個傳輸方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StoreToFile,
    FileToStore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    #[serde(alias = "sourceType")]
    pub source_kind: EndpointKind,
    #[serde(alias = "targetType")]
    pub target_kind: EndpointKind,
    #[serde(default, alias = "clickHouseConfig")]
    pub store_config: Option<StoreConfig>,
    #[serde(default, alias = "flatFileConfig")]
    pub file_config: Option<FileConfig>,
    #[serde(default, alias = "tableName")]
    pub main_table: String,
    #[serde(default)]
    pub additional_tables: Vec<String>,
    #[serde(default)]
    pub join_condition: String,
    #[serde(default)]
    pub selected_columns: Vec<ColumnMetadata>,
    #[serde(default, alias = "targetTableName")]
    pub target_table: String,
}

impl TransferRequest {
    pub fn route(&self) -> Option<Route> {
        match (self.source_kind, self.target_kind) {
            (EndpointKind::ClickHouse, EndpointKind::FlatFile) => Some(Route::StoreToFile),
            (EndpointKind::FlatFile, EndpointKind::ClickHouse) => Some(Route::FileToStore),
            _ => None,
        }
    }

    pub fn has_selection(&self) -> bool {
        self.selected_columns.iter().any(|c| c.selected)
    }
}

/// 列值的 tagged union，所有元件共用
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    DateText(String),
    String(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::DateText(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// 寫入平面檔用的文字表示；Null 為空字串
    pub fn to_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::DateText(s) | Value::String(s) => s.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::DateText(s) | Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// 一筆資料：欄名到值，保留欄位插入順序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// 同名欄位會被覆寫
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// 一次傳輸的結果摘要
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub records: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub elapsed_ms: u128,
    pub output_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_metadata_defaults_to_selected() {
        let column: ColumnMetadata =
            serde_json::from_str(r#"{"name": "id", "type": "Integer"}"#).unwrap();
        assert!(column.selected);
        assert_eq!(column.data_type, "Integer");
    }

    #[test]
    fn test_transfer_request_route() {
        let json = r#"{
            "sourceType": "clickhouse",
            "targetType": "flatfile",
            "tableName": "events",
            "targetTableName": "events_export"
        }"#;
        let request: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.route(), Some(Route::StoreToFile));
        assert_eq!(request.main_table, "events");
        assert!(!request.has_selection());

        let mut same_side = request.clone();
        same_side.target_kind = EndpointKind::ClickHouse;
        assert_eq!(same_side.route(), None);
    }

    #[test]
    fn test_row_preserves_insertion_order() {
        let mut row = Row::new();
        row.insert("b", Value::Integer(2));
        row.insert("a", Value::from("x"));
        row.insert("b", Value::Integer(3));

        let columns: Vec<&str> = row.columns().collect();
        assert_eq!(columns, vec!["b", "a"]);
        assert_eq!(row.get("b"), Some(&Value::Integer(3)));
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"b":3,"a":"x"}"#
        );
    }

    #[test]
    fn test_store_config_base_url() {
        let config = StoreConfig {
            host: "localhost".to_string(),
            port: None,
            database: "default".to_string(),
            user: "default".to_string(),
            token: None,
            secure: true,
        };
        assert_eq!(config.base_url(), "https://localhost:8443/");
    }
}
