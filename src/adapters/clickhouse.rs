//! ClickHouse over its HTTP interface.
//!
//! A [`ClickHouseClient`] is created per operation and dropped when the operation ends.
//! Row-returning queries use `JSONCompactEachRowWithNamesAndTypes`, which lets the cursor type
//! each value from the column type line instead of guessing from JSON.

use crate::core::query::{self, InsertTemplate, READ_FORMAT};
use crate::domain::model::{ColumnMetadata, Row, StoreConfig, Value};
use crate::domain::ports::{RowHandler, RowSource};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ClickHouse server error codes
const UNKNOWN_TABLE: u32 = 60;
const UNKNOWN_DATABASE: u32 = 81;
const REQUIRED_PASSWORD: u32 = 194;
const WRONG_PASSWORD: u32 = 193;
const UNKNOWN_USER: u32 = 192;
const AUTHENTICATION_FAILED: u32 = 516;

pub struct ClickHouseClient {
    client: Client,
    config: StoreConfig,
}

impl ClickHouseClient {
    /// 建立本次操作用的連線設定；實際連線在第一個查詢時才發生
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        tracing::info!(
            "Attempting ClickHouse connection to {} with user: {}",
            config.base_url(),
            config.user
        );
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// 送出請求；`params` 附加在 URL 上，`body` 為查詢或資料
    async fn post(&self, params: &[(&str, &str)], body: Vec<u8>) -> Result<Response> {
        let mut request = self
            .client
            .post(self.config.base_url())
            .query(&[("database", self.config.database.as_str())])
            .query(params)
            .header("X-ClickHouse-User", &self.config.user)
            .body(body);
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
            request = request.header("X-ClickHouse-Key", token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                EtlError::connection(e.to_string())
            } else {
                EtlError::ApiError(e)
            }
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// 執行不回傳資料的語句 (DDL)
    pub async fn execute(&self, statement: &str) -> Result<()> {
        tracing::info!("Executing statement: {}", statement);
        let response = self.post(&[], statement.as_bytes().to_vec()).await?;
        response.bytes().await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.execute("SELECT 1").await
    }

    /// 執行查詢並回傳逐筆讀取的 cursor
    pub async fn query_rows(&self, sql: &str) -> Result<ClickHouseCursor> {
        let response = self
            .post(&[], format!("{} FORMAT {}", sql, READ_FORMAT).into_bytes())
            .await?;
        ClickHouseCursor::open(response).await
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let mut cursor = self.query_rows(&query::show_tables(&self.config.database)?).await?;
        let mut tables = Vec::new();
        while let Some(row) = cursor.next_row().await? {
            if let Some(name) = row.get("name").and_then(Value::as_str) {
                tables.push(name.to_string());
            }
        }
        Ok(tables)
    }

    pub async fn describe_table(&self, table: &str) -> Result<Vec<ColumnMetadata>> {
        let mut cursor = self.query_rows(&query::describe_table(table)?).await?;
        let mut columns = Vec::new();
        while let Some(row) = cursor.next_row().await? {
            let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
            let data_type = row.get("type").and_then(Value::as_str).unwrap_or_default();
            columns.push(ColumnMetadata::new(name, data_type));
        }
        Ok(columns)
    }

    /// 送出一批 JSONEachRow 資料
    pub async fn insert_json_lines(&self, statement: &str, body: Vec<u8>) -> Result<()> {
        let params = [
            ("query", statement),
            ("date_time_input_format", "best_effort"),
        ];
        let response = self.post(&params, body).await?;
        response.bytes().await?;
        Ok(())
    }
}

fn exception_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Code:\s*(\d+)").expect("valid exception regex"))
}

async fn error_from_response(response: Response) -> EtlError {
    let status = response.status();
    let header_code = response
        .headers()
        .get("X-ClickHouse-Exception-Code")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok());
    let body = response.text().await.unwrap_or_default();
    classify_error(status, header_code, body.trim())
}

fn classify_error(status: StatusCode, header_code: Option<u32>, body: &str) -> EtlError {
    let code = header_code.or_else(|| {
        exception_code_pattern()
            .captures(body)
            .and_then(|c| c[1].parse::<u32>().ok())
    });
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body.to_string()
    };

    match code {
        Some(UNKNOWN_TABLE) | Some(UNKNOWN_DATABASE) => EtlError::not_found(message),
        Some(UNKNOWN_USER) | Some(WRONG_PASSWORD) | Some(REQUIRED_PASSWORD)
        | Some(AUTHENTICATION_FAILED) => EtlError::connection(message),
        _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            EtlError::connection(message)
        }
        _ => EtlError::QueryFailed { code, message },
    }
}

/// 查詢結果的惰性 cursor：逐行讀取 HTTP 回應本文
pub struct ClickHouseCursor {
    response: Response,
    buffer: Vec<u8>,
    exhausted: bool,
    names: Vec<String>,
    types: Vec<String>,
}

impl ClickHouseCursor {
    async fn open(response: Response) -> Result<Self> {
        let mut cursor = Self {
            response,
            buffer: Vec::new(),
            exhausted: false,
            names: Vec::new(),
            types: Vec::new(),
        };

        if let Some(line) = cursor.next_line().await? {
            cursor.names = parse_header_line(&line)?;
        }
        if let Some(line) = cursor.next_line().await? {
            cursor.types = parse_header_line(&line)?;
        }
        Ok(cursor)
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.exhausted {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.exhausted = true,
            }
        }
    }

    /// 讀完剩下的資料
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

fn parse_header_line(line: &[u8]) -> Result<Vec<String>> {
    serde_json::from_slice::<Vec<String>>(line).map_err(|e| stream_error(line, e))
}

/// 串流中途的伺服器錯誤會以純文字附加在本文後面
fn stream_error(line: &[u8], e: serde_json::Error) -> EtlError {
    let text = String::from_utf8_lossy(line);
    if text.contains("Code:") || text.contains("Exception") {
        classify_error(StatusCode::OK, None, text.trim())
    } else {
        EtlError::SerializationError(e)
    }
}

#[async_trait]
impl RowSource for ClickHouseCursor {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(line) = self.next_line().await? else {
            return Ok(None);
        };

        let values: Vec<serde_json::Value> =
            serde_json::from_slice(&line).map_err(|e| stream_error(&line, e))?;

        let mut row = Row::with_capacity(self.names.len());
        for (index, value) in values.into_iter().enumerate() {
            let name = self
                .names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("column_{}", index + 1));
            let column_type = self.types.get(index).map(String::as_str).unwrap_or("");
            row.insert(name, value_from_store(value, column_type));
        }
        Ok(Some(row))
    }
}

/// 去掉 Nullable(...) / LowCardinality(...) 外層
fn base_type(column_type: &str) -> &str {
    let mut current = column_type.trim();
    loop {
        let stripped = ["Nullable(", "LowCardinality("]
            .iter()
            .find_map(|w| current.strip_prefix(w).and_then(|r| r.strip_suffix(')')));
        match stripped {
            Some(inner) => current = inner.trim(),
            None => return current,
        }
    }
}

/// 依欄位型別把 JSON 值轉成 Value
pub fn value_from_store(value: serde_json::Value, column_type: &str) -> Value {
    use serde_json::Value as Json;

    let base = base_type(column_type);
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if base.starts_with("Float") || base.starts_with("Decimal") {
                n.as_f64().map(Value::Float).unwrap_or(Value::Null)
            } else if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                if n.is_u64() {
                    // UInt64 超出 i64 範圍
                    Value::String(n.to_string())
                } else {
                    Value::Float(f)
                }
            } else {
                Value::String(n.to_string())
            }
        }
        Json::String(s) => {
            if base.starts_with("Int") || base.starts_with("UInt") {
                s.parse::<i64>()
                    .map(Value::Integer)
                    .unwrap_or(Value::String(s))
            } else if base.starts_with("Float") || base.starts_with("Decimal") {
                s.parse::<f64>().map(Value::Float).unwrap_or(Value::String(s))
            } else if base.starts_with("Date") {
                Value::DateText(s)
            } else {
                Value::String(s)
            }
        }
        other => Value::String(other.to_string()),
    }
}

/// 將資料批次寫入 ClickHouse 的 handler
///
/// 每累積 `batch_size` 筆就送出一次並繼續，`complete` 送出剩餘的資料。
pub struct ClickHouseInsertHandler {
    client: ClickHouseClient,
    template: InsertTemplate,
    batch: Vec<u8>,
    batch_rows: usize,
    batch_size: usize,
    inserted: u64,
    received: u64,
}

impl ClickHouseInsertHandler {
    pub fn new(client: ClickHouseClient, template: InsertTemplate) -> Self {
        tracing::info!("Insert statement: {}", template.statement);
        Self {
            client,
            template,
            batch: Vec::new(),
            batch_rows: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            inserted: 0,
            received: 0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    async fn flush(&mut self) -> Result<()> {
        if self.batch_rows == 0 {
            return Ok(());
        }

        let body = std::mem::take(&mut self.batch);
        let rows = self.batch_rows;
        self.batch_rows = 0;

        self.client
            .insert_json_lines(&self.template.statement, body)
            .await?;
        self.inserted += rows as u64;
        tracing::info!("Inserted {} records", self.inserted);
        Ok(())
    }
}

#[async_trait]
impl RowHandler for ClickHouseInsertHandler {
    async fn process_row(&mut self, row: Row) -> Result<()> {
        let mut object = serde_json::Map::with_capacity(self.template.columns.len());
        for name in &self.template.columns {
            let value = row
                .get(name)
                .map(Value::to_json)
                .unwrap_or(serde_json::Value::Null);
            object.insert(name.clone(), value);
        }
        serde_json::to_writer(&mut self.batch, &object)?;
        self.batch.push(b'\n');
        self.batch_rows += 1;
        self.received += 1;

        if self.batch_rows >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        self.flush().await?;
        tracing::info!(
            "Insert completed: {} of {} records written",
            self.inserted,
            self.received
        );
        Ok(())
    }
}
