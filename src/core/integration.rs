//! Operations exposed to a transport layer or the CLI.
//!
//! Every operation opens its own store connection and file handles and releases them before
//! returning, on error paths too.

use crate::adapters::clickhouse::{ClickHouseClient, ClickHouseInsertHandler, DEFAULT_BATCH_SIZE};
use crate::adapters::flat_file::{delimiter_byte, encoding_for, FlatFileCursor, FlatFileWriteHandler};
use crate::core::inference;
use crate::core::query;
use crate::core::resolver::{ResolvedSource, SourceResolver};
use crate::core::transfer::{TransferEngine, DEFAULT_PROGRESS_INTERVAL};
use crate::domain::model::{ColumnMetadata, FileConfig, Route, Row, StoreConfig, TransferReport, TransferRequest};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// 開啟中的檔案來源；下載的暫存檔跟著 reader 一起存活
struct FileInput {
    reader: Box<dyn Read + Send>,
    _source: Option<ResolvedSource>,
}

pub struct IntegrationService {
    output_dir: PathBuf,
    batch_size: usize,
    progress_interval: u64,
    monitor_enabled: bool,
}

impl IntegrationService {
    pub fn new() -> Self {
        Self {
            output_dir: std::env::temp_dir(),
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            monitor_enabled: false,
        }
    }

    /// 匯出檔案的目錄，預設為系統暫存目錄
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitor_enabled
    }

    fn connect(&self, config: &StoreConfig) -> Result<ClickHouseClient> {
        config.validate()?;
        ClickHouseClient::connect(config)
    }

    pub async fn test_connection(&self, config: &StoreConfig) -> Result<()> {
        let client = self.connect(config)?;
        client.ping().await?;
        tracing::info!("Successfully connected to ClickHouse at {}", config.base_url());
        Ok(())
    }

    pub async fn list_tables(&self, config: &StoreConfig) -> Result<Vec<String>> {
        let client = self.connect(config)?;
        let tables = client.list_tables().await?;
        tracing::info!("Found {} tables in database {}", tables.len(), config.database);
        Ok(tables)
    }

    pub async fn describe_table(&self, config: &StoreConfig, table: &str) -> Result<Vec<ColumnMetadata>> {
        validate_non_empty_string("table", table)?;
        let client = self.connect(config)?;
        let columns = client.describe_table(table).await?;
        tracing::info!("Table {} has {} columns", table, columns.len());
        Ok(columns)
    }

    pub async fn preview_store(
        &self,
        config: &StoreConfig,
        table: &str,
        columns: &[ColumnMetadata],
        limit: usize,
    ) -> Result<Vec<Row>> {
        self.preview_store_join(config, table, &[], "", columns, limit)
            .await
    }

    /// 預覽 (可選 JOIN 的) 查詢結果；`limit` 為 0 時不加 LIMIT
    ///
    /// 沒有額外資料表或 JOIN 條件為空時，退化為對主表的一般 SELECT。
    pub async fn preview_store_join(
        &self,
        config: &StoreConfig,
        main_table: &str,
        additional_tables: &[String],
        join_condition: &str,
        columns: &[ColumnMetadata],
        limit: usize,
    ) -> Result<Vec<Row>> {
        validate_non_empty_string("table", main_table)?;
        let joins = query::join_clauses(additional_tables, join_condition)?;
        let limit = (limit > 0).then_some(limit);

        let Some(sql) = query::select(main_table, columns, &joins, limit)? else {
            tracing::info!("No columns selected, skipping preview of {}", main_table);
            return Ok(Vec::new());
        };

        let client = self.connect(config)?;
        tracing::info!("Executing preview query: {}", sql);
        let rows = client.query_rows(&sql).await?.collect_rows().await?;
        tracing::info!("Preview returned {} rows", rows.len());
        Ok(rows)
    }

    pub async fn infer_file_schema(
        &self,
        config: &FileConfig,
        raw: Option<&[u8]>,
    ) -> Result<Vec<ColumnMetadata>> {
        config.validate()?;
        let input = self.open_file(config, raw).await?;
        let columns = inference::infer_schema(
            input.reader,
            delimiter_byte(config.delimiter)?,
            config.has_header,
            encoding_for(&config.encoding)?,
        )?;
        tracing::info!("Detected {} columns", columns.len());
        Ok(columns)
    }

    /// 讀取檔案資料；`limit` 為 0 時讀完整個檔案
    ///
    /// 空的欄位清單回傳空結果；有欄位但都沒被選取時讀取全部欄位。
    pub async fn preview_file(
        &self,
        config: &FileConfig,
        raw: Option<&[u8]>,
        columns: &[ColumnMetadata],
        limit: usize,
    ) -> Result<Vec<Row>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        config.validate()?;

        let columns: Vec<ColumnMetadata> = if columns.iter().any(|c| c.selected) {
            columns.to_vec()
        } else {
            tracing::debug!("No columns selected, reading all columns");
            columns
                .iter()
                .map(|c| ColumnMetadata {
                    selected: true,
                    ..c.clone()
                })
                .collect()
        };

        let input = self.open_file(config, raw).await?;
        let limit = (limit > 0).then_some(limit);
        let rows = FlatFileCursor::new(input.reader, config, &columns, limit)?.collect_rows()?;
        tracing::info!("Read {} rows from flat file", rows.len());
        Ok(rows)
    }

    /// 依方向執行完整傳輸
    pub async fn run_transfer(&self, request: &TransferRequest, raw: Option<&[u8]>) -> Result<TransferReport> {
        request.validate()?;
        let started_at = chrono::Utc::now();
        let timer = Instant::now();

        let (records, output_file) = if !request.has_selection() {
            tracing::warn!("No columns selected, nothing to transfer");
            (0, None)
        } else {
            match request.route() {
                Some(Route::StoreToFile) => self.store_to_file(request).await?,
                Some(Route::FileToStore) => (self.file_to_store(request, raw).await?, None),
                None => {
                    return Err(EtlError::UnsupportedRoute {
                        from: request.source_kind.to_string(),
                        to: request.target_kind.to_string(),
                    })
                }
            }
        };

        Ok(TransferReport {
            records,
            started_at,
            elapsed_ms: timer.elapsed().as_millis(),
            output_file,
        })
    }

    async fn store_to_file(&self, request: &TransferRequest) -> Result<(u64, Option<PathBuf>)> {
        tracing::info!("Ingesting data from ClickHouse to Flat File");
        let store_config = required(&request.store_config, "store_config")?;
        let file_config = required(&request.file_config, "file_config")?;

        let joins = query::join_clauses(&request.additional_tables, &request.join_condition)?;
        let Some(sql) = query::select(&request.main_table, &request.selected_columns, &joins, None)? else {
            return Ok((0, None));
        };

        let client = self.connect(store_config)?;
        tracing::info!("Executing export query: {}", sql);
        let mut cursor = client.query_rows(&sql).await?;

        let output_name = if request.target_table.trim().is_empty() {
            &request.main_table
        } else {
            &request.target_table
        };
        let mut handler = FlatFileWriteHandler::new(
            file_config,
            &request.selected_columns,
            output_name,
            &self.output_dir,
        )?;

        let records = self.engine().transfer(&mut cursor, &mut handler).await?;
        tracing::info!(
            "Ingestion completed: {} records transferred from ClickHouse to Flat File",
            records
        );
        Ok((records, handler.output_path().map(Path::to_path_buf)))
    }

    async fn file_to_store(&self, request: &TransferRequest, raw: Option<&[u8]>) -> Result<u64> {
        tracing::info!("Ingesting data from Flat File to ClickHouse");
        let store_config = required(&request.store_config, "store_config")?;
        let file_config = required(&request.file_config, "file_config")?;

        let client = self.connect(store_config)?;
        let ddl = query::create_table(&request.target_table, &request.selected_columns)?;
        client.execute(&ddl).await?;

        let input = self.open_file(file_config, raw).await?;
        let mut cursor = FlatFileCursor::new(input.reader, file_config, &request.selected_columns, None)?;

        let template = query::insert_template(&request.target_table, &request.selected_columns)?;
        let mut handler = ClickHouseInsertHandler::new(client, template).with_batch_size(self.batch_size);

        let records = self.engine().transfer(&mut cursor, &mut handler).await?;
        tracing::info!(
            "Ingestion completed: {} records transferred from Flat File to ClickHouse",
            records
        );
        Ok(records)
    }

    fn engine(&self) -> TransferEngine {
        TransferEngine::new_with_monitoring(self.monitor_enabled).with_progress_interval(self.progress_interval)
    }

    /// 呼叫端提供的資料優先於 `location`
    async fn open_file(&self, config: &FileConfig, raw: Option<&[u8]>) -> Result<FileInput> {
        if let Some(bytes) = raw {
            tracing::debug!("Reading {} bytes supplied by caller", bytes.len());
            return Ok(FileInput {
                reader: Box::new(Cursor::new(bytes.to_vec())),
                _source: None,
            });
        }

        if config.location.trim().is_empty() {
            return Err(EtlError::invalid_input(
                "Either file content or a file path/URL must be provided",
            ));
        }

        let resolved = SourceResolver::new()?.resolve(&config.location).await?;
        let file = File::open(resolved.path())?;
        Ok(FileInput {
            reader: Box::new(BufReader::new(file)),
            _source: Some(resolved),
        })
    }
}

impl Default for IntegrationService {
    fn default() -> Self {
        Self::new()
    }
}

fn required<'a, T>(value: &'a Option<T>, field: &str) -> Result<&'a T> {
    crate::utils::validation::validate_required_field(field, value)
}
