use crate::core::inference::{is_boolean_token, parse_double};
use crate::core::typemap::{store_type_for, StoreType};
use crate::domain::model::{selected_names, ColumnMetadata, FileConfig, Row, Value};
use crate::domain::ports::{RowHandler, RowSource};
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const PROGRESS_INTERVAL: u64 = 1000;

pub fn encoding_for(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| EtlError::InvalidConfigValueError {
        field: "encoding".to_string(),
        value: label.to_string(),
        reason: "Unknown character encoding".to_string(),
    })
}

pub fn delimiter_byte(delimiter: char) -> Result<u8> {
    if delimiter.is_ascii() && delimiter != '\n' && delimiter != '\r' && delimiter != '"' {
        Ok(delimiter as u8)
    } else {
        Err(EtlError::InvalidConfigValueError {
            field: "delimiter".to_string(),
            value: delimiter.to_string(),
            reason: "Delimiter must be a single ASCII character".to_string(),
        })
    }
}

pub fn decode_field(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| EtlError::EncodingError {
            message: format!("Invalid {} byte sequence in field", encoding.name()),
        })
}

/// 依欄位宣告的型別轉換原始文字；轉換失敗時保留為字串
pub fn convert_field(raw: &str, data_type: &str) -> Value {
    let store_type = store_type_for(data_type);
    if raw.is_empty() {
        return match store_type {
            StoreType::String => Value::String(String::new()),
            _ => Value::Null,
        };
    }

    match store_type {
        StoreType::Int64 => raw
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        StoreType::Float64 => parse_double(raw)
            .map(Value::Float)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        StoreType::DateTime => Value::DateText(raw.to_string()),
        StoreType::UInt8 if is_boolean_token(raw) => {
            let lower = raw.to_lowercase();
            Value::Bool(matches!(lower.as_str(), "true" | "yes" | "1"))
        }
        StoreType::UInt8 | StoreType::String => Value::String(raw.to_string()),
    }
}

/// 一個要讀取的欄位，以及它在記錄中的位置
#[derive(Debug)]
struct FieldSlot {
    name: String,
    data_type: String,
    index: Option<usize>,
}

/// 平面檔的讀取端，逐筆產生 Row
pub struct FlatFileCursor {
    records: csv::ByteRecordsIntoIter<Box<dyn Read + Send>>,
    slots: Vec<FieldSlot>,
    encoding: &'static Encoding,
    limit: Option<usize>,
    produced: usize,
}

impl FlatFileCursor {
    /// `columns` 是完整的欄位清單；只讀取被選取的欄位。
    /// 沒有標題列時依欄位在清單中的位置對應。
    pub fn new(
        reader: Box<dyn Read + Send>,
        config: &FileConfig,
        columns: &[ColumnMetadata],
        limit: Option<usize>,
    ) -> Result<Self> {
        let encoding = encoding_for(&config.encoding)?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_byte(config.delimiter)?)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let slots = if config.has_header {
            let mut header_record = csv::ByteRecord::new();
            let headers = if csv_reader.read_byte_record(&mut header_record)? {
                header_record
                    .iter()
                    .map(|field| decode_field(field, encoding))
                    .collect::<Result<Vec<String>>>()?
            } else {
                Vec::new()
            };
            tracing::debug!("CSV header: {:?}", headers);
            header_slots(&headers, columns)
        } else {
            columns
                .iter()
                .enumerate()
                .filter(|(_, c)| c.selected)
                .map(|(index, c)| FieldSlot {
                    name: c.name.clone(),
                    data_type: c.data_type.clone(),
                    index: Some(index),
                })
                .collect()
        };

        Ok(Self {
            records: csv_reader.into_byte_records(),
            slots,
            encoding,
            limit,
            produced: 0,
        })
    }

    pub fn from_path(
        path: &Path,
        config: &FileConfig,
        columns: &[ColumnMetadata],
        limit: Option<usize>,
    ) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(Box::new(file), config, columns, limit)
    }

    pub fn from_bytes(
        bytes: Vec<u8>,
        config: &FileConfig,
        columns: &[ColumnMetadata],
        limit: Option<usize>,
    ) -> Result<Self> {
        Self::new(Box::new(std::io::Cursor::new(bytes)), config, columns, limit)
    }

    /// 讀完剩下的資料並收集成 Vec
    pub fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.read_next()? {
            rows.push(row);
        }
        tracing::info!("Read {} records from file", rows.len());
        Ok(rows)
    }

    fn read_next(&mut self) -> Result<Option<Row>> {
        if let Some(limit) = self.limit {
            if self.produced >= limit {
                return Ok(None);
            }
        }

        let Some(record) = self.records.next().transpose()? else {
            return Ok(None);
        };

        let mut row = Row::with_capacity(self.slots.len());
        for slot in &self.slots {
            let raw = match slot.index.and_then(|i| record.get(i)) {
                Some(bytes) => decode_field(bytes, self.encoding)?,
                None => String::new(),
            };
            let value = if slot.index.is_none() {
                Value::String(raw)
            } else {
                convert_field(&raw, &slot.data_type)
            };
            row.insert(slot.name.clone(), value);
        }

        self.produced += 1;
        Ok(Some(row))
    }
}

fn header_slots(headers: &[String], columns: &[ColumnMetadata]) -> Vec<FieldSlot> {
    columns
        .iter()
        .filter(|c| c.selected)
        .map(|c| {
            let index = headers
                .iter()
                .position(|h| *h == c.name)
                .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(&c.name)));
            if index.is_none() {
                tracing::warn!("Column '{}' not found in CSV header", c.name);
            }
            FieldSlot {
                name: c.name.clone(),
                data_type: c.data_type.clone(),
                index,
            }
        })
        .collect()
}

#[async_trait]
impl RowSource for FlatFileCursor {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        self.read_next()
    }
}

struct OpenFile {
    path: PathBuf,
    out: BufWriter<File>,
}

/// 將資料寫入分隔文字檔的 handler
///
/// 檔案在第一筆資料時建立，名稱為 `<table>_<隨機>.csv`，位於輸出目錄中，
/// 傳輸結束後保留給呼叫端。
pub struct FlatFileWriteHandler {
    columns: Vec<String>,
    delimiter: u8,
    encoding: &'static Encoding,
    output_dir: PathBuf,
    table_name: String,
    file: Option<OpenFile>,
    output_path: Option<PathBuf>,
    has_header: bool,
    record_count: u64,
    missing_warned: Vec<String>,
}

impl FlatFileWriteHandler {
    pub fn new(
        config: &FileConfig,
        columns: &[ColumnMetadata],
        table_name: &str,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let delimiter = delimiter_byte(config.delimiter)?;
        let encoding = encoding_for(&config.encoding)?;
        let selected = selected_names(columns);

        if selected.is_empty() {
            tracing::warn!("No columns selected; output file will be empty");
        }

        Ok(Self {
            columns: selected,
            delimiter,
            encoding,
            output_dir: output_dir.into(),
            table_name: table_name.to_string(),
            file: None,
            output_path: None,
            has_header: config.has_header,
            record_count: 0,
            missing_warned: Vec::new(),
        })
    }

    /// 建立後的輸出檔路徑
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let prefix = format!("{}_", sanitize_file_stem(&self.table_name));
        let (file, path) = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".csv")
            .tempfile_in(&self.output_dir)?
            .keep()
            .map_err(|e| EtlError::IoError(e.error))?;

        tracing::info!(
            "Initializing CSV writer at {} with columns: {:?}",
            path.display(),
            self.columns
        );

        self.output_path = Some(path.clone());
        self.file = Some(OpenFile {
            path,
            out: BufWriter::new(file),
        });

        // 沒有標題列的檔案讀回時第一列就是資料
        if self.has_header {
            let header = self.columns.clone();
            self.write_record(header.iter().map(String::as_str))?;
        }
        Ok(())
    }

    fn write_record<'a>(&mut self, fields: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut record = record_writer(self.delimiter);
        record.write_record(fields)?;
        let bytes = record
            .into_inner()
            .map_err(|e| EtlError::IoError(e.into_error()))?;

        let Some(open) = self.file.as_mut() else {
            return Err(EtlError::ProcessingError {
                message: "Output file is not open".to_string(),
            });
        };

        if self.encoding == UTF_8 {
            open.out.write_all(&bytes)?;
        } else {
            let text = std::str::from_utf8(&bytes).map_err(|e| EtlError::EncodingError {
                message: e.to_string(),
            })?;
            let (encoded, _, unmappable) = self.encoding.encode(text);
            if unmappable {
                tracing::warn!(
                    "Some characters cannot be represented in {}",
                    self.encoding.name()
                );
            }
            open.out.write_all(&encoded)?;
        }
        Ok(())
    }
}

fn record_writer(delimiter: u8) -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new())
}

fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "export".to_string()
    } else {
        stem
    }
}

#[async_trait]
impl RowHandler for FlatFileWriteHandler {
    async fn process_row(&mut self, row: Row) -> Result<()> {
        self.ensure_open()?;

        let mut fields = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            match row.get(name) {
                Some(value) => fields.push(value.to_field()),
                None => {
                    if !self.missing_warned.contains(name) {
                        tracing::warn!("Missing column '{}'; writing empty value", name);
                        self.missing_warned.push(name.clone());
                    }
                    fields.push(String::new());
                }
            }
        }
        self.write_record(fields.iter().map(String::as_str))?;

        self.record_count += 1;
        if self.record_count % PROGRESS_INTERVAL == 0 {
            tracing::info!("Written {} records to flat file", self.record_count);
        }
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        // 沒有任何資料時仍輸出只有標題列的檔案
        if self.output_path.is_none() {
            self.ensure_open()?;
        }

        if let Some(mut open) = self.file.take() {
            open.out.flush()?;
            tracing::info!(
                "Successfully completed writing {} records to {}",
                self.record_count,
                open.path.display()
            );
        }
        Ok(())
    }
}
