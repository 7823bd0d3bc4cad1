//! Schema inference for delimited sources.
//!
//! Types come from the first data record only. Callers that need stronger inference must
//! sample more rows themselves.

use crate::adapters::flat_file::decode_field;
use crate::domain::model::ColumnMetadata;
use crate::utils::error::Result;
use encoding_rs::Encoding;
use regex::Regex;
use std::fmt;
use std::io::Read;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Integer,
    Double,
    Date,
    Boolean,
    String,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "Integer",
            SemanticType::Double => "Double",
            SemanticType::Date => "Date",
            SemanticType::Boolean => "Boolean",
            SemanticType::String => "String",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const BOOLEAN_TOKENS: [&str; 6] = ["true", "false", "yes", "no", "1", "0"];

fn date_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"),
            Regex::new(r"^\d{2}/\d{2}/\d{4}$").expect("valid date regex"),
            Regex::new(r"^\d{2}-\d{2}-\d{4}$").expect("valid date regex"),
        ]
    })
}

pub fn is_date_like(value: &str) -> bool {
    date_patterns().iter().any(|re| re.is_match(value))
}

pub fn is_boolean_token(value: &str) -> bool {
    let lower = value.to_lowercase();
    BOOLEAN_TOKENS.contains(&lower.as_str())
}

/// 依優先順序推論單一值的型別，第一個符合的規則勝出
/// Finite decimal only; `inf`, `infinity` and `nan` stay text.
pub fn parse_double(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn infer_type(value: &str) -> SemanticType {
    if value.is_empty() {
        return SemanticType::String;
    }

    if value.parse::<i64>().is_ok() {
        return SemanticType::Integer;
    }

    if parse_double(value).is_some() {
        return SemanticType::Double;
    }

    if is_date_like(value) {
        return SemanticType::Date;
    }

    if is_boolean_token(value) {
        return SemanticType::Boolean;
    }

    SemanticType::String
}

/// 讀取欄名並以第一筆資料推論型別
///
/// 沒有標題列時欄名為 `Column_1..Column_N`。空的輸入回傳空清單。
pub fn infer_schema<R: Read>(
    reader: R,
    delimiter: u8,
    has_header: bool,
    encoding: &'static Encoding,
) -> Result<Vec<ColumnMetadata>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = csv_reader.byte_records();

    let mut columns = Vec::new();
    if has_header {
        let Some(header) = records.next().transpose()? else {
            tracing::debug!("Empty source, no columns inferred");
            return Ok(columns);
        };
        for field in header.iter() {
            columns.push(ColumnMetadata::new(
                decode_field(field, encoding)?,
                SemanticType::String.as_str(),
            ));
        }

        if let Some(first) = records.next().transpose()? {
            for (column, field) in columns.iter_mut().zip(first.iter()) {
                let value = decode_field(field, encoding)?;
                column.data_type = infer_type(&value).as_str().to_string();
            }
        }
    } else if let Some(first) = records.next().transpose()? {
        for (index, field) in first.iter().enumerate() {
            let value = decode_field(field, encoding)?;
            columns.push(ColumnMetadata::new(
                format!("Column_{}", index + 1),
                infer_type(&value).as_str(),
            ));
        }
    }

    tracing::debug!("Inferred {} columns", columns.len());
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;

    #[test]
    fn test_infer_type_precedence() {
        assert_eq!(infer_type("42"), SemanticType::Integer);
        assert_eq!(infer_type("-7"), SemanticType::Integer);
        assert_eq!(infer_type("3.14"), SemanticType::Double);
        assert_eq!(infer_type("1e5"), SemanticType::Double);
        assert_eq!(infer_type("2024-01-15"), SemanticType::Date);
        assert_eq!(infer_type("15/01/2024"), SemanticType::Date);
        assert_eq!(infer_type("15-01-2024"), SemanticType::Date);
        assert_eq!(infer_type("true"), SemanticType::Boolean);
        assert_eq!(infer_type("NO"), SemanticType::Boolean);
        assert_eq!(infer_type("hello"), SemanticType::String);
        assert_eq!(infer_type(""), SemanticType::String);
    }

    #[test]
    fn test_numeric_tokens_win_over_boolean() {
        assert_eq!(infer_type("1"), SemanticType::Integer);
        assert_eq!(infer_type("0"), SemanticType::Integer);
    }

    #[test]
    fn test_non_finite_spellings_are_text() {
        for token in ["inf", "-inf", "Infinity", "NaN", "nan"] {
            assert_eq!(infer_type(token), SemanticType::String, "{}", token);
        }
        assert_eq!(infer_type("1e3"), SemanticType::Double);
        assert_eq!(parse_double("-0.5"), Some(-0.5));
    }

    #[test]
    fn test_date_needs_full_match() {
        assert_eq!(infer_type("2024-01-15T10:00:00"), SemanticType::String);
        assert_eq!(infer_type("2024/01/15"), SemanticType::String);
    }

    #[test]
    fn test_infer_with_header() {
        let data = "id,price,day,active,name\n1,9.5,2024-01-15,true,Widget\n2,x,y,z,w\n";
        let columns = infer_schema(data.as_bytes(), b',', true, UTF_8).unwrap();

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let types: Vec<&str> = columns.iter().map(|c| c.data_type.as_str()).collect();
        assert_eq!(names, vec!["id", "price", "day", "active", "name"]);
        assert_eq!(types, vec!["Integer", "Double", "Date", "Boolean", "String"]);
        assert!(columns.iter().all(|c| c.selected));
    }

    #[test]
    fn test_infer_without_header() {
        let data = "7|hello|2.5\n";
        let columns = infer_schema(data.as_bytes(), b'|', false, UTF_8).unwrap();

        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Column_1", "Column_2", "Column_3"]);
        assert_eq!(columns[0].data_type, "Integer");
        assert_eq!(columns[1].data_type, "String");
        assert_eq!(columns[2].data_type, "Double");
    }

    #[test]
    fn test_header_without_rows_types_as_string() {
        let columns = infer_schema("a;b\n".as_bytes(), b';', true, UTF_8).unwrap();
        assert_eq!(columns.len(), 2);
        assert!(columns.iter().all(|c| c.data_type == "String"));
    }

    #[test]
    fn test_short_first_row_leaves_string() {
        let columns = infer_schema("a,b,c\n1\n".as_bytes(), b',', true, UTF_8).unwrap();
        assert_eq!(columns[0].data_type, "Integer");
        assert_eq!(columns[1].data_type, "String");
        assert_eq!(columns[2].data_type, "String");
    }

    #[test]
    fn test_empty_input_yields_no_columns() {
        assert!(infer_schema("".as_bytes(), b',', true, UTF_8).unwrap().is_empty());
        assert!(infer_schema("".as_bytes(), b',', false, UTF_8).unwrap().is_empty());
    }

    #[test]
    fn test_column_count_matches_for_every_delimiter() {
        for delimiter in [b',', b';', b'\t', b'|'] {
            let d = delimiter as char;
            let header = format!("a{d}b{d}c{d}d\n1{d}2{d}3{d}4\n");
            let with_header = infer_schema(header.as_bytes(), delimiter, true, UTF_8).unwrap();
            assert_eq!(with_header.len(), 4);
            assert_eq!(with_header[3].name, "d");

            let without_header = infer_schema(header.as_bytes(), delimiter, false, UTF_8).unwrap();
            assert_eq!(without_header.len(), 4);
            assert_eq!(without_header[3].name, "Column_4");
        }
    }
}
