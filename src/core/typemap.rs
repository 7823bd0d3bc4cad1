//! Generic column type → ClickHouse column type.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Int64,
    Float64,
    DateTime,
    UInt8,
    String,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Int64 => "Int64",
            StoreType::Float64 => "Float64",
            StoreType::DateTime => "DateTime",
            StoreType::UInt8 => "UInt8",
            StoreType::String => "String",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an inferred or generic type name to a ClickHouse type.
///
/// Case-insensitive substring match, first rule wins, so ambiguous names such as
/// `timestamp_bool` resolve to `DateTime`. Unknown and empty input map to `String`.
pub fn store_type_for(generic_type: &str) -> StoreType {
    let lower = generic_type.trim().to_lowercase();

    if lower.is_empty() {
        StoreType::String
    } else if lower.contains("int") {
        StoreType::Int64
    } else if ["float", "double", "decimal"].iter().any(|t| lower.contains(t)) {
        StoreType::Float64
    } else if lower.contains("date") || lower.contains("time") {
        StoreType::DateTime
    } else if lower.contains("bool") {
        StoreType::UInt8
    } else {
        StoreType::String
    }
}

pub fn map_to_store_type(generic_type: &str) -> &'static str {
    store_type_for(generic_type).as_str()
}
