// Adapters layer: concrete clients for the two ends of a transfer.

pub mod clickhouse;
pub mod flat_file;
