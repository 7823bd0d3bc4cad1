pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::JobConfig;

pub use core::{integration::IntegrationService, transfer::TransferEngine};
pub use domain::model::{
    ColumnMetadata, EndpointKind, FileConfig, Row, StoreConfig, TransferReport, TransferRequest, Value,
};
pub use utils::error::{EtlError, Result};
