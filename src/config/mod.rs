#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::{apply_column_filter, CliConfig, Command, FileArgs, StoreArgs};
pub use toml_config::JobConfig;
