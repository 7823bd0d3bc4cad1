use crate::domain::model::{ColumnMetadata, FileConfig, StoreConfig};
use crate::utils::error::Result;
use crate::utils::validation::{validate_non_empty_string, validate_path, Validate};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "ch-flatfile-etl")]
#[command(about = "Move tables between ClickHouse and delimited flat files")]
#[command(version)]
pub struct CliConfig {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage during transfers")]
    pub monitor: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub log_json: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check that the ClickHouse server accepts the credentials
    Ping {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// List tables in the database
    Tables {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Show the columns of a table
    Describe {
        #[command(flatten)]
        store: StoreArgs,
        table: String,
    },
    /// Preview rows of a table, optionally joined with other tables
    PreviewStore {
        #[command(flatten)]
        store: StoreArgs,
        table: String,
        #[arg(long, value_delimiter = ',', help = "Columns to read (default: all)")]
        columns: Vec<String>,
        #[arg(long = "join-table", help = "Additional table for an inner join (repeatable)")]
        join_tables: Vec<String>,
        #[arg(long, default_value = "", help = "Join conditions separated by ';', one per join table")]
        join_condition: String,
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Infer column names and types of a delimited file
    Schema {
        #[command(flatten)]
        file: FileArgs,
    },
    /// Preview rows of a delimited file
    PreviewFile {
        #[command(flatten)]
        file: FileArgs,
        #[arg(long, value_delimiter = ',', help = "Columns to read (default: all)")]
        columns: Vec<String>,
        #[arg(long, default_value = "100", help = "Maximum rows, 0 for all")]
        limit: usize,
    },
    /// Run a transfer described by a TOML job file
    Transfer {
        #[arg(short, long, default_value = "transfer-job.toml")]
        job: String,
        #[arg(long, help = "Show the plan without moving any data")]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    #[arg(long, default_value = "localhost")]
    pub host: String,
    #[arg(long, help = "HTTP port (default 8123, or 8443 with --secure)")]
    pub port: Option<u16>,
    #[arg(long, default_value = "default")]
    pub database: String,
    #[arg(long, default_value = "default")]
    pub user: String,
    #[arg(long, help = "Password or access token")]
    pub token: Option<String>,
    #[arg(long, help = "Use HTTPS")]
    pub secure: bool,
}

impl StoreArgs {
    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            token: self.token.clone(),
            secure: self.secure,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct FileArgs {
    /// Local path or http(s) URL
    pub location: String,
    #[arg(long, default_value = ",")]
    pub delimiter: char,
    #[arg(long, help = "The first line holds data, not column names")]
    pub no_header: bool,
    #[arg(long, default_value = "UTF-8")]
    pub encoding: String,
}

impl FileArgs {
    pub fn to_file_config(&self) -> FileConfig {
        FileConfig {
            location: self.location.clone(),
            delimiter: self.delimiter,
            has_header: !self.no_header,
            encoding: self.encoding.clone(),
        }
    }
}

/// 依指定的欄位名稱標記選取狀態；沒有指定時全部選取
pub fn apply_column_filter(available: Vec<ColumnMetadata>, wanted: &[String]) -> Vec<ColumnMetadata> {
    available
        .into_iter()
        .map(|c| {
            let selected = wanted.is_empty() || wanted.contains(&c.name);
            ColumnMetadata { selected, ..c }
        })
        .collect()
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        match &self.command {
            Command::Ping { store } | Command::Tables { store } => store.to_store_config().validate(),
            Command::Describe { store, table } | Command::PreviewStore { store, table, .. } => {
                store.to_store_config().validate()?;
                validate_non_empty_string("table", table)
            }
            Command::Schema { file } | Command::PreviewFile { file, .. } => {
                validate_non_empty_string("location", &file.location)?;
                file.to_file_config().validate()
            }
            Command::Transfer { job, .. } => validate_path("job", job),
        }
    }
}
