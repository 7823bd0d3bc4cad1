use ch_flatfile_etl::config::{apply_column_filter, CliConfig, Command, JobConfig};
use ch_flatfile_etl::core::query;
use ch_flatfile_etl::domain::model::{ColumnMetadata, Route};
use ch_flatfile_etl::utils::{logger, validation::Validate};
use ch_flatfile_etl::{EtlError, IntegrationService};
use clap::Parser;
use serde::Serialize;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.log_json {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting ch-flatfile-etl CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if config.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }
    let service = IntegrationService::new().with_monitoring(config.monitor);

    if let Err(e) = run(service, &config).await {
        // 記錄詳細錯誤信息
        tracing::error!(
            "❌ Operation failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        // 輸出用戶友好的錯誤信息
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        std::process::exit(e.severity().exit_code());
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> ch_flatfile_etl::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(service: IntegrationService, config: &CliConfig) -> ch_flatfile_etl::Result<()> {
    match &config.command {
        Command::Ping { store } => {
            service.test_connection(&store.to_store_config()).await?;
            println!("✅ Connection successful");
        }
        Command::Tables { store } => {
            let tables = service.list_tables(&store.to_store_config()).await?;
            print_json(&tables)?;
        }
        Command::Describe { store, table } => {
            let columns = service.describe_table(&store.to_store_config(), table).await?;
            print_json(&columns)?;
        }
        Command::PreviewStore {
            store,
            table,
            columns,
            join_tables,
            join_condition,
            limit,
        } => {
            let store_config = store.to_store_config();
            let selected = if columns.is_empty() {
                service.describe_table(&store_config, table).await?
            } else {
                columns
                    .iter()
                    .map(|name| ColumnMetadata::new(name.as_str(), ""))
                    .collect()
            };
            let rows = service
                .preview_store_join(&store_config, table, join_tables, join_condition, &selected, *limit)
                .await?;
            print_json(&rows)?;
        }
        Command::Schema { file } => {
            let columns = service.infer_file_schema(&file.to_file_config(), None).await?;
            print_json(&columns)?;
        }
        Command::PreviewFile { file, columns, limit } => {
            let file_config = file.to_file_config();
            let available = service.infer_file_schema(&file_config, None).await?;
            let selected = apply_column_filter(available, columns);
            let rows = service.preview_file(&file_config, None, &selected, *limit).await?;
            print_json(&rows)?;
        }
        Command::Transfer { job, dry_run } => {
            run_job(service, job, *dry_run).await?;
        }
    }
    Ok(())
}

async fn run_job(service: IntegrationService, path: &str, dry_run: bool) -> ch_flatfile_etl::Result<()> {
    tracing::info!("📁 Loading job from: {}", path);
    let job = JobConfig::from_file(path)?;
    job.validate()?;
    tracing::info!("✅ Job '{}' loaded and validated", job.job.name);

    let monitoring = service.monitoring_enabled() || job.monitoring_enabled();
    let mut service = service.with_monitoring(monitoring);
    if let Some(dir) = job.output_dir() {
        service = service.with_output_dir(dir);
    }
    if let Some(batch_size) = job.batch_size() {
        service = service.with_batch_size(batch_size);
    }
    if let Some(interval) = job.progress_interval() {
        service = service.with_progress_interval(interval);
    }

    let available = match job.route() {
        Some(Route::StoreToFile) if !job.transfer.columns.is_empty() => job
            .transfer
            .columns
            .iter()
            .map(|name| ColumnMetadata::new(name.as_str(), ""))
            .collect(),
        Some(Route::StoreToFile) => service.describe_table(&job.store, &job.transfer.main_table).await?,
        Some(Route::FileToStore) => service.infer_file_schema(&job.file, None).await?,
        None => {
            return Err(EtlError::UnsupportedRoute {
                from: job.transfer.source.to_string(),
                to: job.transfer.target.to_string(),
            })
        }
    };
    let request = job.to_request(job.select_columns(available)?);

    if dry_run {
        tracing::info!("🔍 DRY RUN MODE - No actual processing will occur");
        print_plan(&job, &request.selected_columns)?;
        return Ok(());
    }

    let report = service.run_transfer(&request, None).await?;
    tracing::info!("✅ Transfer completed: {} records in {} ms", report.records, report.elapsed_ms);
    if let Some(path) = &report.output_file {
        tracing::info!("📁 Output saved to: {}", path.display());
    }
    print_json(&report)
}

fn print_plan(job: &JobConfig, columns: &[ColumnMetadata]) -> ch_flatfile_etl::Result<()> {
    println!("Job: {}", job.job.name);
    match job.route() {
        Some(Route::StoreToFile) => {
            let joins = query::join_clauses(&job.transfer.additional_tables, &job.transfer.join_condition)?;
            match query::select(&job.transfer.main_table, columns, &joins, None)? {
                Some(sql) => println!("Query: {}", sql),
                None => println!("No columns selected, nothing to transfer"),
            }
        }
        Some(Route::FileToStore) if !columns.iter().any(|c| c.selected) => {
            println!("No columns selected, nothing to transfer");
        }
        Some(Route::FileToStore) => {
            println!("Source file: {}", job.file.location);
            println!("DDL: {}", query::create_table(&job.transfer.target_table, columns)?);
            println!("Insert: {}", query::insert_template(&job.transfer.target_table, columns)?.statement);
        }
        None => {}
    }
    Ok(())
}
