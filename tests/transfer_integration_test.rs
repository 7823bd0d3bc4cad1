use anyhow::Result;
use ch_flatfile_etl::{
    ColumnMetadata, EndpointKind, EtlError, FileConfig, IntegrationService, StoreConfig, TransferRequest, Value,
};
use httpmock::prelude::*;
use tempfile::TempDir;

const READ_FORMAT: &str = "FORMAT JSONCompactEachRowWithNamesAndTypes";

fn store_config(server: &MockServer) -> StoreConfig {
    StoreConfig {
        host: server.host(),
        port: Some(server.port()),
        database: "default".to_string(),
        user: "default".to_string(),
        token: None,
        secure: false,
    }
}

fn request(
    server: &MockServer,
    source_kind: EndpointKind,
    target_kind: EndpointKind,
    file_config: FileConfig,
    columns: Vec<ColumnMetadata>,
) -> TransferRequest {
    TransferRequest {
        source_kind,
        target_kind,
        store_config: Some(store_config(server)),
        file_config: Some(file_config),
        main_table: "people".to_string(),
        additional_tables: Vec::new(),
        join_condition: String::new(),
        selected_columns: columns,
        target_table: "people_copy".to_string(),
    }
}

/// 匯出到檔案後，用相同設定讀回應得到相同資料
#[tokio::test]
async fn test_export_to_file_round_trips_through_preview() -> Result<()> {
    export_round_trip(true).await?;
    export_round_trip(false).await
}

async fn export_round_trip(has_header: bool) -> Result<()> {
    let output_dir = TempDir::new()?;
    let server = MockServer::start();

    let body = concat!(
        "[\"id\",\"name\",\"score\"]\n",
        "[\"Int64\",\"String\",\"Float64\"]\n",
        "[\"1\",\"Alice\",9.5]\n",
        "[\"2\",\"Bob; Jr\",7.25]\n",
        "[\"3\",\"Carol\",8]\n"
    );
    let select_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/")
            .body(format!("SELECT `id`, `name`, `score` FROM `people` {}", READ_FORMAT));
        then.status(200).body(body);
    });

    let file_config = FileConfig::new("", ';', has_header);
    let columns = vec![
        ColumnMetadata::new("id", "Integer"),
        ColumnMetadata::new("name", "String"),
        ColumnMetadata::new("score", "Double"),
    ];
    let request = request(
        &server,
        EndpointKind::ClickHouse,
        EndpointKind::FlatFile,
        file_config.clone(),
        columns.clone(),
    );

    let service = IntegrationService::new().with_output_dir(output_dir.path());
    let report = service.run_transfer(&request, None).await?;
    select_mock.assert();

    assert_eq!(report.records, 3);
    let output = report.output_file.expect("export should produce a file");
    assert!(output.starts_with(output_dir.path()));
    let file_name = output.file_name().unwrap().to_str().unwrap().to_string();
    assert!(file_name.starts_with("people_copy_"));
    assert!(file_name.ends_with(".csv"));

    let read_back = FileConfig::new(output.to_str().unwrap(), ';', has_header);
    let rows = service.preview_file(&read_back, None, &columns, 0).await?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
    assert_eq!(rows[1].get("name"), Some(&Value::from("Bob; Jr")));
    assert_eq!(rows[1].get("score"), Some(&Value::Float(7.25)));
    assert_eq!(rows[2].get("score"), Some(&Value::Float(8.0)));
    Ok(())
}

/// 沒有資料時仍輸出只有標題列的檔案
#[tokio::test]
async fn test_export_of_empty_result_writes_header_only() -> Result<()> {
    let output_dir = TempDir::new()?;
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/").body_contains("SELECT `id` FROM `people`");
        then.status(200).body("[\"id\"]\n[\"UInt32\"]\n");
    });

    let request = request(
        &server,
        EndpointKind::ClickHouse,
        EndpointKind::FlatFile,
        FileConfig::new("", ',', true),
        vec![ColumnMetadata::new("id", "UInt32")],
    );
    let report = IntegrationService::new()
        .with_output_dir(output_dir.path())
        .run_transfer(&request, None)
        .await?;

    assert_eq!(report.records, 0);
    let content = std::fs::read_to_string(report.output_file.unwrap())?;
    assert_eq!(content, "id\n");
    Ok(())
}

/// 檔案匯入：建表一次，依批次大小分批送出
#[tokio::test]
async fn test_import_creates_table_and_inserts_in_batches() -> Result<()> {
    let server = MockServer::start();

    let create_mock = server.mock(|when, then| {
        when.method(POST).path("/").body(
            "CREATE TABLE IF NOT EXISTS `people_copy` (`id` Int64, `name` String, `active` UInt8) \
             ENGINE = MergeTree() ORDER BY tuple()",
        );
        then.status(200);
    });
    let insert_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/")
            .query_param(
                "query",
                "INSERT INTO `people_copy` (`id`, `name`, `active`) FORMAT JSONEachRow",
            )
            .query_param("date_time_input_format", "best_effort")
            .body_contains("\"active\":");
        then.status(200);
    });

    let data = b"id,name,active,ignored\n1,a,true,x\n2,b,false,x\n3,c,yes,x\n4,d,no,x\n5,e,true,x\n";
    let columns = vec![
        ColumnMetadata::new("id", "Integer"),
        ColumnMetadata::new("name", "String"),
        ColumnMetadata::new("active", "Boolean"),
        ColumnMetadata::new("ignored", "String").deselected(),
    ];
    let request = request(
        &server,
        EndpointKind::FlatFile,
        EndpointKind::ClickHouse,
        FileConfig::new("", ',', true),
        columns,
    );

    let report = IntegrationService::new()
        .with_batch_size(2)
        .run_transfer(&request, Some(data))
        .await?;

    assert_eq!(report.records, 5);
    assert!(report.output_file.is_none());
    create_mock.assert_hits(1);
    insert_mock.assert_hits(3);
    Ok(())
}

#[tokio::test]
async fn test_import_failure_reports_query_error() -> Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/").body_contains("CREATE TABLE");
        then.status(200);
    });
    server.mock(|when, then| {
        when.method(POST).path("/").query_param_exists("query");
        then.status(500)
            .header("X-ClickHouse-Exception-Code", "27")
            .body("Code: 27. DB::Exception: Cannot parse input");
    });

    let request = request(
        &server,
        EndpointKind::FlatFile,
        EndpointKind::ClickHouse,
        FileConfig::new("", ',', true),
        vec![ColumnMetadata::new("id", "Integer")],
    );

    let err = IntegrationService::new()
        .run_transfer(&request, Some(b"id\n1\n2\n"))
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::QueryFailed { code: Some(27), .. }));
    Ok(())
}

/// 沒有選取任何欄位時不連線也不建立檔案
#[tokio::test]
async fn test_empty_selection_returns_zero_without_touching_store() -> Result<()> {
    let output_dir = TempDir::new()?;
    let server = MockServer::start();
    let any_mock = server.mock(|when, then| {
        when.method(POST).path("/");
        then.status(200);
    });

    let request = request(
        &server,
        EndpointKind::ClickHouse,
        EndpointKind::FlatFile,
        FileConfig::new("", ',', true),
        vec![ColumnMetadata::new("id", "Int64").deselected()],
    );
    let report = IntegrationService::new()
        .with_output_dir(output_dir.path())
        .run_transfer(&request, None)
        .await?;

    assert_eq!(report.records, 0);
    assert!(report.output_file.is_none());
    any_mock.assert_hits(0);
    assert_eq!(std::fs::read_dir(output_dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_export_with_join_uses_qualified_columns() -> Result<()> {
    let output_dir = TempDir::new()?;
    let server = MockServer::start();
    let join_mock = server.mock(|when, then| {
        when.method(POST).path("/").body(format!(
            "SELECT `A`.`id` AS `A.id`, `val`, `val2` FROM `A` INNER JOIN `B` ON A.id = B.id {}",
            READ_FORMAT
        ));
        then.status(200).body(concat!(
            "[\"A.id\",\"val\",\"val2\"]\n",
            "[\"UInt32\",\"String\",\"String\"]\n",
            "[1,\"x\",\"p\"]\n",
            "[2,\"y\",\"q\"]\n"
        ));
    });

    let mut request = request(
        &server,
        EndpointKind::ClickHouse,
        EndpointKind::FlatFile,
        FileConfig::new("", ',', true),
        vec![
            ColumnMetadata::new("A.id", "UInt32"),
            ColumnMetadata::new("val", "String"),
            ColumnMetadata::new("val2", "String"),
        ],
    );
    request.main_table = "A".to_string();
    request.additional_tables = vec!["B".to_string()];
    request.join_condition = "A.id = B.id".to_string();
    request.target_table = String::new();

    let report = IntegrationService::new()
        .with_output_dir(output_dir.path())
        .run_transfer(&request, None)
        .await?;
    join_mock.assert();

    assert_eq!(report.records, 2);
    let output = report.output_file.unwrap();
    assert!(output
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("A_"));
    assert_eq!(std::fs::read_to_string(output)?, "A.id,val,val2\n1,x,p\n2,y,q\n");
    Ok(())
}
