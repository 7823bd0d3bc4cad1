use crate::utils::error::{EtlError, Result};
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use url::Url;

pub const USER_AGENT: &str = concat!("ch-flatfile-etl/", env!("CARGO_PKG_VERSION"));
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const TEMP_PREFIX: &str = "temp_";

/// 解析後的本機檔案。下載的內容由此值擁有，drop 時刪除暫存檔。
#[derive(Debug)]
pub enum ResolvedSource {
    Local(PathBuf),
    Downloaded(NamedTempFile),
}

impl ResolvedSource {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedSource::Local(path) => path,
            ResolvedSource::Downloaded(file) => file.path(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, ResolvedSource::Downloaded(_))
    }
}

pub struct SourceResolver {
    client: Client,
}

impl SourceResolver {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// 將本機路徑或 http(s) URL 轉成可讀取的本機檔案
    pub async fn resolve(&self, location: &str) -> Result<ResolvedSource> {
        let location = location.trim();
        if location.is_empty() {
            return Err(EtlError::invalid_input("File path or URL cannot be empty"));
        }

        // 先前解析留下的暫存檔直接重用
        let path = Path::new(location);
        if is_reusable_temp(path) {
            tracing::info!("Using existing temporary file: {}", location);
            return Ok(ResolvedSource::Local(path.to_path_buf()));
        }

        let lower = location.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            tracing::info!("Detected URL: {}", location);
            return self.download(location).await;
        }

        if !path.exists() {
            return Err(EtlError::not_found(format!("File not found: {}", location)));
        }
        tracing::info!("Reading local file: {}", location);
        Ok(ResolvedSource::Local(path.to_path_buf()))
    }

    async fn download(&self, location: &str) -> Result<ResolvedSource> {
        let url = Url::parse(location).map_err(|e| {
            EtlError::invalid_input(format!("Invalid URL format: {}", e))
        })?;

        let mut response = self.client.get(url).send().await.map_err(fetch_error)?;

        let status = response.status();
        tracing::debug!("Remote source response status: {}", status);
        if !status.is_success() {
            return Err(EtlError::RemoteFetchFailed {
                status: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let mut temp_file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".csv")
            .tempfile()?;

        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await.map_err(fetch_error)? {
            temp_file.write_all(&chunk)?;
            written += chunk.len();
        }
        temp_file.flush()?;

        tracing::info!(
            "Downloaded {} bytes to temporary file: {}",
            written,
            temp_file.path().display()
        );
        Ok(ResolvedSource::Downloaded(temp_file))
    }
}

fn is_reusable_temp(path: &Path) -> bool {
    let in_temp_dir = path.starts_with(std::env::temp_dir());
    let temp_named = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX))
        .unwrap_or(false);
    in_temp_dir && temp_named && path.is_file()
}

fn fetch_error(e: reqwest::Error) -> EtlError {
    let message = if e.is_timeout() {
        format!("request timed out: {}", e)
    } else {
        format!("Error downloading file from URL: {}", e)
    };
    EtlError::RemoteFetchFailed {
        status: e.status().map(|s| s.as_u16()),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_blank_location_is_invalid() {
        let resolver = SourceResolver::new().unwrap();
        let err = resolver.resolve("   ").await.unwrap_err();
        assert!(matches!(err, EtlError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_missing_local_file_is_not_found() {
        let resolver = SourceResolver::new().unwrap();
        let err = resolver
            .resolve("/definitely/not/here/data.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_existing_local_file_resolves_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let resolver = SourceResolver::new().unwrap();
        let resolved = resolver.resolve(path.to_str().unwrap()).await.unwrap();
        assert!(!resolved.is_temporary());
        assert_eq!(resolved.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_url_is_downloaded_to_owned_temp_file() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/data.csv")
                .header("user-agent", USER_AGENT);
            then.status(200).body("id,name\n1,Alice\n");
        });

        let resolver = SourceResolver::new().unwrap();
        let resolved = resolver.resolve(&server.url("/data.csv")).await.unwrap();
        mock.assert();

        assert!(resolved.is_temporary());
        let path = resolved.path().to_path_buf();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("temp_"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,name\n1,Alice\n");

        // 再次解析同一個暫存檔會直接重用
        let again = resolver.resolve(path.to_str().unwrap()).await.unwrap();
        assert!(!again.is_temporary());
        assert_eq!(again.path(), path.as_path());

        drop(resolved);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing.csv");
            then.status(404);
        });

        let resolver = SourceResolver::new().unwrap();
        let err = resolver
            .resolve(&server.url("/missing.csv"))
            .await
            .unwrap_err();
        mock.assert();

        match err {
            EtlError::RemoteFetchFailed { status, .. } => assert_eq!(status, Some(404)),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
