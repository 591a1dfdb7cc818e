use std::{env, fs, path::Path};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::info;

use crate::error::{Error, Result};

async fn download_file(url: &str, path: &Path) -> Result<()> {
    info!("Downloading {:?} from {}", path, url);

    let mut header_map = HeaderMap::new();

    if let Ok(token) = env::var("GITHUB_TOKEN") {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| Error::Config("Invalid GITHUB_TOKEN format".into()))?;
        header_map.insert(HeaderName::from_static("authorization"), auth_value);
    }
    header_map.insert(
        HeaderName::from_static("accept"),
        HeaderValue::from_static("application/octet-stream"),
    );

    let client = reqwest::Client::new();
    let response = client.get(url).headers(header_map).send().await?;

    if !response.status().is_success() {
        return Err(Error::Config(format!(
            "Failed to download {}: {}",
            url,
            response.status()
        )));
    }

    let bytes = response.bytes().await?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Downloads the model when it is missing locally and a URL is configured.
///
/// A missing model without a URL is not an error: the service starts in demo mode.
pub async fn ensure_model_file(model_path: &Path, model_url: Option<&str>) -> Result<()> {
    info!("Checking model...");
    if model_path.exists() {
        return Ok(());
    }
    match model_url {
        Some(url) => download_file(url, model_path).await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_model_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frozen_graph.pb");
        fs::write(&path, b"graph").unwrap();

        ensure_model_file(&path, Some("http://127.0.0.1:9/never-called"))
            .await
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"graph");
    }

    #[tokio::test]
    async fn missing_model_without_url_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        ensure_model_file(&dir.path().join("absent.pb"), None)
            .await
            .unwrap();
    }
}
