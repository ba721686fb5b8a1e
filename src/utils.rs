//! Utility functions.

use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;
    let content = resp.bytes().await?;
    std::fs::write(filepath, &content)?;

    Ok(())
}

/// Fetch the model artifact once if it is not present locally.
pub async fn ensure_model_file(path: &Path, url: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    log::info!("fetching model artifact from {url}");
    download_file(&Client::new(), url, path)
        .await
        .with_context(|| format!("failed to fetch model artifact from {url}"))
}
