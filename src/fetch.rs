use crate::detectors::Upload;
use reqwest::{Client, StatusCode, Url};
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Remote returned status {0}")]
    Status(StatusCode),
    #[error("Remote file exceeds the {0} byte upload limit")]
    TooLarge(usize),
}

pub fn parse_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(FetchError::InvalidUrl(format!(
            "{raw}: unsupported scheme {scheme}"
        ))),
    }
}

/// Last non-empty path segment, which carries the extension detectors key on.
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("download")
        .to_string()
}

/// Downloads `raw_url`, refusing bodies larger than `max_bytes` whether or
/// not the server declares a length.
pub async fn fetch_upload(
    client: &Client,
    raw_url: &str,
    max_bytes: usize,
) -> Result<Upload, FetchError> {
    let url = parse_url(raw_url)?;
    let filename = filename_from_url(&url);
    info!(url = %url, "fetching remote upload");

    let mut response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }
    if response
        .content_length()
        .is_some_and(|len| len > max_bytes as u64)
    {
        return Err(FetchError::TooLarge(max_bytes));
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(FetchError::TooLarge(max_bytes));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(Upload::new(filename, bytes))
}
