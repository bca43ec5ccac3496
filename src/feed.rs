use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::ingestion::{FeedFormat, FieldMap, Place};

const FETCH_TIMEOUT_SECS: u64 = 30;

/// Where the tabular feed lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Remote(Url),
    Local(PathBuf),
}

impl FeedSource {
    pub fn parse(value: &str) -> AppResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::Config("feed source is empty".into()));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let url = Url::parse(trimmed)
                .map_err(|err| AppError::Config(format!("invalid feed URL {trimmed}: {err}")))?;
            return Ok(FeedSource::Remote(url));
        }
        Ok(FeedSource::Local(PathBuf::from(trimmed)))
    }
}

/// Fetches and parses the whole feed. Any failure here is fatal to the run.
pub async fn fetch_feed(
    source: &FeedSource,
    format: FeedFormat,
    fields: &FieldMap,
) -> AppResult<Vec<Place>> {
    let bytes = match source {
        FeedSource::Remote(url) => fetch_remote(url, format).await?,
        FeedSource::Local(path) => tokio::fs::read(path).await.map_err(|err| {
            AppError::Feed(format!("cannot read {}: {err}", path.display()))
        })?,
    };

    let places = format.parse_payload(&bytes, fields).map_err(|err| match err {
        AppError::Feed(_) => err,
        other => AppError::Feed(format!("malformed {} payload: {other}", format.as_str())),
    })?;
    info!(
        target: "feed",
        rows = places.len(),
        format = format.as_str(),
        "feed parsed"
    );
    Ok(places)
}

async fn fetch_remote(url: &Url, format: FeedFormat) -> AppResult<Vec<u8>> {
    let http = Client::builder()
        .user_agent(concat!("placefeed/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()?;
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|err| AppError::Feed(format!("request to {url} failed: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Feed(format!("{url} answered {status}")));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase());
    debug!(target: "feed", %url, content_type = ?content_type, "feed response received");
    check_content_type(content_type.as_deref(), format)?;

    let bytes = response
        .bytes()
        .await
        .map_err(|err| AppError::Feed(format!("reading {url} failed: {err}")))?;
    Ok(bytes.to_vec())
}

fn check_content_type(content_type: Option<&str>, format: FeedFormat) -> AppResult<()> {
    let Some(content_type) = content_type else {
        return Ok(());
    };
    if content_type.starts_with("text/html") {
        return Err(AppError::Feed(
            "feed returned an HTML page; is the sheet published?".into(),
        ));
    }
    if format == FeedFormat::Json
        && !content_type.contains("json")
        && !content_type.starts_with("text/plain")
    {
        return Err(AppError::Feed(format!(
            "expected JSON feed, got content type {content_type}"
        )));
    }
    Ok(())
}
