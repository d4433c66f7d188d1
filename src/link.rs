//! Link card metadata from the card extraction service.

use crate::error::{AtpError, Result};
use crate::http::XrpcHttpClient;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Metadata the card service extracts from a web page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub likely_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Preview image, usually proxied through the card service
    #[serde(default)]
    pub image: Option<String>,
}

impl LinkMetadata {
    /// Preview image URL, if the page has one.
    pub fn image_url(&self) -> Option<&str> {
        self.image.as_deref().filter(|image| !image.is_empty())
    }
}

/// Builds `<card_service>/v1/extract?url=<uri>`.
pub fn extract_url(card_service: &str, uri: &str) -> Result<Url> {
    let mut base = Url::parse(card_service)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join("v1/extract")?;
    url.query_pairs_mut().append_pair("url", uri);
    Ok(url)
}

/// Asks the configured card service for the metadata of `uri`.
pub async fn fetch_link_metadata(http_client: &XrpcHttpClient, uri: &str) -> Result<LinkMetadata> {
    let url = extract_url(&http_client.config().http.card_service_url, uri)?;
    debug!("Fetching link metadata for {uri}");

    let metadata: LinkMetadata = http_client
        .get_json(url.as_str())
        .await
        .map_err(|e| match e {
            AtpError::Http { status, .. } => AtpError::LinkMetadata {
                url: uri.to_string(),
                reason: format!("HTTP status code {status}"),
            },
            other => other,
        })?;

    match metadata.error.as_deref() {
        Some(error) if !error.is_empty() => Err(AtpError::LinkMetadata {
            url: uri.to_string(),
            reason: error.to_string(),
        }),
        _ => Ok(metadata),
    }
}
