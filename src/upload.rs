//! Blob uploads: raw bytes, remote resources, local images and link cards.

use crate::auth::SessionManager;
use crate::error::{AtpError, Result};
use crate::http::{Download, UploadBlobOutput, XrpcHttpClient};
use crate::link::fetch_link_metadata;
use crate::record::{BlobRef, External, Image};
use crate::utils::{format_file_size, guess_mime_type};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const UPLOAD_BLOB: &str = "com.atproto.repo.uploadBlob";

/// Uploaded blobs keyed by content hash and MIME type, evicted oldest first.
#[derive(Debug)]
struct BlobCache {
    entries: HashMap<String, BlobRef>,
    order: VecDeque<String>,
    capacity: usize,
}

impl BlobCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<BlobRef> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, blob: BlobRef) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), blob).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Uploads blobs on behalf of the current session.
#[derive(Debug)]
pub struct BlobUploader {
    http_client: Arc<XrpcHttpClient>,
    sessions: Arc<SessionManager>,
    cache: Option<RwLock<BlobCache>>,
}

impl BlobUploader {
    pub fn new(http_client: Arc<XrpcHttpClient>, sessions: Arc<SessionManager>) -> Self {
        let cache_config = &http_client.config().cache;
        let cache = cache_config
            .enable_blob_cache
            .then(|| RwLock::new(BlobCache::new(cache_config.max_blob_entries)));

        Self {
            http_client,
            sessions,
            cache,
        }
    }

    /// Uploads raw bytes declared as `encoding`.
    pub async fn upload_blob(&self, data: Vec<u8>, encoding: &str) -> Result<BlobRef> {
        let hash = blake3::hash(&data).to_hex().to_string();
        let key = format!("{hash}:{encoding}");
        debug!("Blob hash: {hash}");

        if let Some(cache) = &self.cache {
            if let Some(blob) = cache.read().await.get(&key) {
                info!("Blob already uploaded with hash {hash}, reusing {}", blob.cid.link);
                return Ok(blob);
            }
        }

        let size = data.len() as u64;
        let http_client = &self.http_client;
        let data = &data;
        let output: UploadBlobOutput = self
            .sessions
            .authorized(|token| async move {
                http_client
                    .upload(UPLOAD_BLOB, data.clone(), encoding, Some(&token))
                    .await
            })
            .await?;

        info!(
            "Uploaded {} blob ({}) -> {}",
            encoding,
            format_file_size(size),
            output.blob.cid.link
        );

        if let Some(cache) = &self.cache {
            cache.write().await.insert(key, output.blob.clone());
        }
        Ok(output.blob)
    }

    /// Downloads a remote resource within the configured download limit.
    pub async fn fetch_blob(&self, url: &str) -> Result<Download> {
        let max_size = self.http_client.config().security.max_download_size;
        self.http_client.download_with_limit(url, max_size).await
    }

    /// Fetches a remote resource and uploads it.
    ///
    /// Without an explicit `encoding` the response's `Content-Type` is used,
    /// then a guess from the URL path.
    pub async fn upload_blob_from_url(&self, url: &str, encoding: Option<&str>) -> Result<BlobRef> {
        let download = self.fetch_blob(url).await?;
        let encoding = resolve_encoding(url, encoding, download.content_type.as_deref());
        self.upload_blob(download.data, &encoding).await
    }

    /// Uploads a local image file and wraps it as an images embed item.
    pub async fn upload_image(
        &self,
        path: impl AsRef<Path>,
        alt: &str,
        encoding: Option<&str>,
    ) -> Result<Image> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AtpError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let data = fs::read(path).await.map_err(|e| {
            AtpError::file_error(path.display().to_string(), format!("Failed to read local file: {e}"))
        })?;

        let encoding = match encoding {
            Some(encoding) if !encoding.is_empty() => encoding.to_string(),
            _ => guess_mime_type(path),
        };

        debug!("Uploading image {} as {encoding}", path.display());
        let blob = self.upload_blob(data, &encoding).await?;
        Ok(Image::new(blob, alt))
    }

    /// Builds a link card for `uri`, uploading its preview image when there is one.
    ///
    /// A preview image that cannot be fetched leaves the card without a thumb.
    pub async fn upload_external(&self, uri: &str) -> Result<External> {
        self.sessions.access_token().await?;

        let metadata = fetch_link_metadata(&self.http_client, uri).await?;

        let mut thumb = None;
        if let Some(image_url) = metadata.image_url() {
            match self.fetch_blob(image_url).await {
                Ok(download) if !download.data.is_empty() => {
                    let encoding =
                        resolve_encoding(image_url, None, download.content_type.as_deref());
                    thumb = Some(self.upload_blob(download.data, &encoding).await?);
                }
                Ok(_) => warn!("Preview image for {uri} is empty, posting card without thumb"),
                Err(e) => warn!("Failed to fetch preview image for {uri}: {e}"),
            }
        }

        Ok(External {
            uri: uri.to_string(),
            title: metadata.title.unwrap_or_default(),
            description: metadata.description.unwrap_or_default(),
            thumb,
        })
    }

    /// Forgets every cached upload.
    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.write().await.clear();
        }
    }
}

/// Picks the MIME type for a fetched resource.
fn resolve_encoding(url: &str, explicit: Option<&str>, content_type: Option<&str>) -> String {
    if let Some(encoding) = explicit.filter(|e| !e.is_empty()) {
        return encoding.to_string();
    }

    // Drop parameters such as `; charset=binary`
    if let Some(content_type) = content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return content_type.to_string();
    }

    let path = url::Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    guess_mime_type(Path::new(&path))
}
