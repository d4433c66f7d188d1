//! XRPC HTTP client with retry mechanisms.
//!
//! This module wraps `reqwest` with:
//! - XRPC URL construction (`<service>/xrpc/<nsid>`)
//! - Bearer authentication
//! - Conversion of `{"error", "message"}` bodies into [`AtpError::Xrpc`]
//! - Retry with exponential backoff, restricted for non-idempotent procedures
//! - Size-limited streaming downloads for remote resources

use crate::config::Config;
use crate::error::{AtpError, Result};
use crate::record::BlobRef;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Which failures may be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Queries and downloads: any retryable failure
    Always,
    /// Procedures: only failures that provably had no side effect
    SafeOnly,
}

/// HTTP client wrapper for XRPC calls with automatic retry.
#[derive(Debug, Clone)]
pub struct XrpcHttpClient {
    client: Client,
    config: Config,
    service: Url,
}

impl XrpcHttpClient {
    /// Creates a client for the default service.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates a new client with custom configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;

        let mut service = Url::parse(&config.http.service_url)?;
        if !service.path().ends_with('/') {
            let path = format!("{}/", service.path());
            service.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(&config.http.user_agent)
            .build()?;

        Ok(Self {
            client,
            config,
            service,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Base URL of the service, always ending in `/`.
    pub fn service(&self) -> &Url {
        &self.service
    }

    fn xrpc_url(&self, nsid: &str) -> Result<Url> {
        Ok(self.service.join(&format!("xrpc/{nsid}"))?)
    }

    /// Calls an XRPC query (`GET`).
    pub async fn query<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, String)],
        token: Option<&str>,
    ) -> Result<T> {
        let url = self.xrpc_url(nsid)?;
        debug!("XRPC query {nsid}");

        let response = self
            .execute_with_retry(Replay::Always, || {
                let mut request = self.client.get(url.clone()).query(params);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                request.send()
            })
            .await?;

        decode_body(response).await
    }

    /// Calls an XRPC procedure (`POST`) with a JSON body.
    pub async fn procedure<B, T>(&self, nsid: &str, body: &B, token: Option<&str>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.xrpc_url(nsid)?;
        debug!("XRPC procedure {nsid}");

        let response = self
            .execute_with_retry(Replay::SafeOnly, || {
                let mut request = self.client.post(url.clone()).json(body);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                request.send()
            })
            .await?;

        decode_body(response).await
    }

    /// Calls an XRPC procedure that takes no input.
    pub async fn procedure_without_input<T: DeserializeOwned>(
        &self,
        nsid: &str,
        token: Option<&str>,
    ) -> Result<T> {
        let url = self.xrpc_url(nsid)?;
        debug!("XRPC procedure {nsid}");

        let response = self
            .execute_with_retry(Replay::SafeOnly, || {
                let mut request = self.client.post(url.clone());
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                request.send()
            })
            .await?;

        decode_body(response).await
    }

    /// Calls an XRPC procedure whose input is raw bytes of the given MIME type.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        nsid: &str,
        data: Vec<u8>,
        encoding: &str,
        token: Option<&str>,
    ) -> Result<T> {
        let size = data.len() as u64;
        let limit = self.config.security.max_upload_size;
        if size > limit {
            return Err(AtpError::PayloadTooLarge { size, limit });
        }

        let url = self.xrpc_url(nsid)?;
        debug!("XRPC upload {nsid}: {size} bytes of {encoding}");

        let response = self
            .execute_with_retry(Replay::SafeOnly, || {
                let mut request = self
                    .client
                    .post(url.clone())
                    .header(CONTENT_TYPE, encoding)
                    .body(data.clone());
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }
                request.send()
            })
            .await?;

        decode_body(response).await
    }

    /// Fetches a JSON document from an arbitrary URL.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .execute_with_retry(Replay::Always, || self.client.get(url).send())
            .await?;
        decode_body(response).await
    }

    /// Downloads content from a URL with size limits and streaming.
    pub async fn download_with_limit(&self, url: &str, max_size: u64) -> Result<Download> {
        // Use the smaller of provided max_size or security config max
        let effective_max_size = max_size.min(self.config.security.max_download_size);

        let response = self
            .execute_with_retry(Replay::Always, || self.client.get(url).send())
            .await?;

        if let Some(content_length) = response.content_length() {
            if content_length > effective_max_size {
                return Err(AtpError::PayloadTooLarge {
                    size: content_length,
                    limit: effective_max_size,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut downloaded_size = 0u64;
        let mut data = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            downloaded_size += chunk.len() as u64;

            if downloaded_size > effective_max_size {
                return Err(AtpError::PayloadTooLarge {
                    size: downloaded_size,
                    limit: effective_max_size,
                });
            }

            data.extend_from_slice(&chunk);
        }

        debug!("Downloaded {downloaded_size} bytes from {url}");
        Ok(Download { data, content_type })
    }

    /// Executes a request, retrying according to the replay policy.
    async fn execute_with_retry<F, Fut>(&self, replay: Replay, mut operation: F) -> Result<Response>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<Response, reqwest::Error>>,
    {
        let max_attempts = self.config.retry.max_attempts;
        let mut consecutive_failures = 0;

        for attempt in 1..=max_attempts {
            let error = match operation().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => error_from_response(response).await,
                Err(e) if e.is_timeout() => AtpError::Timeout,
                Err(e) => AtpError::Network(e),
            };

            let replayable = match replay {
                Replay::Always => error.is_retryable(),
                Replay::SafeOnly => error.is_safe_to_replay(),
            };
            if attempt >= max_attempts || !replayable {
                return Err(error);
            }

            consecutive_failures += 1;
            let delay = self.backoff_delay(&error, consecutive_failures);

            warn!(
                "Request failed (attempt {}/{}): {}, retrying in {:?}",
                attempt, max_attempts, error, delay
            );

            sleep(delay).await;
        }

        Err(AtpError::Internal(anyhow::anyhow!(
            "Retry loop completed without a response"
        )))
    }

    fn backoff_delay(&self, error: &AtpError, consecutive_failures: u32) -> Duration {
        let base_delay = error.retry_delay(self.config.retry_base_delay());

        // Add jitter to prevent thundering herd
        let actual_delay = if self.config.retry.enable_jitter {
            let jitter = fastrand::u64(0..=base_delay.as_millis() as u64 / 4);
            base_delay + Duration::from_millis(jitter)
        } else {
            base_delay
        };

        let backoff_multiplier = (consecutive_failures as f64 - 1.0).clamp(0.0, 4.0);
        std::cmp::min(
            Duration::from_millis(
                (actual_delay.as_millis() as f64
                    * self.config.retry.backoff_factor.powf(backoff_multiplier)) as u64,
            ),
            self.config.retry_max_delay(),
        )
    }
}

async fn error_from_response(response: Response) -> AtpError {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response.bytes().await.unwrap_or_default();

    match serde_json::from_slice::<XrpcErrorBody>(&body) {
        Ok(body) => AtpError::from_xrpc_response(status, body.error, body.message.unwrap_or_default()),
        Err(_) => AtpError::Http { status, url },
    }
}

async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(serde_json::from_slice(b"{}")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Error body of a failed XRPC call.
#[derive(Debug, Deserialize, Serialize)]
pub struct XrpcErrorBody {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Bytes of a fetched resource and its declared type.
#[derive(Debug, Clone)]
pub struct Download {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// Output of `com.atproto.repo.uploadBlob`.
#[derive(Debug, Deserialize, Serialize)]
pub struct UploadBlobOutput {
    pub blob: BlobRef,
}

/// Output of `com.atproto.identity.resolveHandle`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ResolveHandleOutput {
    pub did: String,
}

/// Output of `com.atproto.repo.getRecord`.
#[derive(Debug, Deserialize, Serialize)]
pub struct GetRecordOutput<T> {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: T,
}

/// One entry of `com.atproto.repo.listRecords`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordEntry {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

/// Output of `com.atproto.repo.listRecords`.
#[derive(Debug, Deserialize, Serialize)]
pub struct ListRecordsOutput {
    #[serde(default)]
    pub cursor: Option<String>,
    pub records: Vec<RecordEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, RetryConfig, SecurityConfig};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(service: &str) -> Config {
        Config::builder()
            .http(HttpConfig::builder().service_url(service.to_string()).build())
            .retry(
                RetryConfig::builder()
                    .base_delay_ms(1)
                    .max_delay_secs(1)
                    .enable_jitter(false)
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_http_client_creation() {
        let client = XrpcHttpClient::new().unwrap();
        assert_eq!(client.service().as_str(), "https://bsky.social/");
        assert_eq!(
            client.xrpc_url("com.atproto.server.createSession").unwrap().as_str(),
            "https://bsky.social/xrpc/com.atproto.server.createSession"
        );
    }

    #[test]
    fn test_service_path_is_kept() {
        let client = XrpcHttpClient::with_config(test_config("https://example.com/pds")).unwrap();
        assert_eq!(
            client.xrpc_url("app.bsky.feed.getTimeline").unwrap().as_str(),
            "https://example.com/pds/xrpc/app.bsky.feed.getTimeline"
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(XrpcHttpClient::with_config(config).is_err());
    }

    #[tokio::test]
    async fn test_query_sends_params_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/com.atproto.identity.resolveHandle"))
            .and(query_param("handle", "alice.test"))
            .and(header("authorization", "Bearer access-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "did": "did:plc:alice" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let output: ResolveHandleOutput = client
            .query(
                "com.atproto.identity.resolveHandle",
                &[("handle", "alice.test".to_string())],
                Some("access-token"),
            )
            .await
            .unwrap();

        assert_eq!(output.did, "did:plc:alice");
    }

    #[tokio::test]
    async fn test_xrpc_error_body_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.server.createSession"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "AuthenticationRequired",
                "message": "Invalid identifier or password"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let err = client
            .procedure::<_, serde_json::Value>(
                "com.atproto.server.createSession",
                &json!({ "identifier": "alice.test", "password": "wrong" }),
                None,
            )
            .await
            .unwrap_err();

        match err {
            AtpError::Xrpc {
                status,
                error,
                message,
            } => {
                assert_eq!(status, 401);
                assert_eq!(error, "AuthenticationRequired");
                assert_eq!(message, "Invalid identifier or password");
            }
            other => panic!("Expected Xrpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_xrpc_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let err = client
            .download_with_limit(&format!("{}/missing.png", server.uri()), 1024)
            .await
            .unwrap_err();

        assert!(matches!(err, AtpError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_query_is_retried_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xrpc/com.atproto.identity.resolveHandle"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": "ServiceUnavailable",
                "message": "try again"
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/xrpc/com.atproto.identity.resolveHandle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "did": "did:plc:alice" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let output: ResolveHandleOutput = client
            .query(
                "com.atproto.identity.resolveHandle",
                &[("handle", "alice.test".to_string())],
                None,
            )
            .await
            .unwrap();

        assert_eq!(output.did, "did:plc:alice");
    }

    #[tokio::test]
    async fn test_procedure_is_not_retried_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.createRecord"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "InternalServerError",
                "message": "boom"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let err = client
            .procedure::<_, serde_json::Value>(
                "com.atproto.repo.createRecord",
                &json!({ "repo": "did:plc:alice" }),
                Some("access-token"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AtpError::Xrpc { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_procedure_is_retried_when_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.createRecord"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": "RateLimitExceeded",
                "message": "slow down"
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.createRecord"))
            .and(body_json(json!({ "repo": "did:plc:alice" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "uri": "at://did:plc:alice/app.bsky.feed.post/1",
                "cid": "bafyrecord"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let output: serde_json::Value = client
            .procedure(
                "com.atproto.repo.createRecord",
                &json!({ "repo": "did:plc:alice" }),
                Some("access-token"),
            )
            .await
            .unwrap();

        assert_eq!(output["cid"], "bafyrecord");
    }

    #[tokio::test]
    async fn test_upload_sends_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.uploadBlob"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "blob": {
                    "$type": "blob",
                    "ref": { "$link": "bafkreiblob" },
                    "mimeType": "image/png",
                    "size": 4
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let output: UploadBlobOutput = client
            .upload(
                "com.atproto.repo.uploadBlob",
                vec![0x89, 0x50, 0x4E, 0x47],
                "image/png",
                Some("access-token"),
            )
            .await
            .unwrap();

        assert_eq!(output.blob, BlobRef::new("bafkreiblob", "image/png", 4));
    }

    #[tokio::test]
    async fn test_upload_rejects_oversized_payload_locally() {
        let mut config = test_config("http://127.0.0.1:9");
        config.security = SecurityConfig::builder().max_upload_size(8).build();
        let client = XrpcHttpClient::with_config(config).unwrap();

        let err = client
            .upload::<UploadBlobOutput>("com.atproto.repo.uploadBlob", vec![0; 9], "image/png", None)
            .await
            .unwrap_err();

        assert!(matches!(err, AtpError::PayloadTooLarge { size: 9, limit: 8 }));
    }

    #[tokio::test]
    async fn test_download_with_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/favicon-16x16.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![7u8; 64]),
            )
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let url = format!("{}/favicon-16x16.png", server.uri());

        let download = client.download_with_limit(&url, 1024).await.unwrap();
        assert_eq!(download.data.len(), 64);
        assert_eq!(download.content_type.as_deref(), Some("image/png"));

        let err = client.download_with_limit(&url, 32).await.unwrap_err();
        assert!(matches!(err, AtpError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/xrpc/com.atproto.repo.deleteRecord"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = XrpcHttpClient::with_config(test_config(&server.uri())).unwrap();
        let output: serde_json::Value = client
            .procedure("com.atproto.repo.deleteRecord", &json!({}), Some("access-token"))
            .await
            .unwrap();

        assert_eq!(output, json!({}));
    }
}
