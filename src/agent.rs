//! The Bluesky agent: session, publishing and uploads behind one handle.

use crate::auth::{Session, SessionManager};
use crate::config::{Config, Credentials, HttpConfig};
use crate::error::{AtpError, Result};
use crate::http::{
    Download, GetRecordOutput, ListRecordsOutput, ResolveHandleOutput, XrpcHttpClient,
};
use crate::record::{BlobRef, External, Image, POST_COLLECTION, PostRecord, StrongRef};
use crate::traits::{HandleResolver, Validate};
use crate::upload::BlobUploader;
use crate::uri::AtUri;
use crate::utils::now_timestamp;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const CREATE_RECORD: &str = "com.atproto.repo.createRecord";
const GET_RECORD: &str = "com.atproto.repo.getRecord";
const DELETE_RECORD: &str = "com.atproto.repo.deleteRecord";
const LIST_RECORDS: &str = "com.atproto.repo.listRecords";
const RESOLVE_HANDLE: &str = "com.atproto.identity.resolveHandle";

/// Page size limits of `listRecords`.
pub const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
struct CreateRecordInput<'a, R> {
    repo: &'a str,
    collection: &'a str,
    record: &'a R,
}

#[derive(Debug, Serialize)]
struct DeleteRecordInput<'a> {
    repo: &'a str,
    collection: &'a str,
    rkey: &'a str,
}

/// Paging options for [`BskyAgent::list_records`].
#[derive(Debug, Clone, Default)]
pub struct ListRecordsParams {
    /// Page size, 1..=100; the service default applies when unset
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    /// Oldest first instead of newest first
    pub reverse: bool,
}

impl ListRecordsParams {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    fn to_query(&self) -> Result<Vec<(&'static str, String)>> {
        let mut query = Vec::new();
        if let Some(limit) = self.limit {
            if !(1..=MAX_LIST_LIMIT).contains(&limit) {
                return Err(AtpError::InvalidParameter {
                    name: "limit".to_string(),
                    reason: format!("must be between 1 and {MAX_LIST_LIMIT}, got {limit}"),
                });
            }
            query.push(("limit", limit.to_string()));
        }
        if let Some(cursor) = self.cursor.as_deref().filter(|c| !c.is_empty()) {
            query.push(("cursor", cursor.to_string()));
        }
        if self.reverse {
            query.push(("reverse", "true".to_string()));
        }
        Ok(query)
    }
}

/// Client for a Bluesky account.
///
/// ```rust,no_run
/// use nanoatp::{BskyAgent, PostRecord, Result};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let agent = BskyAgent::new()?;
///     agent.login("", "").await?; // ATP_IDENTIFIER / ATP_PASSWORD
///     let post = agent.post(PostRecord::new("Hello World!")).await?;
///     println!("{}", post.uri);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct BskyAgent {
    http_client: Arc<XrpcHttpClient>,
    sessions: Arc<SessionManager>,
    uploader: BlobUploader,
}

impl BskyAgent {
    /// Creates an agent for `https://bsky.social` with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates an agent configured from `ATP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::with_config(Config::from_env()?)
    }

    /// Creates an agent for another service endpoint.
    pub fn with_service(service: impl Into<String>) -> Result<Self> {
        let config = Config::builder()
            .http(HttpConfig::builder().service_url(service.into()).build())
            .build();
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let http_client = Arc::new(XrpcHttpClient::with_config(config)?);
        let sessions = Arc::new(SessionManager::new(http_client.clone()));
        let uploader = BlobUploader::new(http_client.clone(), sessions.clone());

        Ok(Self {
            http_client,
            sessions,
            uploader,
        })
    }

    pub fn config(&self) -> &Config {
        self.http_client.config()
    }

    /// Logs in. Empty arguments fall back to `ATP_IDENTIFIER` / `ATP_PASSWORD`.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Session> {
        self.login_with(Credentials::new(identifier, password)).await
    }

    pub async fn login_with(&self, credentials: Credentials) -> Result<Session> {
        self.uploader.clear_cache().await;
        self.sessions.login(credentials).await
    }

    /// Reuses a session obtained earlier.
    pub async fn resume_session(&self, session: Session) -> Result<()> {
        self.uploader.clear_cache().await;
        self.sessions.resume(session).await
    }

    pub async fn refresh_session(&self) -> Result<Session> {
        self.sessions.refresh().await
    }

    pub async fn session(&self) -> Option<Session> {
        self.sessions.current().await
    }

    /// Forgets the session and cached uploads.
    pub async fn logout(&self) {
        self.sessions.clear().await;
        self.uploader.clear_cache().await;
    }

    async fn repo(&self) -> Result<String> {
        self.sessions
            .current()
            .await
            .map(|session| session.repo().to_string())
            .ok_or(AtpError::NotLoggedIn)
    }

    /// Publishes a post and returns its strong reference.
    ///
    /// `createdAt` is stamped with the current time when the record has none.
    pub async fn post(&self, record: PostRecord) -> Result<StrongRef> {
        let repo = self.repo().await?;
        record.validate()?;

        let record = if record.created_at.is_empty() {
            record.with_created_at(now_timestamp())
        } else {
            record
        };

        let input = CreateRecordInput {
            repo: &repo,
            collection: POST_COLLECTION,
            record: &record,
        };
        let http_client = &self.http_client;
        let input = &input;

        let created: StrongRef = self
            .sessions
            .authorized(|token| async move {
                http_client
                    .procedure(CREATE_RECORD, input, Some(&token))
                    .await
            })
            .await?;

        info!("Created post {}", created.uri);
        Ok(created)
    }

    /// Fetches a post, optionally pinned to a specific version.
    pub async fn get_post(
        &self,
        repo: &str,
        rkey: &str,
        cid: Option<&str>,
    ) -> Result<GetRecordOutput<PostRecord>> {
        let mut params = vec![
            ("repo", repo.to_string()),
            ("collection", POST_COLLECTION.to_string()),
            ("rkey", rkey.to_string()),
        ];
        if let Some(cid) = cid.filter(|cid| !cid.is_empty()) {
            params.push(("cid", cid.to_string()));
        }

        self.query(GET_RECORD, &params).await
    }

    /// Deletes the record named by an `at://` URI.
    pub async fn delete_post(&self, uri: &str) -> Result<()> {
        let at_uri: AtUri = uri.parse()?;
        let input = DeleteRecordInput {
            repo: &at_uri.repo,
            collection: &at_uri.collection,
            rkey: &at_uri.rkey,
        };
        let http_client = &self.http_client;
        let input = &input;

        let _: Value = self
            .sessions
            .authorized(|token| async move {
                http_client
                    .procedure(DELETE_RECORD, input, Some(&token))
                    .await
            })
            .await?;

        info!("Deleted {at_uri}");
        Ok(())
    }

    /// Lists one page of records in a collection.
    pub async fn list_records(
        &self,
        repo: &str,
        collection: &str,
        params: &ListRecordsParams,
    ) -> Result<ListRecordsOutput> {
        let mut query = vec![
            ("repo", repo.to_string()),
            ("collection", collection.to_string()),
        ];
        query.extend(params.to_query()?);

        let page: ListRecordsOutput = self.query(LIST_RECORDS, &query).await?;
        debug!(
            "Listed {} records from {repo}/{collection}",
            page.records.len()
        );
        Ok(page)
    }

    /// Resolves a handle to its DID.
    pub async fn resolve_handle(&self, handle: &str) -> Result<String> {
        let output: ResolveHandleOutput = self
            .query(RESOLVE_HANDLE, &[("handle", handle.to_string())])
            .await?;
        Ok(output.did)
    }

    async fn query<T>(&self, nsid: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let http_client = &self.http_client;
        self.sessions
            .authorized(|token| async move { http_client.query(nsid, params, Some(&token)).await })
            .await
    }

    /// Uploads raw bytes and returns the blob reference.
    pub async fn upload_blob(&self, data: Vec<u8>, encoding: &str) -> Result<BlobRef> {
        self.uploader.upload_blob(data, encoding).await
    }

    /// Downloads a remote resource within the configured size limit.
    pub async fn fetch_blob(&self, url: &str) -> Result<Download> {
        self.uploader.fetch_blob(url).await
    }

    pub async fn upload_blob_from_url(&self, url: &str, encoding: Option<&str>) -> Result<BlobRef> {
        self.uploader.upload_blob_from_url(url, encoding).await
    }

    /// Uploads a local image; the MIME type is guessed from the extension when not given.
    pub async fn upload_image(
        &self,
        path: impl AsRef<Path>,
        alt: &str,
        encoding: Option<&str>,
    ) -> Result<Image> {
        self.uploader.upload_image(path, alt, encoding).await
    }

    /// Builds a link card for `uri` through the card service.
    pub async fn upload_external(&self, uri: &str) -> Result<External> {
        self.uploader.upload_external(uri).await
    }
}

#[async_trait]
impl HandleResolver for BskyAgent {
    async fn resolve_handle(&self, handle: &str) -> Result<String> {
        BskyAgent::resolve_handle(self, handle).await
    }
}
