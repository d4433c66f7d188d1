//! Session management: login, refresh and the in-memory session slot.

use crate::config::Credentials;
use crate::error::{AtpError, Result};
use crate::http::XrpcHttpClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const CREATE_SESSION: &str = "com.atproto.server.createSession";
const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";

/// Identity and token material handed out by `createSession`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub access_jwt: String,
    #[serde(default)]
    pub refresh_jwt: String,
}

impl Session {
    /// Checks that every field needed for later calls is present.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("did", &self.did),
            ("handle", &self.handle),
            ("accessJwt", &self.access_jwt),
            ("refreshJwt", &self.refresh_jwt),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AtpError::AuthenticationFailed {
                reason: format!("session is missing {}", missing.join(", ")),
            })
        }
    }

    /// Repository records are written to: the DID, or the handle without one.
    pub fn repo(&self) -> &str {
        if self.did.is_empty() {
            &self.handle
        } else {
            &self.did
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("access_jwt", &"<redacted>")
            .field("refresh_jwt", &"<redacted>")
            .finish()
    }
}

/// Output of `refreshSession`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshSessionOutput {
    access_jwt: String,
    refresh_jwt: String,
    #[serde(default)]
    did: Option<String>,
    #[serde(default)]
    handle: Option<String>,
}

/// Owns the current session and serializes refreshes.
#[derive(Debug)]
pub struct SessionManager {
    http_client: Arc<XrpcHttpClient>,
    session: Arc<RwLock<Option<Session>>>,
    refresh_lock: Arc<Mutex<()>>,
}

impl SessionManager {
    pub fn new(http_client: Arc<XrpcHttpClient>) -> Self {
        Self {
            http_client,
            session: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a session. Empty credential fields fall back to the environment.
    ///
    /// On failure any previous session is dropped.
    pub async fn login(&self, credentials: Credentials) -> Result<Session> {
        let credentials = credentials.or_env();
        info!("Creating session for {}", credentials.identifier);

        let body = serde_json::json!({
            "identifier": credentials.identifier,
            "password": credentials.password,
        });

        let result = self
            .http_client
            .procedure::<_, Session>(CREATE_SESSION, &body, None)
            .await
            .and_then(|session| session.validate().map(|_| session));

        match result {
            Ok(session) => {
                *self.session.write().await = Some(session.clone());
                info!("Logged in as {} ({})", session.handle, session.did);
                Ok(session)
            }
            Err(e) => {
                self.clear().await;
                warn!("Login failed: {e}");
                Err(e)
            }
        }
    }

    /// Installs a previously obtained session without a network call.
    pub async fn resume(&self, session: Session) -> Result<()> {
        session.validate()?;
        debug!("Resuming session for {}", session.handle);
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Gets a snapshot of the current session.
    pub async fn current(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Gets the current access JWT.
    pub async fn access_token(&self) -> Result<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.access_jwt.clone())
            .ok_or(AtpError::NotLoggedIn)
    }

    /// Runs `call` with the current access JWT.
    ///
    /// When the service answers `ExpiredToken` the session is refreshed and the
    /// call is replayed exactly once with the new token.
    pub async fn authorized<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.access_token().await?;
        match call(token.clone()).await {
            Err(e) if e.is_expired_token() => {
                debug!("Access token expired, refreshing");
                let token = self.refresh_after_expiry(&token).await?;
                call(token).await
            }
            result => result,
        }
    }

    /// Exchanges the refresh JWT for a new token pair.
    pub async fn refresh(&self) -> Result<Session> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.current().await.ok_or(AtpError::NotLoggedIn)?;
        self.refresh_locked(current).await
    }

    /// Refreshes after `expired_access` was rejected and returns a usable access JWT.
    ///
    /// A caller that lost the race to another refresh gets the new token
    /// without a second round trip.
    pub async fn refresh_after_expiry(&self, expired_access: &str) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.current().await.ok_or(AtpError::NotLoggedIn)?;

        if current.access_jwt != expired_access {
            debug!("Session was already refreshed");
            return Ok(current.access_jwt);
        }

        Ok(self.refresh_locked(current).await?.access_jwt)
    }

    async fn refresh_locked(&self, current: Session) -> Result<Session> {
        info!("Refreshing session for {}", current.handle);

        let output = match self
            .http_client
            .procedure_without_input::<RefreshSessionOutput>(
                REFRESH_SESSION,
                Some(&current.refresh_jwt),
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Session refresh failed, dropping session: {e}");
                self.clear().await;
                return Err(e);
            }
        };

        let refreshed = Session {
            did: output.did.unwrap_or(current.did),
            handle: output.handle.unwrap_or(current.handle),
            email: current.email,
            access_jwt: output.access_jwt,
            refresh_jwt: output.refresh_jwt,
        };
        if let Err(e) = refreshed.validate() {
            warn!("Refreshed session is incomplete, dropping session: {e}");
            self.clear().await;
            return Err(e);
        }

        *self.session.write().await = Some(refreshed.clone());
        info!("Successfully refreshed session");
        Ok(refreshed)
    }

    /// Drops the current session.
    pub async fn clear(&self) {
        *self.session.write().await = None;
    }
}
