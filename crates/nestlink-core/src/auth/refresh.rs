//! Coordinated token refresh
//!
//! At most one refresh runs at a time. The in-flight refresh is a shared
//! future kept in a single slot: callers that arrive while it runs clone and
//! await it, so they all observe the same token or the same failure. The job
//! empties the slot when it settles so that the next caller starts fresh.
//!
//! The job itself runs on a spawned task, which keeps the session write
//! intact even if every caller that was waiting on it goes away.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::expiry::is_expiring_soon;
use crate::credentials::{redact_token, CredentialAccessor, Session};
use crate::error::SessionEndReason;
use crate::http::error::{Classification, ClientError};
use crate::link::SharedLink;
use crate::operation::{Operation, Request};
use crate::{Error, Result};

const REFRESH_MUTATION: &str = "mutation RefreshToken($refreshToken: String!) {\n  refreshToken(refreshToken: $refreshToken) {\n    success\n    accessToken\n    refreshToken\n    error\n  }\n}";

/// Output of the remote refresh mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub success: bool,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RefreshPayload {
    /// The session this payload grants, if any.
    ///
    /// Servers that do not rotate refresh tokens leave `refreshToken` empty;
    /// the current one is kept in that case.
    fn into_session(self, current_refresh_token: &str) -> Option<Session> {
        if !self.success {
            return None;
        }
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| current_refresh_token.to_string());
        Some(Session::new(access_token, refresh_token))
    }
}

/// The remote refresh call
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<RefreshPayload, ClientError>;
}

/// Backoff between refresh attempts that failed transiently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Delay before each additional attempt; its length is the retry budget
    pub retry_delays_ms: Vec<u64>,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            retry_delays_ms: vec![1_000, 3_000],
        }
    }
}

impl RefreshPolicy {
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.retry_delays_ms.iter().map(|ms| Duration::from_millis(*ms))
    }
}

/// How a refresh job settled
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A new access token was persisted
    Refreshed(String),
    /// The session is gone; callers must treat the user as signed out
    SessionEnded {
        reason: SessionEndReason,
        failure: Option<ClientError>,
    },
}

impl RefreshOutcome {
    fn ended(reason: SessionEndReason, failure: Option<ClientError>) -> Self {
        Self::SessionEnded { reason, failure }
    }

    /// The refreshed access token, if there is one
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Refreshed(token) => Some(token),
            Self::SessionEnded { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Refreshed(token) => Ok(token),
            Self::SessionEnded { reason, failure } => Err(Error::SessionEnded {
                reason,
                source: failure,
            }),
        }
    }
}

type RefreshJob = Shared<BoxFuture<'static, RefreshOutcome>>;

struct Inner {
    credentials: CredentialAccessor,
    transport: Arc<dyn RefreshTransport>,
    policy: RefreshPolicy,
    job: Mutex<Option<RefreshJob>>,
}

/// Keeps the stored access token valid, refreshing it at most once at a time
#[derive(Clone)]
pub struct RefreshController {
    inner: Arc<Inner>,
}

impl RefreshController {
    pub fn new(
        credentials: CredentialAccessor,
        transport: Arc<dyn RefreshTransport>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                transport,
                policy,
                job: Mutex::new(None),
            }),
        }
    }

    pub fn credentials(&self) -> &CredentialAccessor {
        &self.inner.credentials
    }

    /// Return a usable access token, refreshing it first if it expires within
    /// `buffer`. `None` means there is no session.
    pub async fn ensure_valid_token(&self, buffer: Duration) -> Result<Option<String>> {
        let Some(token) = self.inner.credentials.access_token().await? else {
            debug!("No stored access token");
            return Ok(None);
        };

        if !is_expiring_soon(&token, buffer) {
            return Ok(Some(token));
        }

        debug!(access_token = %redact_token(&token), "Access token expiring, refreshing");
        Ok(self.refresh_from(Some(&token)).await.token().map(str::to_string))
    }

    /// Refresh the session, joining the in-flight refresh if there is one
    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresh_from(None).await
    }

    /// Refresh a session whose access token `stale` turned out unusable.
    ///
    /// A caller can read the old token just before a refresh finishes and
    /// reach this point after the job has settled. If the stored token no
    /// longer matches `stale`, it is returned as is and no remote call is
    /// made. `None` always refreshes.
    #[instrument(skip_all)]
    pub async fn refresh_from(&self, stale: Option<&str>) -> RefreshOutcome {
        self.job(stale.map(str::to_string)).await
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().is_some()
    }

    fn job(&self, stale: Option<String>) -> RefreshJob {
        let mut slot = self.inner.slot();
        if let Some(job) = slot.as_ref() {
            debug!("Joining in-flight token refresh");
            return job.clone();
        }

        // The slot stays locked until the new job is stored, so the spawned
        // task cannot empty it first.
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let outcome = match inner.replaced_token(stale.as_deref()).await {
                Ok(Some(current)) => {
                    debug!("Access token already replaced, skipping refresh");
                    RefreshOutcome::Refreshed(current)
                }
                Ok(None) => inner.run().await,
                Err(e) => {
                    error!(error = %e, "Could not read access token");
                    RefreshOutcome::ended(SessionEndReason::StorageFailure, None)
                }
            };
            *inner.slot() = None;
            outcome
        });

        let inner = Arc::clone(&self.inner);
        let job = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    *inner.slot() = None;
                    error!(error = %e, "Token refresh task failed");
                    RefreshOutcome::ended(
                        SessionEndReason::RefreshExhausted,
                        Some(ClientError::network(format!("refresh task failed: {}", e))),
                    )
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(job.clone());
        job
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<RefreshJob>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored access token, when it is no longer the `stale` one
    async fn replaced_token(&self, stale: Option<&str>) -> Result<Option<String>> {
        let Some(stale) = stale else {
            return Ok(None);
        };
        let current = self.credentials.access_token().await?;
        Ok(current.filter(|token| token != stale))
    }

    async fn run(&self) -> RefreshOutcome {
        let refresh_token = match self.credentials.refresh_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("No refresh token stored, ending session");
                self.end_session().await;
                return RefreshOutcome::ended(SessionEndReason::NoCredentials, None);
            }
            Err(e) => {
                error!(error = %e, "Could not read refresh token");
                return RefreshOutcome::ended(SessionEndReason::StorageFailure, None);
            }
        };

        let mut delays = self.policy.delays();
        let mut attempt = 1u32;
        loop {
            match self.transport.refresh(&refresh_token).await {
                Ok(payload) => {
                    let reason = payload.error.clone();
                    return match payload.into_session(&refresh_token) {
                        Some(session) => self.persist(session).await,
                        None => {
                            warn!(reason = reason.as_deref().unwrap_or("unknown"), "Refresh token rejected");
                            self.end_session().await;
                            RefreshOutcome::ended(SessionEndReason::Rejected, None)
                        }
                    };
                }
                Err(failure) => match failure.classification() {
                    Classification::Auth | Classification::ClientFatal => {
                        warn!(error = %failure, "Refresh token rejected");
                        self.end_session().await;
                        return RefreshOutcome::ended(SessionEndReason::Rejected, Some(failure));
                    }
                    _ => match delays.next() {
                        Some(delay) => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %failure,
                                "Token refresh failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            error!(attempt, error = %failure, "Token refresh exhausted its retries");
                            self.end_session().await;
                            return RefreshOutcome::ended(
                                SessionEndReason::RefreshExhausted,
                                Some(failure),
                            );
                        }
                    },
                },
            }
        }
    }

    async fn persist(&self, session: Session) -> RefreshOutcome {
        match self.credentials.persist(&session).await {
            Ok(()) => {
                info!(expires_at = session.expires_at_epoch_seconds, "Access token refreshed");
                RefreshOutcome::Refreshed(session.access_token)
            }
            Err(e) => {
                error!(error = %e, "Could not persist refreshed session");
                RefreshOutcome::ended(SessionEndReason::StorageFailure, None)
            }
        }
    }

    async fn end_session(&self) {
        if let Err(e) = self.credentials.clear().await {
            error!(error = %e, "Could not clear session");
        }
    }
}

/// Refresh transport that sends the `RefreshToken` mutation through a link.
///
/// The link is normally the bare HTTP transport so the refresh call never
/// re-enters the auth stages.
pub struct GraphQlRefreshTransport {
    link: SharedLink,
    headers: HeaderMap,
}

impl GraphQlRefreshTransport {
    pub fn new(link: SharedLink, headers: HeaderMap) -> Self {
        Self { link, headers }
    }
}

#[async_trait]
impl RefreshTransport for GraphQlRefreshTransport {
    async fn refresh(&self, refresh_token: &str) -> std::result::Result<RefreshPayload, ClientError> {
        let operation = Operation::mutation(REFRESH_MUTATION)
            .with_variables(json!({ "refreshToken": refresh_token }))
            .with_operation_name("RefreshToken");
        let request = Request::new(operation).with_headers(self.headers.clone());

        let response = self.link.execute(request).await.map_err(|e| match e {
            Error::Operation { source, .. } => source,
            other => ClientError::network(other.to_string()),
        })?;

        let payload = response
            .data
            .and_then(|mut data| data.get_mut("refreshToken").map(serde_json::Value::take))
            .ok_or_else(|| ClientError::decode("refresh response has no refreshToken field"))?;

        serde_json::from_value(payload)
            .map_err(|e| ClientError::decode(format!("invalid refresh payload: {}", e)))
    }
}
