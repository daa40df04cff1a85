//! Auth recovery stage
//!
//! On an authentication failure, refreshes the session and replays the
//! original operation once. The replay is marked so that it cannot start a
//! second recovery cycle.
//!
//! The stored access token is noted before the operation is sent. When a
//! concurrent operation has already replaced it by the time the failure
//! comes back, the replay uses that token instead of refreshing again.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::auth::refresh::{RefreshController, RefreshOutcome};
use crate::http::error::Classification;
use crate::link::{Link, SharedLink};
use crate::operation::{GraphQlResponse, Request};
use crate::{Error, Result};

pub struct AuthRecoveryLink {
    inner: SharedLink,
    controller: RefreshController,
}

impl AuthRecoveryLink {
    pub fn new(inner: SharedLink, controller: RefreshController) -> Self {
        Self { inner, controller }
    }
}

#[async_trait]
impl Link for AuthRecoveryLink {
    async fn execute(&self, request: Request) -> Result<GraphQlResponse> {
        let sent_with = if request.attempt.is_auth_replay() {
            None
        } else {
            self.controller.credentials().access_token().await?
        };

        let error = match self.inner.execute(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        let is_auth = error
            .wire_failure()
            .map(|failure| failure.classification() == Classification::Auth)
            .unwrap_or(false);
        if !is_auth || request.attempt.is_auth_replay() {
            return Err(error);
        }

        match self.controller.refresh_from(sent_with.as_deref()).await {
            RefreshOutcome::Refreshed(_) => {
                info!(operation = %request.operation().name(), "Session refreshed, replaying operation");
                self.inner.execute(request.replay()).await
            }
            RefreshOutcome::SessionEnded { reason, .. } => {
                warn!(operation = %request.operation().name(), %reason, "Auth recovery failed");
                Err(Error::SessionEnded {
                    reason,
                    source: error.wire_failure().cloned(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh::{RefreshPayload, RefreshPolicy, RefreshTransport};
    use crate::credentials::{CredentialAccessor, MemorySecretStore, SecretStore, Session};
    use crate::error::SessionEndReason;
    use crate::http::error::{ClientError, FailureKind};
    use crate::link::testing::ScriptedLink;
    use crate::operation::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRefresh {
        calls: AtomicUsize,
        grant: bool,
    }

    #[async_trait]
    impl RefreshTransport for CountingRefresh {
        async fn refresh(&self, _token: &str) -> std::result::Result<RefreshPayload, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RefreshPayload {
                success: self.grant,
                access_token: self.grant.then(|| format!("access-{}", n)),
                refresh_token: self.grant.then(|| format!("refresh-{}", n)),
                error: (!self.grant).then(|| "invalid_grant".to_string()),
            })
        }
    }

    /// Stores another session while the first request is in flight, as a
    /// concurrent operation's refresh would
    struct RotatedMidFlight {
        inner: Arc<ScriptedLink>,
        store: Arc<MemorySecretStore>,
    }

    #[async_trait]
    impl Link for RotatedMidFlight {
        async fn execute(&self, request: Request) -> Result<GraphQlResponse> {
            if self.inner.calls() == 0 {
                self.store.set_session(&Session::new("a1", "r1")).await?;
            }
            self.inner.execute(request).await
        }
    }

    fn unauthenticated() -> ClientError {
        ClientError {
            kind: FailureKind::GraphQl,
            status_code: None,
            code: Some("UNAUTHENTICATED".to_string()),
            message: "token expired".to_string(),
            details: None,
            retry_after: None,
        }
    }

    fn setup(
        script: Vec<std::result::Result<GraphQlResponse, ClientError>>,
        grant: bool,
    ) -> (AuthRecoveryLink, Arc<ScriptedLink>, Arc<CountingRefresh>) {
        let inner = ScriptedLink::new(script);
        let refresh = Arc::new(CountingRefresh {
            calls: AtomicUsize::new(0),
            grant,
        });
        let store = MemorySecretStore::with_session(Session::new("a0", "r0"));
        let controller = RefreshController::new(
            CredentialAccessor::new(Arc::new(store)),
            refresh.clone(),
            RefreshPolicy::default(),
        );
        (AuthRecoveryLink::new(inner.clone(), controller), inner, refresh)
    }

    #[tokio::test]
    async fn test_auth_failure_refreshes_and_replays_once() {
        let (link, inner, refresh) = setup(vec![Err(unauthenticated()), Ok(GraphQlResponse::default())], true);

        link.execute(Request::new(Operation::query("{ me { id } }"))).await.unwrap();

        assert_eq!(refresh.calls.load(Ordering::SeqCst), 1);
        let requests = inner.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].attempt.is_auth_replay());
        assert!(requests[1].attempt.is_auth_replay());
    }

    #[tokio::test]
    async fn test_token_replaced_meanwhile_is_replayed_without_refresh() {
        let inner = ScriptedLink::new(vec![Err(unauthenticated()), Ok(GraphQlResponse::default())]);
        let store = Arc::new(MemorySecretStore::with_session(Session::new("a0", "r0")));
        let refresh = Arc::new(CountingRefresh {
            calls: AtomicUsize::new(0),
            grant: true,
        });
        let controller = RefreshController::new(
            CredentialAccessor::new(store.clone()),
            refresh.clone(),
            RefreshPolicy::default(),
        );
        let link = AuthRecoveryLink::new(
            Arc::new(RotatedMidFlight {
                inner: inner.clone(),
                store: store.clone(),
            }),
            controller,
        );

        link.execute(Request::new(Operation::query("{ me { id } }"))).await.unwrap();

        assert_eq!(refresh.calls.load(Ordering::SeqCst), 0);
        assert_eq!(inner.calls(), 2);
        assert!(inner.requests()[1].attempt.is_auth_replay());
        assert_eq!(store.get_refresh_token().await.unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_replay_failing_with_auth_is_not_recovered_again() {
        let (link, inner, refresh) = setup(
            vec![Err(unauthenticated()), Err(unauthenticated()), Ok(GraphQlResponse::default())],
            true,
        );

        let error = link
            .execute(Request::new(Operation::query("{ me { id } }")))
            .await
            .unwrap_err();

        assert_eq!(error.classification(), Some(Classification::Auth));
        assert_eq!(inner.calls(), 2);
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_ends_session() {
        let (link, inner, _) = setup(vec![Err(unauthenticated())], false);

        let error = link
            .execute(Request::new(Operation::mutation("mutation { logChange }")))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::SessionEnded { reason: SessionEndReason::Rejected, source: Some(_) }
        ));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_failures_pass_through() {
        let (link, inner, refresh) = setup(vec![Err(ClientError::network("reset"))], true);

        let error = link
            .execute(Request::new(Operation::query("{ me { id } }")))
            .await
            .unwrap_err();

        assert_eq!(error.classification(), Some(Classification::TransientNetwork));
        assert_eq!(inner.calls(), 1);
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 0);
    }
}
