//! The client facade
//!
//! [`NestClient`] assembles the request pipeline, outermost first:
//!
//! ```text
//! AuthRecoveryLink -> RetryLink -> AuthLink -> HttpTransport
//! ```
//!
//! and routes subscriptions to the [`SubscriptionManager`] instead. The
//! refresh mutation bypasses the pipeline and goes straight to the transport.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument};
use url::Url;

use crate::auth::decorator::AuthLink;
use crate::auth::refresh::{GraphQlRefreshTransport, RefreshController, RefreshOutcome, RefreshTransport};
use crate::config::ClientConfig;
use crate::credentials::{CredentialAccessor, MemorySecretStore, SecretStore, Session};
use crate::http::recovery::AuthRecoveryLink;
use crate::http::retry::RetryLink;
use crate::http::transport::HttpTransport;
use crate::link::SharedLink;
use crate::operation::{GraphQlResponse, Operation, OperationKind, Request};
use crate::subscription::{ConnectionState, SocketConnector, SubscriptionManager, SubscriptionStream, TungsteniteConnector};
use crate::{Error, Result};

/// Where an operation is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Http,
    Subscription,
}

impl Route {
    pub fn for_operation(operation: &Operation) -> Self {
        match operation.kind {
            OperationKind::Subscription => Route::Subscription,
            OperationKind::Query | OperationKind::Mutation => Route::Http,
        }
    }
}

/// Result of [`NestClient::dispatch`]
#[derive(Debug)]
pub enum Dispatch {
    Response(GraphQlResponse),
    Stream(SubscriptionStream),
}

/// Builder for [`NestClient`]
pub struct NestClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn SecretStore>>,
    connector: Option<Arc<dyn SocketConnector>>,
    refresh_transport: Option<Arc<dyn RefreshTransport>>,
    transport: Option<SharedLink>,
}

impl NestClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            store: None,
            connector: None,
            refresh_transport: None,
            transport: None,
        }
    }

    /// Secret store holding the session (in-memory when not set)
    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn socket_connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the `RefreshToken` mutation with another refresh call
    pub fn refresh_transport(mut self, transport: Arc<dyn RefreshTransport>) -> Self {
        self.refresh_transport = Some(transport);
        self
    }

    /// Replace the HTTP stage at the bottom of the pipeline
    pub fn transport(mut self, transport: SharedLink) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<NestClient> {
        let config = self.config;
        config.validate()?;

        let endpoint = config.endpoint_url()?;
        let subscription_url = config.subscription_url()?;
        let headers = config.compliance_headers.to_header_map()?;
        let buffer = config.refresh_buffer();

        let transport: SharedLink = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(endpoint.clone(), config.timeouts.clone())?),
        };
        let refresh_transport = self.refresh_transport.unwrap_or_else(|| {
            Arc::new(GraphQlRefreshTransport::new(Arc::clone(&transport), headers.clone()))
        });

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySecretStore::new()));
        let controller = RefreshController::new(
            CredentialAccessor::new(store),
            refresh_transport,
            config.refresh.clone(),
        );

        let auth: SharedLink = Arc::new(AuthLink::new(transport, controller.clone(), headers, buffer));
        let retry: SharedLink = Arc::new(RetryLink::new(auth, config.retry.clone()));
        let pipeline: SharedLink = Arc::new(AuthRecoveryLink::new(retry, controller.clone()));

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector));
        let subscriptions = SubscriptionManager::new(
            subscription_url,
            connector,
            controller.clone(),
            buffer,
            config.compliance_headers.clone(),
            config.reconnect.clone(),
        );

        info!(endpoint = %endpoint, subscriptions = %subscriptions.url(), "Client ready");
        Ok(NestClient {
            config,
            endpoint,
            pipeline,
            controller,
            subscriptions,
        })
    }
}

/// Resilient GraphQL client: one request pipeline plus one subscription socket
#[derive(Clone)]
pub struct NestClient {
    config: ClientConfig,
    endpoint: Url,
    pipeline: SharedLink,
    controller: RefreshController,
    subscriptions: SubscriptionManager,
}

impl NestClient {
    pub fn builder(config: ClientConfig) -> NestClientBuilder {
        NestClientBuilder::new(config)
    }

    /// Client over the given secret store with the default transports
    pub fn new(config: ClientConfig, store: Arc<dyn SecretStore>) -> Result<Self> {
        Self::builder(config).secret_store(store).build()
    }

    /// Run a query or mutation through the pipeline
    #[instrument(skip(self, operation), fields(operation = %operation.name(), kind = %operation.kind))]
    pub async fn execute(&self, operation: Operation) -> Result<GraphQlResponse> {
        if Route::for_operation(&operation) == Route::Subscription {
            return Err(Error::InvalidOperation {
                message: format!("'{}' is a subscription; use subscribe", operation.name()),
            });
        }
        self.pipeline.execute(Request::new(operation)).await
    }

    /// Start a subscription on the shared socket
    pub fn subscribe(&self, operation: Operation) -> Result<SubscriptionStream> {
        self.subscriptions.subscribe(operation)
    }

    /// Send any operation down the transport its kind calls for
    pub async fn dispatch(&self, operation: Operation) -> Result<Dispatch> {
        match Route::for_operation(&operation) {
            Route::Http => self.execute(operation).await.map(Dispatch::Response),
            Route::Subscription => self.subscribe(operation).map(Dispatch::Stream),
        }
    }

    /// Store a session obtained from an external login flow
    pub async fn sign_in(&self, session: Session) -> Result<()> {
        self.controller.credentials().persist(&session).await?;
        info!("Signed in");
        Ok(())
    }

    /// Drop the session and close the subscription socket
    pub async fn sign_out(&self) -> Result<()> {
        self.subscriptions.stop().await;
        self.subscriptions.restart();
        self.controller.credentials().clear().await
    }

    /// A usable access token, refreshed first if it is about to expire
    pub async fn ensure_valid_token(&self) -> Result<Option<String>> {
        self.controller
            .ensure_valid_token(self.config.refresh_buffer())
            .await
    }

    /// Force a refresh, joining one already in flight
    pub async fn refresh(&self) -> RefreshOutcome {
        self.controller.refresh().await
    }

    pub async fn session(&self) -> Result<Option<Session>> {
        self.controller.credentials().session().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.subscriptions.state()
    }

    pub fn connection_states(&self) -> watch::Receiver<ConnectionState> {
        self.subscriptions.state_changes()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::expiry::test_token;
    use crate::auth::refresh::RefreshPayload;
    use crate::http::error::{Classification, ClientError, FailureKind};
    use crate::link::testing::ScriptedLink;
    use crate::subscription::SocketConnection;
    use async_trait::async_trait;
    use reqwest::header::AUTHORIZATION;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RotatingRefresh {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RefreshTransport for RotatingRefresh {
        async fn refresh(&self, _token: &str) -> std::result::Result<RefreshPayload, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RefreshPayload {
                success: true,
                access_token: Some(fresh_token(n as i64)),
                refresh_token: Some(format!("refresh-{}", n)),
                error: None,
            })
        }
    }

    struct Unreachable;

    #[async_trait]
    impl SocketConnector for Unreachable {
        async fn connect(&self, _url: &Url) -> std::result::Result<SocketConnection, ClientError> {
            Err(ClientError::network("connection refused"))
        }
    }

    /// A token valid for an hour, distinguishable by `salt`
    fn fresh_token(salt: i64) -> String {
        test_token(chrono::Utc::now().timestamp() + 3600 + salt)
    }

    fn client(link: Arc<ScriptedLink>) -> (NestClient, Arc<RotatingRefresh>) {
        let refresh = Arc::new(RotatingRefresh {
            calls: AtomicUsize::new(0),
        });
        let client = NestClient::builder(ClientConfig::default())
            .transport(link)
            .refresh_transport(refresh.clone())
            .socket_connector(Arc::new(Unreachable))
            .build()
            .unwrap();
        (client, refresh)
    }

    fn unauthenticated() -> ClientError {
        ClientError {
            kind: FailureKind::GraphQl,
            status_code: None,
            code: Some("UNAUTHENTICATED".to_string()),
            message: "jwt expired".to_string(),
            details: None,
            retry_after: None,
        }
    }

    #[test]
    fn test_route_by_kind() {
        assert_eq!(Route::for_operation(&Operation::query("{ a }")), Route::Http);
        assert_eq!(Route::for_operation(&Operation::mutation("mutation { a }")), Route::Http);
        assert_eq!(
            Route::for_operation(&Operation::from_document("subscription OnEvent { event }")),
            Route::Subscription
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_not_retried_through_pipeline() {
        let link = ScriptedLink::new(vec![Err(ClientError::network("reset")), Ok(GraphQlResponse::default())]);
        let (client, _) = client(link.clone());

        let error = client
            .execute(Operation::mutation("mutation { logChange }"))
            .await
            .unwrap_err();

        assert_eq!(error.classification(), Some(Classification::TransientNetwork));
        assert_eq!(link.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_retried_through_pipeline() {
        let link = ScriptedLink::new(vec![Err(ClientError::network("reset")), Ok(GraphQlResponse::default())]);
        let (client, _) = client(link.clone());

        client.execute(Operation::query("{ supplies { id } }")).await.unwrap();
        assert_eq!(link.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_replays_with_new_token() {
        let link = ScriptedLink::new(vec![Err(unauthenticated()), Ok(GraphQlResponse::default())]);
        let (client, refresh) = client(link.clone());
        let original = fresh_token(0);
        client.sign_in(Session::new(original.clone(), "refresh-0")).await.unwrap();

        client.execute(Operation::query("{ me { id } }")).await.unwrap();

        assert_eq!(refresh.calls.load(Ordering::SeqCst), 1);
        let requests = link.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            format!("Bearer {}", original)
        );
        let rotated = client.session().await.unwrap().unwrap();
        assert_ne!(rotated.access_token, original);
        assert_eq!(rotated.refresh_token, "refresh-1");
        assert_eq!(
            requests[1].headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            format!("Bearer {}", rotated.access_token)
        );
        assert!(requests[1].headers.contains_key("x-client-name"));
    }

    #[tokio::test]
    async fn test_subscription_is_diverted() {
        let link = ScriptedLink::new(vec![]);
        let (client, _) = client(link.clone());
        let subscription = Operation::subscription("subscription { stockLevel }");

        let error = client.execute(subscription.clone()).await.unwrap_err();
        assert!(matches!(error, Error::InvalidOperation { .. }));

        let dispatched = client.dispatch(subscription).await.unwrap();
        assert!(matches!(dispatched, Dispatch::Stream(_)));
        assert_eq!(link.calls(), 0);

        client.sign_out().await.unwrap();
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let (client, refresh) = client(ScriptedLink::new(vec![]));
        let token = fresh_token(0);

        client.sign_in(Session::new(token.clone(), "refresh-0")).await.unwrap();
        assert_eq!(client.ensure_valid_token().await.unwrap(), Some(token));

        client.sign_out().await.unwrap();
        assert_eq!(client.ensure_valid_token().await.unwrap(), None);
        assert!(client.session().await.unwrap().is_none());
        assert_eq!(client.connection_state(), ConnectionState::Idle);
        assert_eq!(refresh.calls.load(Ordering::SeqCst), 0);
    }
}
