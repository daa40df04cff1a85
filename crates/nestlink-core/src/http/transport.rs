//! HTTP transport stage
//!
//! The innermost link: POSTs the GraphQL body to the endpoint and turns the
//! response into either an envelope or a classified failure.

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use tracing::{debug, instrument};
use url::Url;

use crate::http::error::ClientError;
use crate::http::timeout::TimeoutConfig;
use crate::link::Link;
use crate::operation::{GraphQlResponse, Request};
use crate::{Error, Result};

/// GraphQL-over-HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    endpoint: Url,
    timeouts: TimeoutConfig,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeouts: TimeoutConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(timeouts.connect())
            .build()
            .map_err(|e| Error::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e.into()),
            })?;

        Ok(Self {
            client,
            endpoint,
            timeouts,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, request: &Request) -> std::result::Result<GraphQlResponse, ClientError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(request.headers.clone())
            .json(&request.operation().body())
            .send()
            .await
            .map_err(ClientError::from_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::from_response(response).await);
        }

        let envelope: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| ClientError::decode(format!("invalid GraphQL response: {}", e)))?;

        debug!(status = status.as_u16(), errors = envelope.errors.len(), "Received response");
        envelope.into_result()
    }
}

#[async_trait]
impl Link for HttpTransport {
    #[instrument(
        skip(self, request),
        fields(
            operation = %request.operation().name(),
            kind = %request.operation().kind,
            attempt = request.attempt.attempt_number()
        )
    )]
    async fn execute(&self, request: Request) -> Result<GraphQlResponse> {
        let deadline = self.timeouts.for_kind(request.operation().kind);

        match tokio::time::timeout(deadline, self.send(&request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(failure)) => Err(Error::operation(request.operation().name(), failure)),
            Err(_) => {
                debug!(deadline_ms = deadline.as_millis() as u64, "Attempt timed out");
                Err(Error::operation(
                    request.operation().name(),
                    ClientError::timeout(deadline),
                ))
            }
        }
    }
}
