//! Pipeline stages
//!
//! Each stage wraps the next one and sees every request/response pair that
//! passes through it. Stages are composed outermost-first by the client.

use async_trait::async_trait;
use std::sync::Arc;

use crate::operation::{GraphQlResponse, Request};
use crate::Result;

/// One stage of the request pipeline
#[async_trait]
pub trait Link: Send + Sync {
    /// Process a request, usually by delegating to the next stage
    async fn execute(&self, request: Request) -> Result<GraphQlResponse>;
}

/// A stage shared between the client and the stage that wraps it
pub type SharedLink = Arc<dyn Link>;
