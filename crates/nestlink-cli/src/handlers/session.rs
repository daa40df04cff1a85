//! Session command handler

use crate::cli::{SessionAction, SessionArgs, SessionSetArgs};
use crate::config::Config;
use crate::error::Result;
use crate::output::OutputWriter;
use nestlink_core::{CredentialAccessor, FileSecretStore, Session};
use std::sync::Arc;

/// Handle the session command
pub async fn handle_session(args: SessionArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let credentials = CredentialAccessor::new(Arc::new(FileSecretStore::new(config.session_path())));

    match args.action {
        SessionAction::Set(set) => {
            credentials.persist(&session_from_args(set)).await?;
            output.success(&format!("Session stored in {}", config.session_path().display()))
        }
        SessionAction::Show => {
            let session = credentials.session().await?;
            output.session(session.as_ref())
        }
        SessionAction::Clear => {
            credentials.clear().await?;
            output.success("Session cleared")
        }
    }
}

fn session_from_args(args: SessionSetArgs) -> Session {
    let mut session = Session::new(args.access_token, args.refresh_token);
    if let Some(expires_at) = args.expires_at {
        session.expires_at_epoch_seconds = expires_at;
    }
    session
}
