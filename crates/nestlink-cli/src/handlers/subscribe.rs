//! Subscribe command handler

use crate::cli::SubscribeArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use futures::StreamExt;
use nestlink_core::OperationKind;
use tracing::{info, instrument, warn};

use super::utils::{build_client, build_operation, parse_variables, read_document};

/// Handle the subscribe command.
///
/// Prints each payload as it arrives until the server completes the
/// subscription, `--limit` payloads were received, or Ctrl-C.
#[instrument(skip(config, output), fields(file = %args.document.display()))]
pub async fn handle_subscribe(
    args: SubscribeArgs,
    config: &Config,
    output: &mut OutputWriter,
) -> Result<()> {
    let document = read_document(&args.document)?;
    let variables = parse_variables(args.vars.as_deref())?;
    let operation = build_operation(document, variables, None, false);
    if operation.kind != OperationKind::Subscription {
        return Err(Error::invalid_args(
            "the document is not a subscription; use 'nestlink query'",
        ));
    }

    let client = build_client(config)?;
    output.info(&format!("Subscribing via {}", client.subscriptions().url()))?;
    let mut stream = client.subscribe(operation)?;

    let mut received = 0usize;
    let outcome = loop {
        if args.limit.is_some_and(|limit| received >= limit) {
            break Ok(());
        }
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(payload)) => {
                    received += 1;
                    output.response(&payload)?;
                }
                Some(Err(e)) => break Err(Error::from(e)),
                None => {
                    output.info("Subscription completed")?;
                    break Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break Ok(());
            }
        }
    };

    drop(stream);
    client.subscriptions().stop().await;
    info!(received, "Subscription finished");
    outcome
}
