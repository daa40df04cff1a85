//! Query command handler

use crate::cli::QueryArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use nestlink_core::OperationKind;
use tracing::{debug, info, instrument};

use super::utils::{build_client, build_operation, parse_variables, read_document};

/// Handle the query command
#[instrument(skip(config, output), fields(file = %args.document.display()))]
pub async fn handle_query(args: QueryArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let _timer = Timer::new("query_command");

    let document = read_document(&args.document)?;
    let variables = parse_variables(args.vars.as_deref())?;
    let operation = build_operation(document, variables, args.operation_name, args.mutation);
    if operation.kind == OperationKind::Subscription {
        return Err(Error::invalid_args(
            "the document is a subscription; use 'nestlink subscribe'",
        ));
    }

    let client = build_client(config)?;
    debug!(endpoint = %client.endpoint(), operation = %operation.name(), "Executing operation");

    let spinner = output.spinner(&format!("Running {}...", operation.kind));
    let result = client.execute(operation).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let response = result?;
    info!(errors = response.errors.len(), "Operation completed");
    output.response(&response)
}
