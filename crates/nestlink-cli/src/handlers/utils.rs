//! Shared utilities for command handlers

use crate::config::Config;
use crate::error::{Error, Result};
use nestlink_core::{FileSecretStore, NestClient, Operation, OperationKind};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Read a GraphQL document from disk
pub fn read_document(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let document = fs::read_to_string(path)?;
    if document.trim().is_empty() {
        return Err(Error::InvalidFormat {
            path: path.to_path_buf(),
            expected: "GraphQL document".to_string(),
        });
    }
    Ok(document)
}

/// Parse `--vars`, which must be a JSON object
pub fn parse_variables(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    match serde_json::from_str::<Value>(raw)? {
        value @ Value::Object(_) => Ok(value),
        _ => Err(Error::invalid_args("--vars must be a JSON object")),
    }
}

/// Build an operation from a document, inferring its kind
pub fn build_operation(
    document: String,
    variables: Value,
    operation_name: Option<String>,
    force_mutation: bool,
) -> Operation {
    let mut operation = Operation::from_document(document).with_variables(variables);
    if force_mutation {
        operation.kind = OperationKind::Mutation;
    }
    match operation_name {
        Some(name) => operation.with_operation_name(name),
        None => operation,
    }
}

/// Client backed by the session file from the configuration
pub fn build_client(config: &Config) -> Result<NestClient> {
    let store = FileSecretStore::new(config.session_path());
    Ok(NestClient::new(config.client.clone(), Arc::new(store))?)
}
