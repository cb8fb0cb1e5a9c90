//! Operation schema
//!
//! [`SchemaExecutor`] evaluates query and mutation documents against one
//! [`ExecutionContext`]. Results follow the usual graph response shape:
//! `data` holds whatever resolved, `errors` lists field-scoped failures with
//! their paths and an `extensions.code`.

pub mod document;
pub mod execution;
pub mod lazy;
mod resolvers;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::context::ExecutionContext;
use crate::metrics::METRICS;
pub use document::{parse, Document, DocumentError, OperationKind};
pub use execution::{
    Arguments, ErrorCode, ExecutionError, FieldError, FieldResult, ObjectResolver, PathSegment,
    Resolved,
};
pub use lazy::Lazy;
pub use resolvers::{MutationRoot, QueryRoot, FIRMWARE_INDICATOR};

use execution::{input_to_json, Engine};

/// A query or mutation document with its variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl OperationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        OperationRequest {
            query: query.into(),
            variables: Map::new(),
            operation_name: None,
        }
    }

    /// Add one variable.
    pub fn variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    pub fn operation_name(mut self, name: &str) -> Self {
        self.operation_name = Some(name.to_string());
        self
    }
}

/// Response to an [`OperationRequest`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ExecutionError>,
}

impl ExecutionResult {
    /// Failure before execution started; there is no `data`.
    pub fn request_error(code: ErrorCode, message: impl Into<String>) -> Self {
        ExecutionResult {
            data: None,
            errors: vec![ExecutionError::new(code, message)],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Value at a dotted path below `data`, e.g. `edgeTxRelease.firmwareBundle.url`.
    pub fn pointer(&self, dotted: &str) -> Option<&Value> {
        let pointer = format!("/{}", dotted.replace('.', "/"));
        self.data.as_ref()?.pointer(&pointer)
    }
}

/// Evaluates operations against a single execution context.
#[derive(Clone)]
pub struct SchemaExecutor {
    context: Arc<ExecutionContext>,
}

impl SchemaExecutor {
    pub fn new(context: ExecutionContext) -> Self {
        SchemaExecutor {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    #[instrument(skip_all, fields(operation = request.operation_name.as_deref().unwrap_or("")))]
    pub async fn execute(&self, request: OperationRequest) -> ExecutionResult {
        METRICS.inc_operations_executed();

        let document = match parse(&request.query) {
            Ok(document) => document,
            Err(e) => {
                let mut result = ExecutionResult::request_error(ErrorCode::GraphqlParseFailed, e.message.clone());
                result.errors[0].locations.push(document::Pos {
                    line: e.line,
                    column: e.column,
                });
                return result;
            }
        };

        let operation = match select_operation(&document, request.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(message) => {
                return ExecutionResult::request_error(ErrorCode::GraphqlValidationFailed, message)
            }
        };

        let variables = match coerce_variables(operation, request.variables) {
            Ok(variables) => variables,
            Err(message) => return ExecutionResult::request_error(ErrorCode::BadUserInput, message),
        };

        let engine = Engine::new(&self.context, variables);
        let data = match operation.kind {
            OperationKind::Query => {
                engine
                    .execute_selection(&QueryRoot, &operation.selection, &[], false)
                    .await
            }
            OperationKind::Mutation => {
                engine
                    .execute_selection(&MutationRoot, &operation.selection, &[], true)
                    .await
            }
        };

        let errors = engine.into_errors();
        if !errors.is_empty() {
            METRICS.add_field_errors(errors.len() as u64);
        }
        debug!(errors = errors.len(), "operation executed");
        ExecutionResult {
            data: Some(Value::Object(data)),
            errors,
        }
    }
}

fn select_operation<'d>(
    document: &'d Document,
    name: Option<&str>,
) -> Result<&'d document::OperationDefinition, String> {
    match name {
        Some(name) => document
            .operations
            .iter()
            .find(|op| op.name.as_deref() == Some(name))
            .ok_or_else(|| format!("Unknown operation named \"{name}\".")),
        None if document.operations.len() == 1 => Ok(&document.operations[0]),
        None => Err("Must provide operation name if query contains multiple operations.".to_string()),
    }
}

/// Provided values, then defaults. Required variables must end up non-null.
fn coerce_variables(
    operation: &document::OperationDefinition,
    mut provided: Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    let mut variables = Map::new();
    for definition in &operation.variables {
        let value = match provided.remove(&definition.name) {
            Some(value) => value,
            None => definition
                .default
                .as_ref()
                .map(|d| input_to_json(d, &Map::new()))
                .unwrap_or(Value::Null),
        };
        if value.is_null() && definition.is_required() {
            return Err(format!(
                "Variable \"${}\" of required type \"{}\" was not provided.",
                definition.name, definition.type_name
            ));
        }
        variables.insert(definition.name.clone(), value);
    }
    Ok(variables)
}
