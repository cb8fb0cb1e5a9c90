//! Field resolution engine
//!
//! Walks a parsed operation against [`ObjectResolver`]s. Errors are scoped
//! to the field that raised them: that field becomes `null`, the error is
//! recorded with its response path, and every other field still resolves.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use buddy_firmware::FirmwareError;
use buddy_github::GithubError;
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::DeviceError;
use crate::schema::document::{Field, InputValue, Pos};

/// Machine-readable error class, sent as `extensions.code`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ResolutionError,
    TransportError,
    NotFoundInArchive,
    FetchError,
    BadUserInput,
    DeviceBusy,
    DeviceError,
    FieldError,
    GraphqlParseFailed,
    GraphqlValidationFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ResolutionError => "RESOLUTION_ERROR",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::NotFoundInArchive => "NOT_FOUND_IN_ARCHIVE",
            ErrorCode::FetchError => "FETCH_ERROR",
            ErrorCode::BadUserInput => "BAD_USER_INPUT",
            ErrorCode::DeviceBusy => "DEVICE_BUSY",
            ErrorCode::DeviceError => "DEVICE_ERROR",
            ErrorCode::FieldError => "FIELD_ERROR",
            ErrorCode::GraphqlParseFailed => "GRAPHQL_PARSE_FAILED",
            ErrorCode::GraphqlValidationFailed => "GRAPHQL_VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a response path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExtensions {
    pub code: ErrorCode,
}

/// An error entry of an [`super::ExecutionResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Pos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    pub extensions: ErrorExtensions,
}

impl ExecutionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ExecutionError {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: ErrorExtensions { code },
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.extensions.code
    }
}

/// `CODE: message (at a.b.0)`
impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)?;
        if let Some(path) = &self.path {
            let path: Vec<String> = path
                .iter()
                .map(|segment| match segment {
                    PathSegment::Key(key) => key.clone(),
                    PathSegment::Index(index) => index.to_string(),
                })
                .collect();
            write!(f, " (at {})", path.join("."))?;
        }
        Ok(())
    }
}

/// Error raised by a single resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub code: ErrorCode,
    pub message: String,
}

impl FieldError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        FieldError {
            code,
            message: message.into(),
        }
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadUserInput, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResolutionError, message)
    }

    pub fn unknown_field(type_name: &str, field: &str) -> Self {
        Self::new(
            ErrorCode::FieldError,
            format!("Cannot query field \"{field}\" on type \"{type_name}\"."),
        )
    }
}

impl From<GithubError> for FieldError {
    fn from(err: GithubError) -> Self {
        FieldError::new(ErrorCode::TransportError, err.to_string())
    }
}

impl From<FirmwareError> for FieldError {
    fn from(err: FirmwareError) -> Self {
        let code = match err {
            FirmwareError::NotFoundInArchive { .. } => ErrorCode::NotFoundInArchive,
            FirmwareError::Fetch { .. } | FirmwareError::MalformedArchive { .. } => {
                ErrorCode::FetchError
            }
        };
        FieldError::new(code, err.to_string())
    }
}

impl From<DeviceError> for FieldError {
    fn from(err: DeviceError) -> Self {
        let code = match err {
            DeviceError::Busy(_) => ErrorCode::DeviceBusy,
            _ => ErrorCode::DeviceError,
        };
        FieldError::new(code, err.to_string())
    }
}

pub type FieldResult = Result<Resolved, FieldError>;

/// What a resolver produced for a field
pub enum Resolved {
    Null,
    Value(Value),
    Object(Box<dyn ObjectResolver>),
    List(Vec<Resolved>),
}

impl Resolved {
    pub fn value(value: impl Into<Value>) -> Self {
        Resolved::Value(value.into())
    }

    /// Scalar that may be absent.
    pub fn scalar<T: Into<Value>>(value: Option<T>) -> Self {
        value.map_or(Resolved::Null, |v| Resolved::Value(v.into()))
    }

    pub fn object(object: impl ObjectResolver + 'static) -> Self {
        Resolved::Object(Box::new(object))
    }

    pub fn optional<O: ObjectResolver + 'static>(object: Option<O>) -> Self {
        object.map_or(Resolved::Null, Resolved::object)
    }

    pub fn list<O, I>(objects: I) -> Self
    where
        O: ObjectResolver + 'static,
        I: IntoIterator<Item = O>,
    {
        Resolved::List(objects.into_iter().map(Resolved::object).collect())
    }
}

/// A typed object whose fields can be resolved.
#[async_trait]
pub trait ObjectResolver: Send + Sync {
    /// Schema type name, reported by `__typename`.
    fn type_name(&self) -> &'static str;

    /// Resolve one field of this object.
    async fn resolve_field(
        &self,
        field: &str,
        args: &Arguments,
        ctx: &ExecutionContext,
    ) -> FieldResult;
}

/// Coerced field arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn new(values: Map<String, Value>) -> Self {
        Arguments(values)
    }

    /// Argument value; explicit `null` counts as absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn string(&self, name: &str) -> Result<Option<String>, FieldError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(FieldError::bad_input(format!(
                "Argument \"{name}\" expects a String, got {other}"
            ))),
        }
    }

    pub fn required_string(&self, name: &str) -> Result<String, FieldError> {
        self.string(name)?
            .ok_or_else(|| FieldError::bad_input(format!("Argument \"{name}\" is required")))
    }

    /// `ID` arguments accept strings and integers.
    pub fn id(&self, name: &str) -> Result<String, FieldError> {
        match self.get(name) {
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            _ => self.required_string(name),
        }
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, FieldError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                FieldError::bad_input(format!("Argument \"{name}\" expects an Int, got {n}"))
            }),
            Some(other) => Err(FieldError::bad_input(format!(
                "Argument \"{name}\" expects an Int, got {other}"
            ))),
        }
    }
}

/// Convert a literal to JSON, substituting variables.
pub(crate) fn input_to_json(value: &InputValue, variables: &Map<String, Value>) -> Value {
    match value {
        InputValue::Null => Value::Null,
        InputValue::Int(i) => Value::from(*i),
        InputValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        InputValue::String(s) | InputValue::Enum(s) => Value::String(s.clone()),
        InputValue::Boolean(b) => Value::Bool(*b),
        InputValue::List(items) => {
            Value::Array(items.iter().map(|v| input_to_json(v, variables)).collect())
        }
        InputValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), input_to_json(v, variables)))
                .collect(),
        ),
        InputValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
    }
}

/// State of one operation execution
pub(crate) struct Engine<'a> {
    ctx: &'a ExecutionContext,
    variables: Map<String, Value>,
    errors: Mutex<Vec<ExecutionError>>,
}

impl<'a> Engine<'a> {
    pub(crate) fn new(ctx: &'a ExecutionContext, variables: Map<String, Value>) -> Self {
        Engine {
            ctx,
            variables,
            errors: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn into_errors(self) -> Vec<ExecutionError> {
        self.errors.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, error: FieldError, field: &Field, path: Vec<PathSegment>) {
        debug!(code = ?error.code, path = ?path, message = %error.message, "field error");
        let mut entry = ExecutionError::new(error.code, error.message);
        entry.locations.push(field.pos);
        entry.path = Some(path);
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Resolve `fields` on `parent`. `serial` runs them in document order.
    pub(crate) fn execute_selection<'b>(
        &'b self,
        parent: &'b dyn ObjectResolver,
        fields: &'b [Field],
        path: &'b [PathSegment],
        serial: bool,
    ) -> BoxFuture<'b, Map<String, Value>> {
        Box::pin(async move {
            let mut seen = std::collections::HashSet::new();
            let unique: Vec<&Field> = fields
                .iter()
                .filter(|f| seen.insert(f.response_key()))
                .collect();

            let values = if serial {
                let mut values = Vec::with_capacity(unique.len());
                for field in &unique {
                    values.push(self.execute_field(parent, field, path).await);
                }
                values
            } else {
                join_all(unique.iter().map(|field| self.execute_field(parent, field, path))).await
            };

            unique
                .iter()
                .zip(values)
                .map(|(field, value)| (field.response_key().to_string(), value))
                .collect()
        })
    }

    async fn execute_field(
        &self,
        parent: &dyn ObjectResolver,
        field: &Field,
        parent_path: &[PathSegment],
    ) -> Value {
        let mut path = parent_path.to_vec();
        path.push(PathSegment::Key(field.response_key().to_string()));

        if field.name == "__typename" {
            return Value::String(parent.type_name().to_string());
        }

        let args = Arguments::new(
            field
                .arguments
                .iter()
                .map(|(name, value)| (name.clone(), input_to_json(value, &self.variables)))
                .collect(),
        );

        match parent.resolve_field(&field.name, &args, self.ctx).await {
            Ok(resolved) => self.complete(resolved, field, path).await,
            Err(error) => {
                self.record(error, field, path);
                Value::Null
            }
        }
    }

    fn complete<'b>(
        &'b self,
        resolved: Resolved,
        field: &'b Field,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'b, Value> {
        Box::pin(async move {
            match resolved {
                Resolved::Null => Value::Null,
                Resolved::Value(value) => value,
                Resolved::Object(object) => {
                    if field.selection.is_empty() {
                        let message = format!(
                            "Field \"{}\" of type \"{}\" must have a selection of subfields.",
                            field.name,
                            object.type_name()
                        );
                        self.record(
                            FieldError::new(ErrorCode::GraphqlValidationFailed, message),
                            field,
                            path,
                        );
                        return Value::Null;
                    }
                    Value::Object(
                        self.execute_selection(object.as_ref(), &field.selection, &path, false)
                            .await,
                    )
                }
                Resolved::List(items) => {
                    let completions = items.into_iter().enumerate().map(|(i, item)| {
                        let mut item_path = path.clone();
                        item_path.push(PathSegment::Index(i));
                        self.complete(item, field, item_path)
                    });
                    Value::Array(join_all(completions).await)
                }
            }
        })
    }
}
