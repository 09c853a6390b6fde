//! Response and error payloads handed to the transport layer

use super::error::EngineError;
use super::path::ResponsePath;
use crate::plan::NodeId;
use serde::Serialize;
use serde_json::{Map, Value, json};

/// A field-level error recorded during execution
///
/// Carries the response path of the failing field and the plan node it
/// originated from. Only the root cause is recorded: null propagation never
/// produces additional errors.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub message: String,
    pub path: ResponsePath,
    pub node: Option<NodeId>,
    pub code: &'static str,
}

impl FieldError {
    pub fn new(message: impl Into<String>, path: ResponsePath) -> Self {
        Self {
            message: message.into(),
            path,
            node: None,
            code: "RESOLVER_ERROR",
        }
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }
}

/// A serialized GraphQL error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQLError {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<ResponsePath>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>, code: &str) -> Self {
        let mut extensions = Map::new();
        extensions.insert("code".to_string(), json!(code));
        Self {
            message: message.into(),
            path: None,
            extensions: Some(extensions),
        }
    }

    /// The `extensions.code` entry, if any
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
    }
}

impl From<FieldError> for GraphQLError {
    fn from(err: FieldError) -> Self {
        let mut error = GraphQLError::new(err.message, err.code);
        error.path = Some(err.path);
        error
    }
}

impl From<&EngineError> for GraphQLError {
    fn from(err: &EngineError) -> Self {
        GraphQLError::new(err.to_string(), err.error_code())
    }
}

/// The result of executing a request: always `{ data, errors }`
///
/// `data` is null when the request failed before execution, or when a
/// non-null root field failed and null propagation reached the root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub data: Value,
    pub errors: Vec<GraphQLError>,
}

impl Response {
    pub fn new(data: Value, errors: Vec<GraphQLError>) -> Self {
        Self { data, errors }
    }

    /// A response for a request that failed before any resolver ran
    pub fn from_error(err: &EngineError) -> Self {
        Self {
            data: Value::Null,
            errors: vec![GraphQLError::from(err)],
        }
    }

    /// Whether the response carries no errors
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Serialize the response to a JSON value
    pub fn to_json(&self) -> Value {
        json!({
            "data": self.data,
            "errors": self.errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PlanError;

    #[test]
    fn test_field_error_serializes_path_and_code() {
        let path = ResponsePath::root().key("book").key("title");
        let error = GraphQLError::from(FieldError::new("boom", path));
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "message": "boom",
                "path": ["book", "title"],
                "extensions": {"code": "RESOLVER_ERROR"}
            })
        );
    }

    #[test]
    fn test_response_always_has_data_and_errors() {
        let response = Response::new(json!({"ok": true}), Vec::new());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"data": {"ok": true}, "errors": []})
        );
        assert_eq!(response.to_json(), serde_json::to_value(&response).unwrap());
    }

    #[test]
    fn test_from_error_has_null_data() {
        let err = EngineError::Plan(PlanError::NoOperation);
        let response = Response::from_error(&err);
        assert_eq!(response.data, Value::Null);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].code(), Some("NO_OPERATION"));
        assert!(response.errors[0].path.is_none());
    }
}
