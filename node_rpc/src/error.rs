use serde::{Deserialize, Serialize};

/// Boxed error type handlers and services report their failures with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The closed set of RPC error kinds produced by the server core. Each kind
/// carries a stable integer code that is serialized into the JSON-RPC
/// `error` object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The requested `service_method` pair is not registered.
    #[error("the method {service}_{method} does not exist/is not available")]
    MethodNotFound { service: String, method: String },

    /// The frame is syntactically JSON-RPC but semantically ill-formed.
    #[error("{0}")]
    InvalidRequest(String),

    /// The bytes are not valid JSON, or the top-level structure is invalid.
    #[error("{0}")]
    InvalidMessage(String),

    /// Params are missing, of the wrong arity, or of the wrong type.
    #[error("{0}")]
    InvalidParams(String),

    /// A handler returned an error; its message is forwarded verbatim.
    #[error("{0}")]
    Callback(String),

    /// The request arrived after the server began shutting down.
    #[error("server is shutting down")]
    Shutdown,
}

impl RpcError {
    /// The stable JSON-RPC error code of this kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::MethodNotFound { .. } => -32601,
            Self::InvalidRequest(_) => -32600,
            Self::InvalidMessage(_) => -32700,
            Self::InvalidParams(_) => -32602,
            Self::Callback(_) | Self::Shutdown => -32000,
        }
    }

    pub fn method_not_found(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            service: service.into(),
            method: method.into(),
        }
    }
}

// Errors leaking out of handlers that are not part of the taxonomy are
// coerced into `Callback`, keeping only their message.
impl From<BoxError> for RpcError {
    fn from(err: BoxError) -> Self {
        Self::Callback(err.to_string())
    }
}

impl From<String> for RpcError {
    fn from(message: String) -> Self {
        Self::Callback(message)
    }
}

impl From<&str> for RpcError {
    fn from(message: &str) -> Self {
        Self::Callback(message.to_owned())
    }
}

/// Wire representation of a JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error code.
    pub code: i32,

    /// Error message.
    pub message: String,

    /// Additional information about the error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorData {
    /// Attaches extra info to the error object.
    pub fn with_info(err: RpcError, info: serde_json::Value) -> Self {
        Self {
            data: Some(info),
            ..err.into()
        }
    }
}

impl From<RpcError> for ErrorData {
    fn from(err: RpcError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(RpcError::method_not_found("eth", "missing").code(), -32601);
        assert_eq!(RpcError::InvalidRequest("bad".into()).code(), -32600);
        assert_eq!(RpcError::InvalidMessage("bad".into()).code(), -32700);
        assert_eq!(RpcError::InvalidParams("bad".into()).code(), -32602);
        assert_eq!(RpcError::Callback("bad".into()).code(), -32000);
        assert_eq!(RpcError::Shutdown.code(), -32000);
    }

    #[test]
    fn method_not_found_message() {
        let err = RpcError::method_not_found("calc", "divide");
        assert_eq!(
            err.to_string(),
            "the method calc_divide does not exist/is not available"
        );
    }

    #[test]
    fn foreign_errors_coerce_into_callback() {
        let boxed: BoxError = "db connection lost".into();
        let err = RpcError::from(boxed);
        assert_eq!(err, RpcError::Callback("db connection lost".into()));
        assert_eq!(err.code(), -32000);
    }

    #[test]
    fn error_data_serialization() {
        let data = ErrorData::from(RpcError::Shutdown);
        assert_eq!(
            serde_json::to_string(&data).unwrap(),
            r#"{"code":-32000,"message":"server is shutting down"}"#
        );

        let data = ErrorData::with_info(RpcError::Shutdown, serde_json::json!("retry later"));
        assert_eq!(
            serde_json::to_string(&data).unwrap(),
            r#"{"code":-32000,"message":"server is shutting down","data":"retry later"}"#
        );
    }
}
