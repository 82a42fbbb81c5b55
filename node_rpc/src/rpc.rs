//! JSON-RPC 2.0 frame shapes and request-header parsing.
//!
//! Inbound messages are parsed in two stages: [`parse_requests`] extracts
//! the headers (id, service, method) of a single or batched message and
//! leaves the params untouched; the dispatcher later binds them against the
//! resolved handler via [`crate::params::Params`].

use {
    crate::{
        domain::{RequestId, SubscriptionId},
        error::{ErrorData, RpcError},
    },
    once_cell::sync::Lazy,
    serde::{Deserialize, Serialize},
    serde_json::value::RawValue,
    std::sync::Arc,
};

#[cfg(test)]
mod tests;

/// Version of the JSON-RPC protocol all frames carry.
pub const JSON_RPC_VERSION_STR: &str = "2.0";

pub static JSON_RPC_VERSION: Lazy<Arc<str>> =
    Lazy::new(|| Arc::from(JSON_RPC_VERSION_STR));

/// Separator between the service and method halves of a wire method name.
pub const SERVICE_METHOD_SEPARATOR: char = '_';

/// Reserved suffix of subscription-creating requests.
pub const SUBSCRIBE_METHOD_SUFFIX: &str = "_subscribe";

/// Reserved suffix of subscription-cancelling requests.
pub const UNSUBSCRIBE_METHOD_SUFFIX: &str = "_unsubscribe";

/// Suffix of the `method` field carried by notification frames.
pub const NOTIFICATION_METHOD_SUFFIX: &str = "_subscription";

fn default_version() -> Arc<str> {
    JSON_RPC_VERSION.clone()
}

/// Data structure representing a JSON RPC request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// ID this message corresponds to. An explicit null is valid; a frame
    /// without an id is rejected.
    pub id: RequestId,

    /// RPC version. Tolerated when absent on inbound frames.
    #[serde(default = "default_version")]
    pub jsonrpc: Arc<str>,

    /// The wire method name, `<service>_<method>`.
    pub method: String,

    /// The raw, not yet bound parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
}

impl Request {
    /// Create a new instance.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            method: method.into(),
            jsonrpc: JSON_RPC_VERSION.clone(),
            id,
            params,
        }
    }
}

/// Enum representing a JSON RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    /// A response with a result.
    Success(SuccessResponse),

    /// A response for a failed request.
    Error(ErrorResponse),
}

impl Response {
    /// Returns the request id this response echoes.
    pub fn id(&self) -> &RequestId {
        match self {
            Self::Success(response) => &response.id,
            Self::Error(response) => &response.id,
        }
    }
}

/// Data structure representing a successful JSON RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// RPC version.
    pub jsonrpc: Arc<str>,

    /// ID this message corresponds to.
    pub id: RequestId,

    /// The result for the message.
    pub result: serde_json::Value,
}

impl SuccessResponse {
    /// Create a new instance.
    pub fn new(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.clone(),
            id,
            result,
        }
    }
}

/// Data structure representing a JSON RPC error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// RPC version.
    pub jsonrpc: Arc<str>,

    /// ID this message corresponds to.
    pub id: RequestId,

    /// The error corresponding to this message.
    pub error: ErrorData,
}

impl ErrorResponse {
    /// Create a new instance.
    pub fn new(id: RequestId, err: RpcError) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.clone(),
            id,
            error: err.into(),
        }
    }

    /// Create a new instance carrying extra info in the error object.
    pub fn with_info(id: RequestId, err: RpcError, info: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.clone(),
            id,
            error: ErrorData::with_info(err, info),
        }
    }
}

/// Server-pushed subscription event frame. Notifications carry no request
/// id; the subscription id inside the params ties them to their origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// RPC version.
    pub jsonrpc: Arc<str>,

    /// `<namespace>_subscription`.
    pub method: String,

    /// The notification payload.
    pub params: SubscriptionParams,
}

/// Params of a [`Notification`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    /// The id of the subscription this event belongs to.
    pub subscription: SubscriptionId,

    /// The event value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Notification {
    /// Create a new instance for the given subscription and namespace.
    pub fn new(subscription: SubscriptionId, namespace: &str, event: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.clone(),
            method: format!("{namespace}{NOTIFICATION_METHOD_SUFFIX}"),
            params: SubscriptionParams {
                subscription,
                result: Some(event),
            },
        }
    }
}

/// A parsed request header produced by [`parse_requests`] and consumed by
/// the dispatcher. Params are left raw; `err` carries a per-request parse
/// failure that the dispatcher answers without further resolution.
#[derive(Debug)]
pub struct RpcCall {
    pub id: RequestId,
    pub service: String,
    pub method: String,
    pub params: Option<Box<RawValue>>,
    pub is_pubsub: bool,
    pub err: Option<RpcError>,
}

/// Parses one inbound JSON text into request headers, accepting both the
/// single-object and the array (batch) top-level forms. The boolean
/// distinguishes a one-element batch from a plain request.
pub fn parse_requests(msg: &str) -> Result<(Vec<RpcCall>, bool), RpcError> {
    if is_batch(msg) {
        let frames: Vec<Request> = serde_json::from_str(msg)
            .map_err(|err| RpcError::InvalidMessage(err.to_string()))?;

        let calls = frames
            .into_iter()
            .map(parse_call)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((calls, true))
    } else {
        let frame: Request = serde_json::from_str(msg)
            .map_err(|err| RpcError::InvalidMessage(err.to_string()))?;

        Ok((vec![parse_call(frame)?], false))
    }
}

// A message is a batch when its first significant character is '['.
fn is_batch(msg: &str) -> bool {
    msg.bytes()
        .find(|c| !matches!(c, b' ' | b'\t' | b'\n' | b'\r'))
        .map_or(false, |c| c == b'[')
}

fn parse_call(frame: Request) -> Result<RpcCall, RpcError> {
    let Request {
        method, id, params, ..
    } = frame;

    // Subscribe frames always carry the real subscription method name as
    // the first params element.
    if let Some(service) = method.strip_suffix(SUBSCRIBE_METHOD_SUFFIX) {
        let params = params.ok_or_else(|| {
            RpcError::InvalidRequest("unable to parse subscription request".into())
        })?;
        let sub_method = subscription_method(&params)?;

        return Ok(RpcCall {
            id,
            service: service.to_owned(),
            method: sub_method,
            params: Some(params),
            is_pubsub: true,
            err: None,
        });
    }

    if method.ends_with(UNSUBSCRIBE_METHOD_SUFFIX) {
        return Ok(RpcCall {
            id,
            service: String::new(),
            method,
            params,
            is_pubsub: true,
            err: None,
        });
    }

    let mut parts = method.split(SERVICE_METHOD_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(name), None) => Ok(RpcCall {
            id,
            service: service.to_owned(),
            method: name.to_owned(),
            params,
            is_pubsub: false,
            err: None,
        }),
        _ => Ok(RpcCall {
            id,
            service: String::new(),
            method: String::new(),
            params,
            is_pubsub: false,
            err: Some(RpcError::method_not_found(method, "")),
        }),
    }
}

fn subscription_method(params: &RawValue) -> Result<String, RpcError> {
    let invalid = || RpcError::InvalidRequest("unable to parse subscription request".into());

    let elems: Vec<&RawValue> = serde_json::from_str(params.get()).map_err(|_| invalid())?;
    let first = elems.first().ok_or_else(invalid)?;

    serde_json::from_str(first.get()).map_err(|_| invalid())
}
