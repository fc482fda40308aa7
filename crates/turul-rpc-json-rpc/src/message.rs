use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HandlerError, RpcErrorObject};
use crate::types::{JsonRpcVersion, RequestId};

fn is_false(value: &bool) -> bool {
    !*value
}

/// A JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Set when the caller expects a chunked reply
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id: id.into(),
            method: method.into(),
            params,
            stream: false,
        }
    }

    /// Create a request whose reply arrives as a sequence of chunks
    pub fn streaming(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Self {
        Self {
            stream: true,
            ..Self::new(id, method, params)
        }
    }

    /// Get a parameter by name (if params are an object)
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.as_object()?.get(name)
    }

    /// Get a parameter by index (if params are an array)
    pub fn param_index(&self, index: usize) -> Option<&Value> {
        self.params.as_ref()?.as_array()?.get(index)
    }

    /// Deserialize the params into a handler's own type
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        let params = self.params.clone().unwrap_or(Value::Null);
        serde_json::from_value(params).map_err(|e| HandlerError::InvalidParams(e.to_string()))
    }
}

/// Outcome carried by a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(RpcErrorObject),
}

/// A JSON-RPC response, also used for stream chunks and terminators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    /// `None` only for errors that cannot be tied to a request (parse errors)
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Present on stream chunks: `false` for items, `true` for the terminator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id: Some(id),
            payload: ResponsePayload::Result(result),
            done: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: RpcErrorObject) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            payload: ResponsePayload::Error(error),
            done: None,
        }
    }

    /// One item of a streamed reply
    pub fn chunk(id: RequestId, item: Value) -> Self {
        Self {
            done: Some(false),
            ..Self::success(id, item)
        }
    }

    /// Final sentinel of a streamed reply
    pub fn end_of_stream(id: RequestId) -> Self {
        Self {
            done: Some(true),
            ..Self::success(id, Value::Null)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    /// True for the terminator of a stream
    pub fn is_end_of_stream(&self) -> bool {
        self.done == Some(true)
    }

    /// True for a non-terminal stream item
    pub fn is_chunk(&self) -> bool {
        self.done == Some(false)
    }

    pub fn into_result(self) -> Result<Value, RpcErrorObject> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(error) => Err(error),
        }
    }
}

/// A JSON-RPC notification (request without an id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.as_object()?.get(name)
    }
}

/// Any single JSON-RPC message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Correlation id, if the message has one
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(request) => Some(&request.id),
            Message::Response(response) => response.id.as_ref(),
            Message::Notification(_) => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

/// One newline-delimited frame: a single message or a batch array
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    Single(Message),
    Batch(Vec<Message>),
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Frame::Single(message)
    }
}

impl From<Request> for Frame {
    fn from(request: Request) -> Self {
        Frame::Single(request.into())
    }
}

impl From<Response> for Frame {
    fn from(response: Response) -> Self {
        Frame::Single(response.into())
    }
}

impl From<Notification> for Frame {
    fn from(notification: Notification) -> Self {
        Frame::Single(notification.into())
    }
}
