//! Request/response shapes for the broker wire contract (§4.1, §4.1a).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An opaque unit of enqueue: the broker reads only `id` and `priority` off
/// the payload and never interprets the rest (§3: "Broker job envelope").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub priority: i32,
    pub payload: Value,
}

/// `{cmd, data}` requests, one per frame, adjacently tagged so the wire
/// shape matches §4.1 literally instead of an internally-tagged enum that
/// would inline `data`'s fields into the top-level object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", content = "data", rename_all = "UPPERCASE")]
pub enum BrokerRequest {
    Push(Envelope),
    Pop,
    Ack { id: String },
    Cancel { id: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Empty,
    Error,
}

/// `{status, data?, error?}` responses (§4.1). Exactly one request yields
/// exactly one response; the broker never pushes unsolicited frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BrokerResponse {
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            status: ResponseStatus::Ok,
            data: Some(serde_json::to_value(data).expect("response payload must serialize")),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self { status: ResponseStatus::Ok, data: None, error: None }
    }

    pub fn empty() -> Self {
        Self { status: ResponseStatus::Empty, data: None, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ResponseStatus::Error, data: None, error: Some(message.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn is_empty(&self) -> bool {
        self.status == ResponseStatus::Empty
    }
}

/// The payload of a successful `POP` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PopResult {
    pub id: String,
    pub payload: Value,
}
