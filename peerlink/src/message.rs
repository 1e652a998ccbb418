//! Request and response frames exchanged between peers.
//!
//! Frames are correlated by a [`RequestId`]: a request carries a fresh id and
//! the matching response copies it back. Everything in this module is pure
//! data shaping; the only state is the id counter in [`RequestIdFactory`].
//!
//! # Wire shape
//!
//! ```text
//! request:  {"id": 7, "request": true, "method": "ping", "data": null}
//! success:  {"id": 7, "response": true, "ok": true, "data": "pong"}
//! failure:  {"id": 7, "response": true, "ok": false, "errorReason": "not allowed", "errorCode": 403}
//! ```

use std::cell::Cell;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Token correlating a request with its response.
///
/// Only uniqueness within one peer's outstanding set matters. The token is
/// carried on the wire as an unsigned integer and must come back unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic generator of [`RequestId`]s.
///
/// Starts at 1. Uses a `Cell` since each peer lives on a single thread.
#[derive(Debug)]
pub struct RequestIdFactory {
    next_id: Cell<u64>,
}

impl RequestIdFactory {
    /// Create a factory whose first id is 1.
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
        }
    }

    /// Hand out the next id.
    pub fn next(&self) -> RequestId {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        RequestId(id)
    }
}

impl Default for RequestIdFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Discriminator field that is always `true` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Marker;

impl Serialize for Marker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for Marker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Ok(Marker)
        } else {
            Err(de::Error::custom("discriminator must be true"))
        }
    }
}

/// A request expecting a correlated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation token.
    pub id: RequestId,
    request: Marker,
    /// Name of the remote operation.
    pub method: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub data: Value,
}

impl RequestFrame {
    /// Build a request frame with an explicit id.
    pub fn new(id: RequestId, method: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            request: Marker,
            method: method.into(),
            data,
        }
    }
}

/// Response to a [`RequestFrame`], carrying either data or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Id copied from the originating request.
    pub id: RequestId,
    response: Marker,
    /// Whether the remote accepted the request.
    pub ok: bool,
    /// Payload when `ok` is true.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Rejection reason when `ok` is false.
    #[serde(
        rename = "errorReason",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_reason: Option<String>,
    /// Rejection code when `ok` is false.
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
}

impl ResponseFrame {
    /// Successful response for the request with `id`.
    pub fn success(id: RequestId, data: Value) -> Self {
        Self {
            id,
            response: Marker,
            ok: true,
            data,
            error_reason: None,
            error_code: None,
        }
    }

    /// Failed response for the request with `id`.
    pub fn failure(id: RequestId, reason: impl Into<String>, code: i64) -> Self {
        Self {
            id,
            response: Marker,
            ok: false,
            data: Value::Null,
            error_reason: Some(reason.into()),
            error_code: Some(code),
        }
    }
}

/// Any frame travelling over a transport.
///
/// Decoding never fails on shape: values that are neither a well-formed
/// response nor a well-formed request come out as [`Frame::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// An inbound or outbound request.
    Request(RequestFrame),
    /// A response to an earlier request.
    Response(ResponseFrame),
    /// Anything else.
    Unknown(Value),
}

impl Frame {
    /// Classify a decoded JSON value.
    ///
    /// A `response: true` marker is checked first, then `request: true`.
    pub fn from_value(value: Value) -> Self {
        if value.get("response") == Some(&Value::Bool(true)) {
            if let Ok(response) = ResponseFrame::deserialize(&value) {
                return Frame::Response(response);
            }
        }
        if value.get("request") == Some(&Value::Bool(true)) {
            if let Ok(request) = RequestFrame::deserialize(&value) {
                return Frame::Request(request);
            }
        }
        Frame::Unknown(value)
    }

    /// Correlation id, if the frame has one.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Frame::Request(request) => Some(request.id),
            Frame::Response(response) => Some(response.id),
            Frame::Unknown(_) => None,
        }
    }
}

impl From<RequestFrame> for Frame {
    fn from(frame: RequestFrame) -> Self {
        Frame::Request(frame)
    }
}

impl From<ResponseFrame> for Frame {
    fn from(frame: ResponseFrame) -> Self {
        Frame::Response(frame)
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Frame::Request(request) => request.serialize(serializer),
            Frame::Response(response) => response.serialize(serializer),
            Frame::Unknown(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Frame::from_value)
    }
}

/// Build a request for `method` with a fresh id.
pub fn build_request(ids: &RequestIdFactory, method: impl Into<String>, data: Value) -> RequestFrame {
    RequestFrame::new(ids.next(), method, data)
}

/// Build an `ok = true` response to `request`.
pub fn build_success_response(request: &RequestFrame, data: Value) -> ResponseFrame {
    ResponseFrame::success(request.id, data)
}

/// Build an `ok = false` response to `request`.
pub fn build_error_response(
    request: &RequestFrame,
    reason: impl Into<String>,
    code: i64,
) -> ResponseFrame {
    ResponseFrame::failure(request.id, reason, code)
}
