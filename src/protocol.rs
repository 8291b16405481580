//! Wire vocabulary shared by the router, its clients, and the receiver.
//!
//! This module defines the client-facing envelope (`InternalMessage`), the
//! decoded form of every inbound client message (`ClientMessage`), and the
//! value types the router keeps for request correlation.

use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Sequence number meaning "no reply expected or looked for".
pub const INVALID_SEQUENCE_NUMBER: i32 = -1;

pub const CAST_NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// One locally registered client, owned by the router's caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: String,
    /// Set once a `client_connect` handshake has been observed.
    pub connected: bool,
    /// Passthrough identity used by the caller for access control.
    pub origin: String,
    pub tab_id: i32,
}

impl ClientRecord {
    pub fn new(client_id: impl Into<String>, origin: impl Into<String>, tab_id: i32) -> Self {
        Self {
            client_id: client_id.into(),
            connected: false,
            origin: origin.into(),
            tab_id,
        }
    }
}

/// One in-flight request awaiting a receiver-side reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub client_id: String,
    pub sequence_number: i32,
}

impl RequestRecord {
    pub fn new(client_id: impl Into<String>, sequence_number: i32) -> Self {
        Self {
            client_id: client_id.into(),
            sequence_number,
        }
    }
}

/// Envelope kinds sent to and received from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalMessageType {
    V2Message,
    AppMessage,
    RemoveSession,
    DisconnectSession,
    LeaveSession,
    Error,
}

impl InternalMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V2Message => "v2_message",
            Self::AppMessage => "app_message",
            Self::RemoveSession => "remove_session",
            Self::DisconnectSession => "disconnect_session",
            Self::LeaveSession => "leave_session",
            Self::Error => "error",
        }
    }
}

/// Client-facing envelope.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalMessage {
    #[serde(rename = "type")]
    pub message_type: InternalMessageType,
    pub sequence_number: i32,
    pub timeout_millis: u64,
    pub client_id: String,
    pub message: Value,
}

/// Builds the serialized client envelope for `message`.
///
/// The inner payload is nested as JSON when it parses as JSON and embedded as
/// a plain string otherwise, so structured payloads are never double-encoded.
pub fn build_internal_message(
    message_type: InternalMessageType,
    message: &str,
    client_id: &str,
    sequence_number: i32,
) -> String {
    let inner = serde_json::from_str::<Value>(message)
        .unwrap_or_else(|_| Value::String(message.to_string()));
    build_internal_message_value(message_type, inner, client_id, sequence_number)
}

/// Same as [`build_internal_message`] for an already structured payload.
pub fn build_internal_message_value(
    message_type: InternalMessageType,
    message: Value,
    client_id: &str,
    sequence_number: i32,
) -> String {
    serde_json::json!({
        "type": message_type.as_str(),
        "sequenceNumber": sequence_number,
        "timeoutMillis": 0,
        "clientId": client_id,
        "message": message,
    })
    .to_string()
}

/// Inbound client message, decoded once at the JSON boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    CastV2(CastV2Message),
    App(AppMessage),
    ClientConnect { client_id: String },
    LeaveSession { client_id: String, sequence_number: i32 },
    Unsupported(String),
}

/// A `v2_message` addressed to the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct CastV2Message {
    pub client_id: String,
    pub sequence_number: i32,
    pub request: CastV2Request,
}

/// Inner Cast V2 request carried by a `v2_message`.
#[derive(Debug, Clone, PartialEq)]
pub enum CastV2Request {
    Stop,
    SetVolume(Map<String, Value>),
    Media {
        message_type: String,
        message: Map<String, Value>,
    },
    Unrecognized(String),
}

/// An `app_message` addressed to a custom receiver namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct AppMessage {
    pub client_id: String,
    pub sequence_number: i32,
    pub session_id: String,
    pub namespace_name: String,
    pub payload: AppPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppPayload {
    Json(Map<String, Value>),
    Text(String),
}

impl ClientMessage {
    /// Parses a raw client message string.
    pub fn decode_str(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::decode(&value)
    }

    pub fn decode(value: &Value) -> Result<Self, ProtocolError> {
        let object = as_envelope(value)?;
        let message_type = required_str(object, "type")?;
        match message_type {
            "v2_message" => CastV2Message::decode(value).map(Self::CastV2),
            "app_message" => AppMessage::decode(value).map(Self::App),
            "client_connect" => Ok(Self::ClientConnect {
                client_id: required_str(object, "clientId")?.to_string(),
            }),
            "leave_session" => Ok(Self::LeaveSession {
                client_id: required_str(object, "clientId")?.to_string(),
                sequence_number: sequence_number_of(object),
            }),
            other => Ok(Self::Unsupported(other.to_string())),
        }
    }
}

impl CastV2Message {
    pub fn decode(value: &Value) -> Result<Self, ProtocolError> {
        let object = as_envelope(value)?;
        let client_id = required_str(object, "clientId")?.to_string();
        let sequence_number = sequence_number_of(object);
        let inner = required_object(object, "message")?;
        let inner_type = required_str(inner, "type")?;
        let request = match inner_type {
            "STOP" => CastV2Request::Stop,
            "SET_VOLUME" => CastV2Request::SetVolume(required_object(inner, "volume")?.clone()),
            other if crate::protocol_utils::is_media_message_type(other) => CastV2Request::Media {
                message_type: other.to_string(),
                message: inner.clone(),
            },
            other => CastV2Request::Unrecognized(other.to_string()),
        };
        Ok(Self {
            client_id,
            sequence_number,
            request,
        })
    }
}

impl AppMessage {
    pub fn decode(value: &Value) -> Result<Self, ProtocolError> {
        let object = as_envelope(value)?;
        let client_id = required_str(object, "clientId")?.to_string();
        let sequence_number = sequence_number_of(object);
        let inner = required_object(object, "message")?;
        let session_id = required_str(inner, "sessionId")?.to_string();
        let namespace_name = required_str(inner, "namespaceName")?.to_string();
        let payload = match inner.get("message") {
            Some(Value::Object(map)) => AppPayload::Json(map.clone()),
            Some(Value::String(text)) => AppPayload::Text(text.clone()),
            Some(_) => {
                return Err(ProtocolError::WrongFieldType {
                    field: "message",
                    expected: "an object or a string",
                })
            }
            None => return Err(ProtocolError::MissingField("message")),
        };
        Ok(Self {
            client_id,
            sequence_number,
            session_id,
            namespace_name,
            payload,
        })
    }
}

fn as_envelope(value: &Value) -> Result<&Map<String, Value>, ProtocolError> {
    value
        .as_object()
        .ok_or_else(|| ProtocolError::InvalidEnvelope("expected a JSON object".to_string()))
}

fn required_str<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ProtocolError> {
    match object.get(field) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ProtocolError::WrongFieldType {
            field,
            expected: "a string",
        }),
        None => Err(ProtocolError::MissingField(field)),
    }
}

fn required_object<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Map<String, Value>, ProtocolError> {
    match object.get(field) {
        Some(Value::Object(value)) => Ok(value),
        Some(_) => Err(ProtocolError::WrongFieldType {
            field,
            expected: "an object",
        }),
        None => Err(ProtocolError::MissingField(field)),
    }
}

/// Reads `sequenceNumber`, falling back to [`INVALID_SEQUENCE_NUMBER`].
fn sequence_number_of(object: &Map<String, Value>) -> i32 {
    object
        .get("sequenceNumber")
        .and_then(Value::as_i64)
        .and_then(|value| i32::try_from(value).ok())
        .unwrap_or(INVALID_SEQUENCE_NUMBER)
}
