//! Cast V2 media vocabulary helpers.

use serde_json::Value;

/// Inner `v2_message` types forwarded to the receiver's media namespace.
const MEDIA_MESSAGE_TYPES: [&str; 14] = [
    "PLAY",
    "LOAD",
    "PAUSE",
    "SEEK",
    "GET_STATUS",
    "STOP_MEDIA",
    "MEDIA_SET_VOLUME",
    "MEDIA_GET_STATUS",
    "EDIT_TRACKS_INFO",
    "QUEUE_LOAD",
    "QUEUE_INSERT",
    "QUEUE_UPDATE",
    "QUEUE_REMOVE",
    "QUEUE_REORDER",
];

/// Client-side names that collide with receiver-level messages, mapped to the
/// name the media namespace expects.
const MEDIA_OVERLOADED_MESSAGE_TYPES: [(&str, &str); 3] = [
    ("STOP_MEDIA", "STOP"),
    ("MEDIA_SET_VOLUME", "SET_VOLUME"),
    ("MEDIA_GET_STATUS", "GET_STATUS"),
];

pub fn is_media_message_type(message_type: &str) -> bool {
    MEDIA_MESSAGE_TYPES.contains(&message_type)
}

/// Returns the wire name for a client media message type.
pub fn canonical_media_message_type(message_type: &str) -> &str {
    MEDIA_OVERLOADED_MESSAGE_TYPES
        .iter()
        .find(|(legacy, _)| *legacy == message_type)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(message_type)
}

/// Returns `true` when a receiver payload is a `MEDIA_STATUS` broadcast.
pub fn is_media_status_message(payload: &str) -> bool {
    serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|value| {
            value
                .get("type")
                .and_then(Value::as_str)
                .map(|message_type| message_type == "MEDIA_STATUS")
        })
        .unwrap_or(false)
}

/// Reads the integer `requestId` out of a receiver payload, if any.
pub fn request_id_of(payload: &str) -> Option<i64> {
    serde_json::from_str::<Value>(payload)
        .ok()?
        .get("requestId")?
        .as_i64()
}
