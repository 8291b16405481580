//! Routing of Cast control messages between local clients and the receiver.
//!
//! The router is bound to at most one receiver session at a time. Client
//! requests are forwarded with correlation metadata attached; receiver replies
//! are matched back to the requesting client or fanned out to every connected
//! client.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::config::RouterConfig;
use crate::error::ProtocolError;
use crate::protocol::{
    build_internal_message, build_internal_message_value, AppMessage, AppPayload, CastV2Message,
    CastV2Request, ClientMessage, ClientRecord, InternalMessageType, RequestRecord,
    CAST_NAMESPACE_MEDIA, INVALID_SEQUENCE_NUMBER,
};
use crate::protocol_utils::{canonical_media_message_type, is_media_status_message, request_id_of};
use crate::receiver_session::SharedSession;
use crate::request_tracker::{ExpiredEntry, ExpiredKind, RequestTracker};

/// The router's view of the caller that owns client records and delivers
/// messages to clients.
pub trait ClientDelegate {
    /// Read-only snapshot of every registered client.
    fn client_records(&self) -> HashMap<String, ClientRecord>;

    /// Records a `client_connect` handshake. Returns `false` for unknown ids.
    fn mark_client_connected(&mut self, client_id: &str) -> bool;

    /// Delivers one serialized envelope to one client.
    fn on_message(&self, client_id: &str, message: String);
}

pub struct MessageRouter<D: ClientDelegate> {
    delegate: D,
    session: Option<SharedSession>,
    tracker: RequestTracker,
}

impl<D: ClientDelegate> MessageRouter<D> {
    pub fn new(delegate: D, config: &RouterConfig) -> Self {
        Self {
            delegate,
            session: None,
            tracker: RequestTracker::new(config),
        }
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.delegate
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn bound_session_id(&self) -> Option<String> {
        self.session.as_ref().map(|session| session.session_id())
    }

    /// Rebinds to `session`, discarding all correlation state from the
    /// previous binding.
    pub fn on_session_created(&mut self, session: SharedSession) {
        self.tracker.clear();
        info!("MessageRouter: bound to session {}", session.session_id());
        for client_id in self.connected_client_ids() {
            session.on_client_connected(&client_id);
        }
        self.session = Some(session);
    }

    /// Unbinds the current session. Queued STOPs are answered as if the
    /// application had stopped; every other request still waiting on a reply
    /// gets an `error` envelope, since no reply can arrive any more.
    pub fn on_session_ended(&mut self) {
        if self.session.is_none() {
            self.tracker.clear();
            return;
        }
        self.on_application_stopped();
        for entry in self.tracker.drain_outstanding() {
            self.report_unanswered(&entry, "session ended before the receiver replied");
        }
        if let Some(session) = self.session.take() {
            info!("MessageRouter: unbound from session {}", session.session_id());
        }
    }

    /// Entry point for raw client messages.
    pub fn handle_session_message_str(&mut self, raw: &str) -> Result<bool, ProtocolError> {
        let message = ClientMessage::decode_str(raw)?;
        self.dispatch(message)
    }

    /// Entry point for parsed client messages.
    pub fn handle_session_message(&mut self, message: &Value) -> Result<bool, ProtocolError> {
        let message = ClientMessage::decode(message)?;
        self.dispatch(message)
    }

    pub fn handle_cast_v2_message(&mut self, message: &Value) -> Result<bool, ProtocolError> {
        let message = CastV2Message::decode(message)?;
        self.handle_cast_v2(message)
    }

    pub fn handle_app_message(&mut self, message: &Value) -> Result<bool, ProtocolError> {
        let message = AppMessage::decode(message)?;
        self.handle_app(message)
    }

    fn dispatch(&mut self, message: ClientMessage) -> Result<bool, ProtocolError> {
        match message {
            ClientMessage::CastV2(message) => self.handle_cast_v2(message),
            ClientMessage::App(message) => self.handle_app(message),
            ClientMessage::ClientConnect { client_id } => {
                Ok(self.handle_client_connect(&client_id))
            }
            ClientMessage::LeaveSession {
                client_id,
                sequence_number,
            } => Ok(self.handle_leave_session(&client_id, sequence_number)),
            ClientMessage::Unsupported(message_type) => {
                debug!(
                    "MessageRouter: rejecting unsupported message type '{}'",
                    message_type
                );
                Ok(false)
            }
        }
    }

    fn handle_cast_v2(&mut self, message: CastV2Message) -> Result<bool, ProtocolError> {
        let CastV2Message {
            client_id,
            sequence_number,
            request,
        } = message;
        match request {
            CastV2Request::Stop => Ok(self.handle_stop_message(&client_id, sequence_number)),
            CastV2Request::SetVolume(volume) => {
                Ok(self.handle_volume_message(&volume, &client_id, sequence_number))
            }
            CastV2Request::Media {
                message_type,
                mut message,
            } => {
                let canonical = canonical_media_message_type(&message_type).to_string();
                message.insert("type".to_string(), Value::String(canonical));
                self.send_json_cast_message(
                    message,
                    CAST_NAMESPACE_MEDIA,
                    &client_id,
                    sequence_number,
                )
            }
            CastV2Request::Unrecognized(message_type) => {
                debug!(
                    "MessageRouter: unrecognized v2 message type '{}' from {}",
                    message_type, client_id
                );
                Ok(false)
            }
        }
    }

    /// Queues a STOP acknowledgement and asks the receiver to stop the app.
    pub fn handle_stop_message(&mut self, client_id: &str, sequence_number: i32) -> bool {
        let Some(session) = self.session.clone() else {
            debug!("MessageRouter: STOP from {} with no bound session", client_id);
            return false;
        };
        self.tracker.push_stop_request(client_id, sequence_number);
        session.stop_application();
        true
    }

    fn handle_volume_message(
        &mut self,
        volume: &Map<String, Value>,
        client_id: &str,
        sequence_number: i32,
    ) -> bool {
        let Some(session) = self.session.clone() else {
            debug!(
                "MessageRouter: SET_VOLUME from {} with no bound session",
                client_id
            );
            return false;
        };
        let result = session.handle_volume_message(volume, client_id, sequence_number);
        if !result.handled {
            return false;
        }
        if result.should_wait_for_confirmation {
            self.tracker
                .push_volume_request(RequestRecord::new(client_id, sequence_number));
        } else {
            self.send_volume_ack(client_id, sequence_number);
        }
        true
    }

    fn handle_app(&mut self, message: AppMessage) -> Result<bool, ProtocolError> {
        let Some(session) = self.session.clone() else {
            debug!(
                "MessageRouter: app message from {} with no bound session",
                message.client_id
            );
            return Ok(false);
        };
        let client_connected = self
            .delegate
            .client_records()
            .get(&message.client_id)
            .is_some_and(|record| record.connected);
        if !client_connected {
            debug!(
                "MessageRouter: app message from unknown client {}",
                message.client_id
            );
            return Ok(false);
        }
        if message.session_id != session.session_id() {
            debug!(
                "MessageRouter: app message for session {} does not match bound session",
                message.session_id
            );
            return Ok(false);
        }
        if !session.namespaces().contains(&message.namespace_name) {
            debug!(
                "MessageRouter: namespace {} is not advertised by the receiver",
                message.namespace_name
            );
            return Ok(false);
        }

        match message.payload {
            AppPayload::Json(payload) => self.send_json_cast_message(
                payload,
                &message.namespace_name,
                &message.client_id,
                message.sequence_number,
            ),
            AppPayload::Text(text) => Ok(session.send_string_cast_message(
                &text,
                &message.namespace_name,
                &message.client_id,
                message.sequence_number,
            )),
        }
    }

    fn handle_client_connect(&mut self, client_id: &str) -> bool {
        if !self.delegate.mark_client_connected(client_id) {
            debug!("MessageRouter: client_connect from unknown client {}", client_id);
            return false;
        }
        if let Some(session) = self.session.as_ref() {
            session.on_client_connected(client_id);
        }
        true
    }

    fn handle_leave_session(&mut self, client_id: &str, sequence_number: i32) -> bool {
        if !self.delegate.client_records().contains_key(client_id) {
            return false;
        }
        self.delegate.on_message(
            client_id,
            build_internal_message_value(
                InternalMessageType::LeaveSession,
                Value::Null,
                client_id,
                sequence_number,
            ),
        );
        true
    }

    /// Sends `message` to the receiver on `namespace`, attaching a request id
    /// and remembering the requester when a reply is expected.
    pub fn send_json_cast_message(
        &mut self,
        mut message: Map<String, Value>,
        namespace: &str,
        client_id: &str,
        sequence_number: i32,
    ) -> Result<bool, ProtocolError> {
        let Some(session) = self.session.clone() else {
            return Ok(false);
        };
        if session.is_api_client_invalid() {
            warn!(
                "MessageRouter: dropping message on {}; api client is invalid",
                namespace
            );
            return Ok(false);
        }

        let request_id = match message.get("requestId") {
            Some(value) => value.as_i64().ok_or(ProtocolError::WrongFieldType {
                field: "requestId",
                expected: "an integer",
            })?,
            None => {
                let request_id = self.tracker.alloc_request_id();
                message.insert("requestId".to_string(), Value::from(request_id));
                request_id
            }
        };

        if sequence_number != INVALID_SEQUENCE_NUMBER {
            self.tracker
                .track_request(request_id, RequestRecord::new(client_id, sequence_number));
        }

        let payload = Value::Object(message).to_string();
        Ok(session.send_string_cast_message(&payload, namespace, client_id, sequence_number))
    }

    /// Entry point for every message the receiver sends.
    pub fn on_message_received(&mut self, namespace: &str, message: &str) {
        let request =
            request_id_of(message).and_then(|request_id| self.tracker.take_request(request_id));
        if namespace == CAST_NAMESPACE_MEDIA {
            self.on_media_message(message, request.as_ref());
            return;
        }
        self.on_app_message(message, namespace, request.as_ref());
    }

    pub fn on_media_message(&self, message: &str, request: Option<&RequestRecord>) {
        if is_media_status_message(message) {
            for client_id in self.connected_client_ids() {
                let sequence_number = request
                    .filter(|request| request.client_id == client_id)
                    .map_or(INVALID_SEQUENCE_NUMBER, |request| request.sequence_number);
                self.delegate.on_message(
                    &client_id,
                    build_internal_message(
                        InternalMessageType::V2Message,
                        message,
                        &client_id,
                        sequence_number,
                    ),
                );
            }
            return;
        }

        if let Some(request) = request {
            self.delegate.on_message(
                &request.client_id,
                build_internal_message(
                    InternalMessageType::V2Message,
                    message,
                    &request.client_id,
                    request.sequence_number,
                ),
            );
        }
    }

    pub fn on_app_message(&self, message: &str, namespace: &str, request: Option<&RequestRecord>) {
        let envelope = serde_json::json!({
            "sessionId": self.bound_session_id(),
            "namespaceName": namespace,
            "message": message,
        });
        match request {
            Some(request) => self.delegate.on_message(
                &request.client_id,
                build_internal_message_value(
                    InternalMessageType::AppMessage,
                    envelope,
                    &request.client_id,
                    request.sequence_number,
                ),
            ),
            None => {
                for client_id in self.connected_client_ids() {
                    self.delegate.on_message(
                        &client_id,
                        build_internal_message_value(
                            InternalMessageType::AppMessage,
                            envelope.clone(),
                            &client_id,
                            INVALID_SEQUENCE_NUMBER,
                        ),
                    );
                }
            }
        }
    }

    /// Answers every queued STOP and tells every other connected client that
    /// the session is gone.
    pub fn on_application_stopped(&mut self) {
        let Some(session_id) = self.bound_session_id().map(Value::String) else {
            debug!("MessageRouter: application stopped with no bound session");
            return;
        };
        let mut answered: HashSet<String> = HashSet::new();
        for (client_id, sequence_numbers) in self.tracker.drain_stop_requests() {
            for sequence_number in sequence_numbers {
                self.delegate.on_message(
                    &client_id,
                    build_internal_message_value(
                        InternalMessageType::RemoveSession,
                        session_id.clone(),
                        &client_id,
                        sequence_number,
                    ),
                );
            }
            answered.insert(client_id);
        }
        for client_id in self.connected_client_ids() {
            if answered.contains(&client_id) {
                continue;
            }
            self.delegate.on_message(
                &client_id,
                build_internal_message_value(
                    InternalMessageType::RemoveSession,
                    session_id.clone(),
                    &client_id,
                    INVALID_SEQUENCE_NUMBER,
                ),
            );
        }
    }

    /// Answers the oldest pending SET_VOLUME, if any.
    pub fn on_volume_changed(&mut self) {
        if let Some(request) = self.tracker.pop_volume_request() {
            self.send_volume_ack(&request.client_id, request.sequence_number);
        }
    }

    fn send_volume_ack(&self, client_id: &str, sequence_number: i32) {
        self.delegate.on_message(
            client_id,
            build_internal_message_value(
                InternalMessageType::V2Message,
                Value::Null,
                client_id,
                sequence_number,
            ),
        );
    }

    /// Tells a detaching client its session is gone and forgets its requests.
    pub fn on_client_detached(&mut self, client_id: &str) {
        if let Some(session_id) = self.bound_session_id() {
            self.delegate.on_message(
                client_id,
                build_internal_message_value(
                    InternalMessageType::DisconnectSession,
                    Value::String(session_id),
                    client_id,
                    INVALID_SEQUENCE_NUMBER,
                ),
            );
        }
        self.tracker.purge_client(client_id);
    }

    /// Evicts stale correlation entries, reporting a timeout to each requester
    /// that was waiting on a reply. Returns the number of evicted entries.
    pub fn expire_stale(&mut self, now: Instant) -> usize {
        let expired = self.tracker.expire(now);
        for entry in &expired {
            let record = &entry.record;
            debug!(
                "MessageRouter: {:?} for client {} expired (sequence {})",
                entry.kind, record.client_id, record.sequence_number
            );
            let description = match entry.kind {
                ExpiredKind::Request { request_id } => {
                    format!("no receiver reply for request {request_id}")
                }
                ExpiredKind::Stop => "receiver did not confirm STOP".to_string(),
                ExpiredKind::Volume => "receiver did not confirm SET_VOLUME".to_string(),
            };
            self.report_unanswered(entry, &description);
        }
        expired.len()
    }

    /// Sends a timeout `error` to a requester whose entry was dropped unanswered.
    fn report_unanswered(&self, entry: &ExpiredEntry, description: &str) {
        let record = &entry.record;
        if record.sequence_number == INVALID_SEQUENCE_NUMBER {
            return;
        }
        self.delegate.on_message(
            &record.client_id,
            build_internal_message_value(
                InternalMessageType::Error,
                serde_json::json!({"code": "timeout", "description": description}),
                &record.client_id,
                record.sequence_number,
            ),
        );
    }

    fn connected_client_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .delegate
            .client_records()
            .into_values()
            .filter(|record| record.connected)
            .map(|record| record.client_id)
            .collect();
        ids.sort();
        ids
    }
}
