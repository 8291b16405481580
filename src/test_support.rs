//! Recording fakes for the receiver session, client delegate, and launch
//! requests used across unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::client_registry::ClientRegistry;
use crate::launch_coordinator::{LaunchId, LaunchRequest, SessionListener};
use crate::message_router::ClientDelegate;
use crate::protocol::ClientRecord;
use crate::receiver_session::{ReceiverSession, SharedSession, VolumeHandling};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCastMessage {
    pub message: String,
    pub namespace: String,
    pub client_id: String,
    pub sequence_number: i32,
}

struct FakeSessionState {
    sent: Vec<SentCastMessage>,
    stop_application_calls: usize,
    stop_calls: usize,
    connected_clients: Vec<String>,
    volume_handling: VolumeHandling,
    api_client_invalid: bool,
    send_result: bool,
}

pub struct FakeSession {
    session_id: String,
    namespaces: HashSet<String>,
    state: Mutex<FakeSessionState>,
}

impl FakeSession {
    pub fn new(session_id: &str, namespaces: &[&str]) -> Self {
        Self {
            session_id: session_id.to_string(),
            namespaces: namespaces.iter().map(|ns| ns.to_string()).collect(),
            state: Mutex::new(FakeSessionState {
                sent: Vec::new(),
                stop_application_calls: 0,
                stop_calls: 0,
                connected_clients: Vec::new(),
                volume_handling: VolumeHandling {
                    handled: true,
                    should_wait_for_confirmation: true,
                },
                api_client_invalid: false,
                send_result: true,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeSessionState) -> T) -> T {
        let mut state = self.state.lock().expect("fake session lock poisoned");
        f(&mut state)
    }

    pub fn sent_messages(&self) -> Vec<SentCastMessage> {
        self.with_state(|state| state.sent.clone())
    }

    pub fn stop_application_calls(&self) -> usize {
        self.with_state(|state| state.stop_application_calls)
    }

    pub fn stop_calls(&self) -> usize {
        self.with_state(|state| state.stop_calls)
    }

    pub fn connected_clients(&self) -> Vec<String> {
        self.with_state(|state| state.connected_clients.clone())
    }

    pub fn set_volume_handling(&self, handling: VolumeHandling) {
        self.with_state(|state| state.volume_handling = handling);
    }

    pub fn set_api_client_invalid(&self, invalid: bool) {
        self.with_state(|state| state.api_client_invalid = invalid);
    }

    pub fn set_send_result(&self, result: bool) {
        self.with_state(|state| state.send_result = result);
    }
}

impl ReceiverSession for FakeSession {
    fn session_id(&self) -> String {
        self.session_id.clone()
    }

    fn namespaces(&self) -> HashSet<String> {
        self.namespaces.clone()
    }

    fn is_api_client_invalid(&self) -> bool {
        self.with_state(|state| state.api_client_invalid)
    }

    fn send_string_cast_message(
        &self,
        message: &str,
        namespace: &str,
        client_id: &str,
        sequence_number: i32,
    ) -> bool {
        self.with_state(|state| {
            state.sent.push(SentCastMessage {
                message: message.to_string(),
                namespace: namespace.to_string(),
                client_id: client_id.to_string(),
                sequence_number,
            });
            state.send_result
        })
    }

    fn stop_application(&self) {
        self.with_state(|state| state.stop_application_calls += 1);
    }

    fn stop(&self) {
        self.with_state(|state| state.stop_calls += 1);
    }

    fn handle_volume_message(
        &self,
        _volume: &Map<String, Value>,
        _client_id: &str,
        _sequence_number: i32,
    ) -> VolumeHandling {
        self.with_state(|state| state.volume_handling)
    }

    fn on_client_connected(&self, client_id: &str) {
        self.with_state(|state| state.connected_clients.push(client_id.to_string()));
    }
}

/// Client delegate that keeps every delivered envelope.
#[derive(Default)]
pub struct RecordingDelegate {
    registry: ClientRegistry,
    delivered: RefCell<Vec<(String, String)>>,
}

impl RecordingDelegate {
    pub fn with_connected_clients(client_ids: &[&str]) -> Self {
        let mut delegate = Self::default();
        for client_id in client_ids {
            delegate.register(client_id);
            delegate.registry.mark_connected(client_id);
        }
        delegate
    }

    pub fn register(&mut self, client_id: &str) {
        self.registry
            .register(ClientRecord::new(client_id, "https://example.com", 1));
    }

    /// Envelopes delivered to `client_id`, parsed, in delivery order.
    pub fn messages_for(&self, client_id: &str) -> Vec<Value> {
        self.delivered
            .borrow()
            .iter()
            .filter(|(target, _)| target == client_id)
            .map(|(_, message)| serde_json::from_str(message).expect("envelope should be JSON"))
            .collect()
    }
}

impl ClientDelegate for RecordingDelegate {
    fn client_records(&self) -> HashMap<String, ClientRecord> {
        self.registry.snapshot()
    }

    fn mark_client_connected(&mut self, client_id: &str) -> bool {
        self.registry.mark_connected(client_id)
    }

    fn on_message(&self, client_id: &str, message: String) {
        self.delivered
            .borrow_mut()
            .push((client_id.to_string(), message));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Starting(LaunchId),
    Started(String),
    StartFailed,
    Ended,
    Cancelled,
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().expect("listener lock poisoned").clone()
    }

    fn push(&self, event: ListenerEvent) {
        self.events.lock().expect("listener lock poisoned").push(event);
    }
}

impl SessionListener for RecordingListener {
    fn on_session_starting(&self, launch_id: LaunchId) {
        self.push(ListenerEvent::Starting(launch_id));
    }

    fn on_session_started(&self, session: &SharedSession) {
        self.push(ListenerEvent::Started(session.session_id()));
    }

    fn on_session_start_failed(&self) {
        self.push(ListenerEvent::StartFailed);
    }

    fn on_session_ended(&self) {
        self.push(ListenerEvent::Ended);
    }

    fn on_cancelled(&self) {
        self.push(ListenerEvent::Cancelled);
    }
}

/// Launch request whose outcome the test delivers by hand.
pub struct ScriptedLaunch {
    pub listener: Arc<RecordingListener>,
    started: Arc<Mutex<Vec<LaunchId>>>,
}

impl ScriptedLaunch {
    pub fn new() -> Self {
        Self {
            listener: Arc::new(RecordingListener::default()),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A request sharing this script's listener and start log.
    pub fn boxed(&self) -> Box<dyn LaunchRequest> {
        Box::new(ScriptedLaunchRequest {
            listener: Arc::clone(&self.listener),
            started: Arc::clone(&self.started),
        })
    }

    pub fn started_ids(&self) -> Vec<LaunchId> {
        self.started.lock().expect("start log lock poisoned").clone()
    }
}

struct ScriptedLaunchRequest {
    listener: Arc<RecordingListener>,
    started: Arc<Mutex<Vec<LaunchId>>>,
}

impl LaunchRequest for ScriptedLaunchRequest {
    fn start(&mut self, launch_id: LaunchId) {
        self.started
            .lock()
            .expect("start log lock poisoned")
            .push(launch_id);
    }

    fn session_listener(&self) -> Arc<dyn SessionListener> {
        self.listener.clone()
    }
}
