//! Single-owner event loop driving the launch coordinator and message router.
//!
//! Every entry point (client traffic, receiver callbacks, launch outcomes) is
//! posted as a [`CastEvent`] and applied on the runtime's own thread, so the
//! correlation tables and coordinator state are only ever touched by one owner.

use std::collections::HashMap;
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::mpsc::{
    error::TryRecvError, unbounded_channel, UnboundedReceiver, UnboundedSender,
};

use crate::client_registry::ClientRegistry;
use crate::config::{Config, RuntimeConfig};
use crate::launch_coordinator::{LaunchId, LaunchRequest, SessionLaunchCoordinator};
use crate::message_router::{ClientDelegate, MessageRouter};
use crate::protocol::ClientRecord;
use crate::receiver_session::SharedSession;

/// Input accepted by [`CastRuntime`].
pub enum CastEvent {
    RequestLaunch(Box<dyn LaunchRequest>),
    SessionStarted {
        launch_id: LaunchId,
        session: SharedSession,
    },
    SessionStartFailed {
        launch_id: LaunchId,
    },
    SessionEnded,
    ClientRegistered(ClientRecord),
    ClientDetached {
        client_id: String,
    },
    ClientMessage(String),
    ReceiverMessage {
        namespace: String,
        message: String,
    },
    ApplicationStopped,
    VolumeChanged,
}

/// One envelope addressed to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundClientMessage {
    pub client_id: String,
    pub message: String,
}

/// Client delegate backed by the runtime's registry and outbound channel.
pub struct BusClientDelegate {
    registry: ClientRegistry,
    outbound: UnboundedSender<OutboundClientMessage>,
}

impl BusClientDelegate {
    pub fn new(outbound: UnboundedSender<OutboundClientMessage>) -> Self {
        Self {
            registry: ClientRegistry::new(),
            outbound,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.registry
    }
}

impl ClientDelegate for BusClientDelegate {
    fn client_records(&self) -> HashMap<String, ClientRecord> {
        self.registry.snapshot()
    }

    fn mark_client_connected(&mut self, client_id: &str) -> bool {
        self.registry.mark_connected(client_id)
    }

    fn on_message(&self, client_id: &str, message: String) {
        let outbound = OutboundClientMessage {
            client_id: client_id.to_string(),
            message,
        };
        if self.outbound.send(outbound).is_err() {
            debug!(
                "CastRuntime: outbound channel closed; dropping message for {}",
                client_id
            );
        }
    }
}

/// Cloneable sender side of a [`CastRuntime`].
#[derive(Clone)]
pub struct CastRuntimeHandle {
    events: UnboundedSender<CastEvent>,
}

impl CastRuntimeHandle {
    /// Posts an event. Returns `false` once the runtime has shut down.
    pub fn send(&self, event: CastEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn request_launch(&self, request: Box<dyn LaunchRequest>) -> bool {
        self.send(CastEvent::RequestLaunch(request))
    }

    pub fn session_started(&self, launch_id: LaunchId, session: SharedSession) -> bool {
        self.send(CastEvent::SessionStarted { launch_id, session })
    }

    pub fn session_start_failed(&self, launch_id: LaunchId) -> bool {
        self.send(CastEvent::SessionStartFailed { launch_id })
    }

    pub fn client_message(&self, message: impl Into<String>) -> bool {
        self.send(CastEvent::ClientMessage(message.into()))
    }

    pub fn receiver_message(
        &self,
        namespace: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        self.send(CastEvent::ReceiverMessage {
            namespace: namespace.into(),
            message: message.into(),
        })
    }
}

pub struct CastRuntime {
    events: UnboundedReceiver<CastEvent>,
    coordinator: SessionLaunchCoordinator,
    router: MessageRouter<BusClientDelegate>,
    config: RuntimeConfig,
    last_expiry_sweep_at: Instant,
}

impl CastRuntime {
    /// Creates a runtime with its event handle and the outbound client stream.
    pub fn new(
        config: &Config,
    ) -> (
        Self,
        CastRuntimeHandle,
        UnboundedReceiver<OutboundClientMessage>,
    ) {
        let (event_tx, event_rx) = unbounded_channel();
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let runtime = Self {
            events: event_rx,
            coordinator: SessionLaunchCoordinator::new(),
            router: MessageRouter::new(BusClientDelegate::new(outbound_tx), &config.router),
            config: config.runtime.clone(),
            last_expiry_sweep_at: Instant::now(),
        };
        (runtime, CastRuntimeHandle { events: event_tx }, outbound_rx)
    }

    pub fn coordinator(&self) -> &SessionLaunchCoordinator {
        &self.coordinator
    }

    pub fn router(&self) -> &MessageRouter<BusClientDelegate> {
        &self.router
    }

    pub fn handle_event(&mut self, event: CastEvent) {
        match event {
            CastEvent::RequestLaunch(request) => {
                let launch_id = self.coordinator.request_launch(request);
                debug!("CastRuntime: accepted launch {}", launch_id);
            }
            CastEvent::SessionStarted { launch_id, session } => {
                if self
                    .coordinator
                    .on_session_started(launch_id, session.clone())
                    .is_ok()
                {
                    self.router.on_session_created(session);
                }
            }
            CastEvent::SessionStartFailed { launch_id } => {
                let _ = self.coordinator.on_session_start_failed(launch_id);
            }
            CastEvent::SessionEnded => {
                if self.coordinator.on_session_ended().is_ok() {
                    self.router.on_session_ended();
                }
            }
            CastEvent::ClientRegistered(record) => {
                self.router.delegate_mut().registry_mut().register(record);
            }
            CastEvent::ClientDetached { client_id } => {
                self.router.on_client_detached(&client_id);
                self.router.delegate_mut().registry_mut().detach(&client_id);
            }
            CastEvent::ClientMessage(raw) => match self.router.handle_session_message_str(&raw) {
                Ok(true) => {}
                Ok(false) => debug!("CastRuntime: client message not handled"),
                Err(err) => warn!("CastRuntime: rejected client message: {}", err),
            },
            CastEvent::ReceiverMessage { namespace, message } => {
                self.router.on_message_received(&namespace, &message);
            }
            CastEvent::ApplicationStopped => self.router.on_application_stopped(),
            CastEvent::VolumeChanged => self.router.on_volume_changed(),
        }
    }

    /// Applies every queued event. Returns `true` once all handles are gone.
    pub fn process_pending_events(&mut self) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    fn sweep_expired_if_needed(&mut self) {
        if self.last_expiry_sweep_at.elapsed() < self.config.expiry_sweep_interval() {
            return;
        }
        let now = Instant::now();
        self.last_expiry_sweep_at = now;
        let evicted = self.router.expire_stale(now);
        if evicted > 0 {
            debug!("CastRuntime: evicted {} stale requests", evicted);
        }
    }

    /// Starts the blocking runtime loop; returns when every handle is dropped.
    pub fn run(&mut self) {
        info!("CastRuntime: started");
        loop {
            if self.process_pending_events() {
                break;
            }
            self.sweep_expired_if_needed();
            thread::sleep(self.config.idle_loop_sleep());
        }
        info!("CastRuntime: stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::{CastEvent, CastRuntime, OutboundClientMessage};
    use crate::config::Config;
    use crate::launch_coordinator::LaunchPhase;
    use crate::protocol::{ClientRecord, CAST_NAMESPACE_MEDIA, INVALID_SEQUENCE_NUMBER};
    use crate::test_support::{FakeSession, ListenerEvent, ScriptedLaunch};

    fn drain(outbound: &mut UnboundedReceiver<OutboundClientMessage>) -> Vec<(String, Value)> {
        let mut messages = Vec::new();
        while let Ok(message) = outbound.try_recv() {
            let parsed = serde_json::from_str(&message.message).expect("envelope should be JSON");
            messages.push((message.client_id, parsed));
        }
        messages
    }

    fn connect_client(runtime: &mut CastRuntime, client_id: &str) {
        runtime.handle_event(CastEvent::ClientRegistered(ClientRecord::new(
            client_id,
            "https://example.com",
            1,
        )));
        runtime.handle_event(CastEvent::ClientMessage(format!(
            r#"{{"type":"client_connect","clientId":"{client_id}"}}"#
        )));
    }

    #[test]
    fn test_started_session_is_bound_into_router() {
        let (mut runtime, handle, _outbound) = CastRuntime::new(&Config::default());
        let launch = ScriptedLaunch::new();
        connect_client(&mut runtime, "A");

        assert!(handle.request_launch(launch.boxed()));
        runtime.process_pending_events();
        let launch_id = launch.started_ids()[0];
        let session = Arc::new(FakeSession::new("s-1", &[]));
        handle.session_started(launch_id, session.clone());
        runtime.process_pending_events();

        assert_eq!(runtime.coordinator().phase(), LaunchPhase::Running);
        assert_eq!(runtime.router().bound_session_id(), Some("s-1".to_string()));
        assert_eq!(session.connected_clients(), vec!["A".to_string()]);
    }

    #[test]
    fn test_replacement_launch_runs_after_previous_session_ends() {
        let (mut runtime, handle, _outbound) = CastRuntime::new(&Config::default());
        let first = ScriptedLaunch::new();
        handle.request_launch(first.boxed());
        runtime.process_pending_events();
        let first_session = Arc::new(FakeSession::new("s-1", &[]));
        handle.session_started(first.started_ids()[0], first_session.clone());

        let second = ScriptedLaunch::new();
        handle.request_launch(second.boxed());
        runtime.process_pending_events();
        assert_eq!(first_session.stop_calls(), 1);
        assert!(second.started_ids().is_empty());

        handle.send(CastEvent::SessionEnded);
        runtime.process_pending_events();

        assert_eq!(runtime.router().bound_session_id(), None);
        assert_eq!(second.started_ids().len(), 1);
        assert_eq!(
            second.listener.events(),
            vec![ListenerEvent::Starting(second.started_ids()[0])]
        );
    }

    #[test]
    fn test_client_traffic_flows_through_outbound_channel() {
        let (mut runtime, handle, mut outbound) = CastRuntime::new(&Config::default());
        connect_client(&mut runtime, "A");
        connect_client(&mut runtime, "B");
        let launch = ScriptedLaunch::new();
        handle.request_launch(launch.boxed());
        runtime.process_pending_events();
        let session = Arc::new(FakeSession::new("s-1", &[]));
        handle.session_started(launch.started_ids()[0], session.clone());
        runtime.process_pending_events();

        handle.client_message(
            r#"{"type":"v2_message","clientId":"A","sequenceNumber":1,"message":{"type":"STOP"}}"#,
        );
        handle.send(CastEvent::ApplicationStopped);
        runtime.process_pending_events();

        assert_eq!(session.stop_application_calls(), 1);
        let mut delivered = drain(&mut outbound);
        delivered.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0, "A");
        assert_eq!(delivered[0].1["sequenceNumber"], 1);
        assert_eq!(delivered[1].0, "B");
        assert_eq!(delivered[1].1["sequenceNumber"], INVALID_SEQUENCE_NUMBER);
    }

    #[test]
    fn test_session_end_before_application_stopped_still_answers_requesters() {
        let (mut runtime, handle, mut outbound) = CastRuntime::new(&Config::default());
        connect_client(&mut runtime, "A");
        connect_client(&mut runtime, "B");
        let launch = ScriptedLaunch::new();
        handle.request_launch(launch.boxed());
        runtime.process_pending_events();
        handle.session_started(launch.started_ids()[0], Arc::new(FakeSession::new("s-1", &[])));

        handle.client_message(
            r#"{"type":"v2_message","clientId":"A","sequenceNumber":1,"message":{"type":"STOP"}}"#,
        );
        handle.client_message(
            r#"{"type":"v2_message","clientId":"A","sequenceNumber":2,"message":{"type":"PLAY"}}"#,
        );
        handle.send(CastEvent::SessionEnded);
        handle.send(CastEvent::ApplicationStopped);
        runtime.process_pending_events();

        let mut delivered = drain(&mut outbound);
        delivered.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(delivered.len(), 3);
        assert_eq!(delivered[0].0, "A");
        assert_eq!(delivered[0].1["type"], "remove_session");
        assert_eq!(delivered[0].1["sequenceNumber"], 1);
        assert_eq!(delivered[0].1["message"], "s-1");
        assert_eq!(delivered[1].0, "A");
        assert_eq!(delivered[1].1["type"], "error");
        assert_eq!(delivered[1].1["sequenceNumber"], 2);
        assert_eq!(delivered[2].0, "B");
        assert_eq!(delivered[2].1["sequenceNumber"], INVALID_SEQUENCE_NUMBER);
        assert_eq!(delivered[2].1["message"], "s-1");
        assert_eq!(runtime.router().tracker().pending_request_count(), 0);
    }

    #[test]
    fn test_malformed_client_message_is_rejected_without_output() {
        let (mut runtime, handle, mut outbound) = CastRuntime::new(&Config::default());
        connect_client(&mut runtime, "A");

        handle.client_message("{not json");
        handle.client_message(r#"{"type":"v2_message","clientId":"A"}"#);
        runtime.process_pending_events();

        assert!(drain(&mut outbound).is_empty());
    }

    #[test]
    fn test_receiver_status_reaches_connected_clients() {
        let (mut runtime, handle, mut outbound) = CastRuntime::new(&Config::default());
        connect_client(&mut runtime, "A");
        let launch = ScriptedLaunch::new();
        handle.request_launch(launch.boxed());
        runtime.process_pending_events();
        handle.session_started(launch.started_ids()[0], Arc::new(FakeSession::new("s-1", &[])));

        handle.receiver_message(CAST_NAMESPACE_MEDIA, r#"{"type":"MEDIA_STATUS","status":[]}"#);
        runtime.process_pending_events();

        let delivered = drain(&mut outbound);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1["type"], "v2_message");
    }

    #[test]
    fn test_detached_client_is_forgotten() {
        let (mut runtime, handle, mut outbound) = CastRuntime::new(&Config::default());
        connect_client(&mut runtime, "A");
        let launch = ScriptedLaunch::new();
        handle.request_launch(launch.boxed());
        runtime.process_pending_events();
        handle.session_started(launch.started_ids()[0], Arc::new(FakeSession::new("s-1", &[])));

        handle.send(CastEvent::ClientDetached {
            client_id: "A".to_string(),
        });
        runtime.process_pending_events();

        let delivered = drain(&mut outbound);
        assert_eq!(delivered[0].1["type"], "disconnect_session");
        assert!(runtime.router().delegate().registry().get("A").is_none());
    }

    #[test]
    fn test_run_returns_when_all_handles_are_dropped() {
        let (mut runtime, handle, _outbound) = CastRuntime::new(&Config::default());
        drop(handle);

        runtime.run();

        assert_eq!(runtime.coordinator().phase(), LaunchPhase::Idle);
    }
}
