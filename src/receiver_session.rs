//! Interface of the connected receiver session the coordinator and router drive.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Shared handle to the active receiver session.
pub type SharedSession = Arc<dyn ReceiverSession>;

/// Result of handing a `SET_VOLUME` request to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeHandling {
    pub handled: bool,
    /// The receiver will confirm with a volume-changed notification.
    pub should_wait_for_confirmation: bool,
}

/// One connected remote playback session.
///
/// Implementations own the transport; every method is expected to return
/// without blocking on the receiver. Asynchronous outcomes are reported back
/// through the coordinator and router callbacks.
pub trait ReceiverSession: Send + Sync {
    fn session_id(&self) -> String;

    /// Namespaces currently advertised by the receiver application.
    fn namespaces(&self) -> HashSet<String>;

    fn is_api_client_invalid(&self) -> bool;

    fn send_string_cast_message(
        &self,
        message: &str,
        namespace: &str,
        client_id: &str,
        sequence_number: i32,
    ) -> bool;

    /// Asks the receiver to stop the running application.
    fn stop_application(&self);

    /// Tears down the session; completion arrives as a session-ended event.
    fn stop(&self);

    fn handle_volume_message(
        &self,
        volume: &Map<String, Value>,
        client_id: &str,
        sequence_number: i32,
    ) -> VolumeHandling;

    fn on_client_connected(&self, client_id: &str);
}
