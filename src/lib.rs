//! Cast session coordination and message routing.
//!
//! This crate sits between local Cast clients (web page sessions) and one
//! remote receiver session:
//! - [`launch_coordinator`] serializes launches so exactly one session is active
//! - [`message_router`] correlates client requests with receiver replies and
//!   fans receiver events out to connected clients
//! - [`cast_runtime`] drives both from a single-owner event channel

pub mod cast_runtime;
pub mod client_registry;
pub mod config;
pub mod error;
pub mod launch_coordinator;
pub mod logging;
pub mod message_router;
pub mod protocol;
pub mod protocol_utils;
pub mod receiver_session;
pub mod request_tracker;

#[cfg(test)]
mod test_support;

pub use cast_runtime::{CastEvent, CastRuntime, CastRuntimeHandle, OutboundClientMessage};
pub use launch_coordinator::{LaunchId, LaunchRequest, SessionLaunchCoordinator, SessionListener};
pub use message_router::{ClientDelegate, MessageRouter};
pub use receiver_session::{ReceiverSession, SharedSession, VolumeHandling};
