//! Session lifecycle and coordination
//!
//! - [`registry`] — connected listeners and their pending-request counts
//! - [`state`] — the lifecycle state machine store
//! - [`manager`] — the glue consuming playback events, gating requests
//!   through the filter chain, and driving phase transitions

pub mod manager;
pub mod registry;
pub mod state;

pub use manager::{SessionManager, SessionStatus};
pub use registry::ListenerRegistry;
pub use state::{SessionPhase, StateStore};
