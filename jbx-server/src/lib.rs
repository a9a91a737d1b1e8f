//! jbx session server
//!
//! A single-session participatory jukebox: listeners join, request tracks
//! from the upstream catalog, and follow the session through a shared
//! catalog playlist while the server maintains a virtual playback clock,
//! auto-refills the queue with background music, and streams
//! sequence-numbered notifications to every subscriber.
//!
//! # Architecture
//!
//! - [`playback`] — queue + virtual wall-clock controller, emits events
//! - [`filter`] — ordered predicate chain gating every enqueue
//! - [`bgm`] — background-music provider chain with fallback
//! - [`notify`] — sequence-numbered notification fan-out
//! - [`session`] — lifecycle state machine, listener registry, and the
//!   manager gluing everything together
//! - [`catalog`] — upstream catalog client (track lookup, playlists)
//! - [`api`] — HTTP surface (listener + admin endpoints, SSE stream)

pub mod api;
pub mod bgm;
pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod lastfm;
pub mod notify;
pub mod playback;
pub mod server;
pub mod session;

pub use error::{Error, Result};
