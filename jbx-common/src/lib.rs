//! Shared domain model and wire types for jbx
//!
//! This crate holds everything both the server and the CLI front-ends need
//! to agree on:
//!
//! - **Domain entities**: [`track::Track`], [`track::QueuedTrack`],
//!   [`listener::ListenerSession`]
//! - **Wire types**: [`notification::Notification`] and the session/track
//!   snapshots it carries
//!
//! No I/O lives here; the server crate owns all runtime behavior.

pub mod listener;
pub mod notification;
pub mod track;
