//! Notification hub
//!
//! Fan-out of sequence-numbered notifications to every subscriber.
//! Sequence numbers form one totally ordered stream shared by all
//! subscribers; assignment and subscription registration happen under
//! the same small lock so a subscriber's INITIAL_STATE number can never
//! interleave out of order with a concurrent broadcast. The sends
//! themselves run outside the lock, each bounded by a 500 ms deadline so
//! one stalled stream cannot hold up the rest.
//!
//! # Initial-state protocol
//!
//! A new subscriber must see INITIAL_STATE first and must not miss any
//! broadcast accepted after its subscription. The discipline:
//!
//! 1. Subscribe with a [`BufferedStream`]; this allocates the
//!    INITIAL_STATE sequence number. Broadcasts arriving during setup
//!    are buffered, not sent.
//! 2. Build and send INITIAL_STATE with that number.
//! 3. [`BufferedStream::flush`] releases the buffer in order; later
//!    sends go straight through.

use crate::error::Result;
use async_trait::async_trait;
use jbx_common::notification::Notification;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

const SEND_DEADLINE: Duration = Duration::from_millis(500);

/// A subscriber's notification sink
#[async_trait]
pub trait NotificationStream: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<()>;
}

struct HubInner {
    subscriptions: HashMap<Uuid, Arc<dyn NotificationStream>>,
    sequence_no: u64,
}

/// Notification hub managing subscriptions and broadcasting
pub struct Hub {
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                subscriptions: HashMap::new(),
                sequence_no: 0,
            }),
        }
    }

    /// Register a subscriber. Returns the subscription id and the
    /// sequence number reserved for the subscriber's INITIAL_STATE.
    pub fn subscribe(&self, stream: Arc<dyn NotificationStream>) -> (Uuid, u64) {
        let mut inner = self.inner.lock().unwrap();
        let id = Uuid::new_v4();
        inner.subscriptions.insert(id, stream);
        inner.sequence_no += 1;
        (id, inner.sequence_no)
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscription_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions.remove(&subscription_id);
    }

    /// Assign the next sequence number and send to every subscriber.
    /// Completes when every send finished or timed out; per-subscriber
    /// failures are dropped silently, the subscriber's own stream
    /// lifecycle reaps dead connections.
    pub async fn broadcast(&self, mut notification: Notification) {
        let targets: Vec<(Uuid, Arc<dyn NotificationStream>)> = {
            let mut inner = self.inner.lock().unwrap();
            inner.sequence_no += 1;
            notification.sequence_no = inner.sequence_no;
            inner
                .subscriptions
                .iter()
                .map(|(id, stream)| (*id, Arc::clone(stream)))
                .collect()
        };

        debug!(
            sequence_no = notification.sequence_no,
            notification_type = notification.type_name(),
            subscribers = targets.len(),
            "broadcasting notification"
        );

        let sends = targets.into_iter().map(|(id, stream)| {
            let notification = notification.clone();
            async move {
                match timeout(SEND_DEADLINE, stream.send(notification)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(subscription_id = %id, error = %e, "notification send failed");
                    }
                    Err(_) => {
                        warn!(subscription_id = %id, "notification send timed out");
                    }
                }
            }
        });
        futures::future::join_all(sends).await;
    }

    /// Send to a single subscriber, bypassing sequence assignment.
    pub async fn send(&self, subscription_id: Uuid, notification: Notification) -> Result<()> {
        let stream = {
            let inner = self.inner.lock().unwrap();
            inner.subscriptions.get(&subscription_id).cloned()
        };
        match stream {
            Some(stream) => stream.send(notification).await,
            None => Ok(()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscriptions.len()
    }

    /// Drop all subscriptions.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions.clear();
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

enum BufferedState {
    /// Holding broadcasts until INITIAL_STATE went out
    Buffering(Vec<Notification>),
    /// Pass-through
    Ready,
}

/// Wraps a subscriber stream for the initial-state protocol: sends are
/// buffered until [`flush`](BufferedStream::flush) releases them.
pub struct BufferedStream<S> {
    inner: S,
    state: Mutex<BufferedState>,
}

impl<S: NotificationStream> BufferedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: Mutex::new(BufferedState::Buffering(Vec::new())),
        }
    }

    /// Direct access to the wrapped stream, for sending INITIAL_STATE
    /// ahead of the buffered broadcasts.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Release buffered notifications in order and switch to
    /// pass-through.
    pub async fn flush(&self) -> Result<()> {
        let buffered = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, BufferedState::Ready) {
                BufferedState::Buffering(buffer) => buffer,
                BufferedState::Ready => Vec::new(),
            }
        };
        for notification in buffered {
            self.inner.send(notification).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: NotificationStream> NotificationStream for BufferedStream<S> {
    async fn send(&self, notification: Notification) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if let BufferedState::Buffering(buffer) = &mut *state {
                buffer.push(notification);
                return Ok(());
            }
        }
        self.inner.send(notification).await
    }
}
