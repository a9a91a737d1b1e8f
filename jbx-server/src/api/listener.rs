//! Listener-facing endpoints

use super::{JoinRequest, JoinResponse, RequestTrackRequest, RequestTrackResponse};
use crate::notify::{BufferedStream, Hub, NotificationStream};
use crate::server::AppState;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use jbx_common::notification::{Notification, NotificationType};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

/// POST /join
pub async fn join(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, StatusCode> {
    let listener_id = state
        .manager
        .join(&req.display_name, &req.external_user_id)
        .map_err(|_| StatusCode::CONFLICT)?;
    Ok(Json(JoinResponse { listener_id }))
}

/// POST /request
pub async fn request_track(
    State(state): State<AppState>,
    Json(req): Json<RequestTrackRequest>,
) -> Result<Json<RequestTrackResponse>, StatusCode> {
    let outcome = state
        .manager
        .request_track(&req.listener_id, &req.track)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(RequestTrackResponse {
        accepted: outcome.accepted,
        code: outcome
            .code
            .map(|c| c.as_str().to_string())
            .unwrap_or_default(),
        message: state.manager.message_for(&outcome),
    }))
}

/// Bridges the hub to a per-subscriber channel; the SSE task reads the
/// other end.
struct ChannelStream {
    tx: mpsc::Sender<Notification>,
}

#[async_trait]
impl NotificationStream for ChannelStream {
    async fn send(&self, notification: Notification) -> crate::error::Result<()> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| crate::error::Error::Internal("subscriber channel closed".to_string()))
    }
}

/// Unsubscribes when the SSE stream is dropped
struct SubscriptionGuard {
    hub: Arc<Hub>,
    id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!(subscription_id = %self.id, "notification subscriber disconnected");
        self.hub.unsubscribe(self.id);
    }
}

/// GET /notifications
///
/// Subscribes, sends INITIAL_STATE with the reserved sequence number,
/// then flushes any broadcasts buffered during setup. From there the
/// subscriber sees the global stream in order.
pub async fn subscribe_notifications(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let hub = state.manager.notification_hub();
    info!("new notification subscriber");

    let (tx, rx) = mpsc::channel::<Notification>(32);
    let adapter = Arc::new(BufferedStream::new(ChannelStream { tx }));
    let (subscription_id, sequence_no) = hub.subscribe(adapter.clone());

    // Snapshot after subscription: events during this window buffer in
    // the adapter and flush below, so nothing is missed or reordered
    let status = state.manager.status();
    let initial = Notification {
        sequence_no,
        notification_type: NotificationType::InitialState,
        session_info: status.session_info,
        track_info: status.track_info,
    };
    let _ = adapter.inner().send(initial).await;
    let _ = adapter.flush().await;

    let guard = SubscriptionGuard {
        hub,
        id: subscription_id,
    };
    let stream = ReceiverStream::new(rx).filter_map(move |notification| {
        let _held = &guard;
        async move {
            Event::default()
                .event(notification.type_name())
                .json_data(&notification)
                .ok()
                .map(Ok)
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
