//! Stream supervision: opens and re-opens the long-lived sentry streams,
//! pumping each message into the dispatcher.
//!
//! Every sentry gets four independent loops:
//! - `RecvMessage`: inbound headers/bodies and block announcements.
//! - `RecvUploadMessage`: body/receipt queries. Heavy; the sentry may drop
//!   messages if this loop lags.
//! - `RecvUploadHeadersMessage`: header queries on a dedicated stream, since
//!   header propagation speed matters for network health.
//! - `PeerEvents`: connect/disconnect notifications.
//!
//! One dead sentry must never stall the others, so nothing here synchronizes
//! across loops; the only shared signal is the cancellation token.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sentry_grpc::{
    short_peer_id, InboundMessageStream, MessageId, PeerEventStream, SentryClient,
    MAX_MESSAGE_SIZE,
};

use crate::{HandlerError, MultiClient};

pub const STREAM_RECONNECT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const STREAM_RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);

const RECV_MESSAGE_IDS: [MessageId; 4] = [
    MessageId::BlockHeaders66,
    MessageId::BlockBodies66,
    MessageId::NewBlockHashes66,
    MessageId::NewBlock66,
];

const RECV_UPLOAD_MESSAGE_IDS: [MessageId; 2] =
    [MessageId::GetBlockBodies66, MessageId::GetReceipts66];

const RECV_UPLOAD_HEADERS_MESSAGE_IDS: [MessageId; 1] = [MessageId::GetBlockHeaders66];

/// Exponential retry pacing for one stream: starts at the base, doubles to
/// the cap, resets on any successfully received message.
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: STREAM_RECONNECT_BACKOFF_BASE,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(STREAM_RECONNECT_BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = STREAM_RECONNECT_BACKOFF_BASE;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiClient {
    /// Launch the four stream loops for every sentry. The loops run until the
    /// token is cancelled.
    pub fn start_stream_loops(
        self: &Arc<Self>,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.sentries().len() * 4);
        for sentry in self.sentries().to_vec() {
            handles.push(tokio::spawn(message_stream_loop(
                self.clone(),
                sentry.clone(),
                "RecvMessage",
                RECV_MESSAGE_IDS.to_vec(),
                shutdown.clone(),
            )));
            handles.push(tokio::spawn(message_stream_loop(
                self.clone(),
                sentry.clone(),
                "RecvUploadMessage",
                RECV_UPLOAD_MESSAGE_IDS.to_vec(),
                shutdown.clone(),
            )));
            handles.push(tokio::spawn(message_stream_loop(
                self.clone(),
                sentry.clone(),
                "RecvUploadHeadersMessage",
                RECV_UPLOAD_HEADERS_MESSAGE_IDS.to_vec(),
                shutdown.clone(),
            )));
            handles.push(tokio::spawn(peer_events_loop(
                self.clone(),
                sentry,
                shutdown.clone(),
            )));
        }
        handles
    }
}

/// Subscribe to `ids` on one sentry and pump messages into the dispatcher,
/// re-subscribing with backoff on any failure. The sentry must hold current
/// status data before it accepts a subscription, so fresh status is pushed on
/// every attempt.
pub async fn message_stream_loop(
    cs: Arc<MultiClient>,
    sentry: Arc<dyn SentryClient>,
    stream_name: &'static str,
    ids: Vec<MessageId>,
    shutdown: CancellationToken,
) {
    let mut backoff = Backoff::new();
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let mut stream = match open_message_stream(&cs, sentry.as_ref(), ids.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(stream = stream_name, err = %err, "sentry subscription failed");
                if sleep_or_shutdown(&shutdown, backoff.next_delay()).await {
                    return;
                }
                continue;
            }
        };

        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => return,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(msg)) => {
                    if msg.data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            stream = stream_name,
                            size = msg.data.len(),
                            peer = %short_peer_id(&msg.peer_id),
                            "dropping oversized inbound message"
                        );
                        continue;
                    }
                    backoff.reset();

                    let handled: Result<(), HandlerError> = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        result = cs.handle_inbound_message(&msg, sentry.as_ref()) => result,
                    };
                    if let Err(err) = handled {
                        warn!(
                            stream = stream_name,
                            id = ?msg.id,
                            peer = %short_peer_id(&msg.peer_id),
                            err = %err,
                            "handler failed"
                        );
                    }
                }
                Some(Err(err)) => {
                    debug!(stream = stream_name, err = %err, "stream error, resubscribing");
                    break;
                }
                None => {
                    debug!(stream = stream_name, "stream closed, resubscribing");
                    break;
                }
            }
        }

        if sleep_or_shutdown(&shutdown, backoff.next_delay()).await {
            return;
        }
    }
}

/// Subscribe to peer events on one sentry, with the same reconnect pacing as
/// the message loops.
pub async fn peer_events_loop(
    cs: Arc<MultiClient>,
    sentry: Arc<dyn SentryClient>,
    shutdown: CancellationToken,
) {
    let mut backoff = Backoff::new();
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let mut stream = match open_peer_event_stream(&cs, sentry.as_ref()).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(stream = "PeerEvents", err = %err, "sentry subscription failed");
                if sleep_or_shutdown(&shutdown, backoff.next_delay()).await {
                    return;
                }
                continue;
            }
        };

        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => return,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => {
                    backoff.reset();
                    let handled = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        result = cs.handle_peer_event(&event, sentry.as_ref()) => result,
                    };
                    if let Err(err) = handled {
                        warn!(stream = "PeerEvents", err = %err, "peer event handler failed");
                    }
                }
                Some(Err(err)) => {
                    debug!(stream = "PeerEvents", err = %err, "stream error, resubscribing");
                    break;
                }
                None => {
                    debug!(stream = "PeerEvents", "stream closed, resubscribing");
                    break;
                }
            }
        }

        if sleep_or_shutdown(&shutdown, backoff.next_delay()).await {
            return;
        }
    }
}

async fn open_message_stream(
    cs: &MultiClient,
    sentry: &dyn SentryClient,
    ids: Vec<MessageId>,
) -> Result<InboundMessageStream, HandlerError> {
    let status = cs.status_provider().status_data().await?;
    sentry.set_status(status).await?;
    Ok(sentry.messages(ids).await?)
}

async fn open_peer_event_stream(
    cs: &MultiClient,
    sentry: &dyn SentryClient,
) -> Result<PeerEventStream, HandlerError> {
    let status = cs.status_provider().status_data().await?;
    sentry.set_status(status).await?;
    Ok(sentry.peer_events().await?)
}

/// Wait out a backoff delay; returns true when cancelled instead.
async fn sleep_or_shutdown(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn backoff_resets_to_base() {
        let mut backoff = Backoff::new();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), STREAM_RECONNECT_BACKOFF_BASE);
    }
}
