//! Outbound gateway: every send toward the sentries goes through here so
//! "peer not found" is recognized uniformly and swallowed, and so not-ready
//! sentries are skipped consistently.

use rand::Rng;
use tracing::{debug, error};

use eth_wire::eth66::{self, BlockAnnounce, GetBlockHeadersQuery, HashOrNumber};
use sentry_grpc::{
    short_peer_id, InboundMessage, MessageId, OutboundMessage, PeerId, SentryClient,
};

use crate::downloader::{HeaderRequest, PeerPenalty};
use crate::{MultiClient, HEADER_REQUEST_PEER_SPREAD};

impl MultiClient {
    /// Send a header request chosen by the download engine.
    ///
    /// Post-TTD the request is spread over a few random peers; before that a
    /// single random peer is picked. Sentries are tried from a random start
    /// index until one reports a recipient. Returns the first peer the
    /// request actually reached.
    pub(crate) async fn send_header_request(&self, request: &HeaderRequest) -> Option<PeerId> {
        let query = GetBlockHeadersQuery {
            origin: match request.hash {
                Some(hash) => HashOrNumber::Hash(hash),
                None => HashOrNumber::Number(request.number),
            },
            amount: request.length,
            skip: request.skip,
            reverse: request.reverse,
        };
        let msg = OutboundMessage {
            id: MessageId::GetBlockHeaders66,
            data: eth66::encode_get_block_headers(rand::random(), &query),
        };

        let max_peers = if self.send_header_requests_to_multiple_peers {
            HEADER_REQUEST_PEER_SPREAD
        } else {
            1
        };

        let sentries = self.sentries();
        let offset = if sentries.len() > 1 {
            rand::thread_rng().gen_range(0..sentries.len())
        } else {
            0
        };

        for i in 0..sentries.len() {
            let sentry = &sentries[(offset + i) % sentries.len()];
            if !sentry.ready() {
                continue;
            }
            match sentry
                .send_message_to_random_peers(max_peers, msg.clone())
                .await
            {
                Ok(peers) => {
                    if let Some(first) = peers.first() {
                        return Some(*first);
                    }
                }
                Err(err) if err.is_peer_not_found() => {}
                Err(err) => debug!(err = %err, "header request send failed"),
            }
        }
        None
    }

    /// Fan penalties out to every ready sentry.
    pub(crate) async fn penalize(&self, penalties: &[PeerPenalty]) {
        for item in penalties {
            for sentry in self.sentries() {
                if !sentry.ready() {
                    continue;
                }
                if let Err(err) = sentry.penalize_peer(item.peer_id, item.penalty).await {
                    if !err.is_peer_not_found() {
                        error!(
                            err = %err,
                            peer = %short_peer_id(&item.peer_id),
                            "could not send penalty"
                        );
                    }
                }
            }
        }
    }

    /// Announce new block hashes through every ready sentry.
    pub(crate) async fn propagate_new_block_hashes(&self, announces: &[BlockAnnounce]) {
        let data = eth66::encode_new_block_hashes(announces);
        for sentry in self.sentries() {
            if !sentry.ready() {
                continue;
            }
            let msg = OutboundMessage {
                id: MessageId::NewBlockHashes66,
                data: data.clone(),
            };
            if let Err(err) = sentry.send_message_to_all(msg).await {
                if !err.is_peer_not_found() {
                    error!(err = %err, "could not propagate block hashes");
                }
            }
        }
    }

    /// Tell the sentry the advertised minimum block for the message's sender.
    /// Failures are logged, never propagated.
    pub(crate) async fn send_peer_min_block(
        &self,
        sentry: &dyn SentryClient,
        msg: &InboundMessage,
        min_block: u64,
    ) {
        if let Err(err) = sentry.peer_min_block(msg.peer_id, min_block).await {
            if !err.is_peer_not_found() {
                error!(
                    err = %err,
                    peer = %short_peer_id(&msg.peer_id),
                    "could not send min block for peer"
                );
            }
        }
    }
}
