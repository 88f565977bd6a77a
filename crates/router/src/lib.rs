//! Multi-sentry message router.
//!
//! `MultiClient` fans out over one or more sentry processes, each owning the
//! actual peer connections. Four long-lived streams per sentry (see
//! [`supervisor`]) deliver inbound eth/66 messages and peer events; handlers
//! here drive the header/body download engines, answer header/body/receipt
//! queries from the chain store, and push responses and penalties back out
//! through the sentries.

pub mod downloader;
pub mod outbound;
pub mod store;
pub mod supervisor;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::B256;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, trace};

use eth_wire::eth66::{self, BlockAnnounce, GetBlockHeadersQuery, HashOrNumber, RawBlockBody};
use eth_wire::types::BlockHeader;
use eth_wire::WireError;
use sentry_grpc::{
    short_peer_id, InboundMessage, MessageId, OutboundMessage, PeerEvent, PeerEventKind,
    PenaltyKind, SentryClient, SentryError,
};

use downloader::{
    BodyDownloader, ChainSegmentHeader, DisabledBodyDownload, DisabledHeaderDownload,
    DownloaderError, HeaderDownloader, PeerPenalty,
};
use store::{ChainDb, ReceiptsGetter, StatusProvider, StoreError};

pub use downloader::HeaderRequest;

/// How long the download engine waits before retrying a header request.
pub const HEADER_REQUEST_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// How many random peers share one header request once the chain has passed
/// its terminal total difficulty.
pub const HEADER_REQUEST_PEER_SPREAD: u64 = 3;

/// Read-only snapshot of the chain's fork rules, as far as the router needs
/// them.
#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    pub network_id: u64,
    pub genesis_hash: B256,
    pub terminal_total_difficulty_passed: bool,
}

/// Policy choosing how many peers receive a full-block broadcast of the given
/// header. Consulted by the block broadcast scheduler, which sits outside
/// this crate.
pub type MaxBlockBroadcastPeers = Arc<dyn Fn(&BlockHeader) -> usize + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MultiClientOptions {
    /// Fetch and log peer metadata on connect events.
    pub log_peer_info: bool,
    /// Drop all block-download work; header/body engines become stubs.
    pub disable_block_download: bool,
    /// Suppress block propagation, for tests and mocked deployments.
    pub is_mock: bool,
}

/// Errors surfaced by inbound message handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("decode {0}: {1}")]
    Decode(&'static str, #[source] WireError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("downloader: {0}")]
    Downloader(#[from] DownloaderError),
    #[error("sentry: {0}")]
    Sentry(#[from] SentryError),
    #[error("message id {0:?} not implemented")]
    Unimplemented(MessageId),
    #[error("handler panic on {id:?}: {message}")]
    Panic { id: MessageId, message: String },
}

impl HandlerError {
    /// Whether the peer sent bytes we could not decode or that failed the
    /// structural block checks. This is a property of the failure, not of the
    /// message kind, and it is what earns a kick.
    pub fn is_invalid_encoding(&self) -> bool {
        matches!(self, HandlerError::Decode(..))
    }
}

/// Router state shared by all stream loops.
///
/// Lifecycle: construct with every collaborator, run the stream loops, cancel
/// the token to shut down. The sentry set is fixed at construction.
pub struct MultiClient {
    hd: Arc<dyn HeaderDownloader>,
    bd: Arc<dyn BodyDownloader>,
    sentries: Vec<Arc<dyn SentryClient>>,
    chain_config: ChainConfig,
    db: Arc<dyn ChainDb>,
    status_provider: Arc<dyn StatusProvider>,
    receipts: Arc<dyn ReceiptsGetter>,
    /// Gates heavy receipt generation to one job in flight; cache-only hits
    /// bypass it.
    receipt_permits: Semaphore,
    max_block_broadcast_peers: MaxBlockBroadcastPeers,
    log_peer_info: bool,
    send_header_requests_to_multiple_peers: bool,
    disable_block_download: bool,
    is_mock: bool,
}

impl MultiClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn ChainDb>,
        chain_config: ChainConfig,
        sentries: Vec<Arc<dyn SentryClient>>,
        hd: Arc<dyn HeaderDownloader>,
        bd: Arc<dyn BodyDownloader>,
        status_provider: Arc<dyn StatusProvider>,
        receipts: Arc<dyn ReceiptsGetter>,
        max_block_broadcast_peers: MaxBlockBroadcastPeers,
        options: MultiClientOptions,
    ) -> Self {
        let (hd, bd): (Arc<dyn HeaderDownloader>, Arc<dyn BodyDownloader>) =
            if options.disable_block_download {
                (Arc::new(DisabledHeaderDownload), Arc::new(DisabledBodyDownload))
            } else {
                (hd, bd)
            };

        let send_header_requests_to_multiple_peers =
            chain_config.terminal_total_difficulty_passed;

        Self {
            hd,
            bd,
            sentries,
            chain_config,
            db,
            status_provider,
            receipts,
            receipt_permits: Semaphore::new(1),
            max_block_broadcast_peers,
            log_peer_info: options.log_peer_info,
            send_header_requests_to_multiple_peers,
            disable_block_download: options.disable_block_download,
            is_mock: options.is_mock,
        }
    }

    pub fn sentries(&self) -> &[Arc<dyn SentryClient>] {
        &self.sentries
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    pub(crate) fn status_provider(&self) -> &dyn StatusProvider {
        self.status_provider.as_ref()
    }

    /// Broadcast-peer policy for a header, for the external block broadcast
    /// scheduler.
    pub fn max_block_broadcast_peers(&self, header: &BlockHeader) -> usize {
        (self.max_block_broadcast_peers)(header)
    }

    // -----------------------------------------------------------------------
    // Dispatcher
    // -----------------------------------------------------------------------

    /// Handle one inbound message: dispatch by tag behind a panic barrier,
    /// then kick the sender if the failure was an invalid encoding.
    ///
    /// Third-party decoders and engine callbacks may panic on crafted input;
    /// a recovered panic becomes an ordinary handler error so the stream
    /// stays alive.
    pub async fn handle_inbound_message(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        let result = AssertUnwindSafe(self.dispatch_inbound_message(msg, sentry))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::Panic {
                    id: msg.id,
                    message: panic_message(panic.as_ref()),
                })
            });

        if let Err(err) = &result {
            if err.is_invalid_encoding() {
                debug!(
                    err = %err,
                    peer = %short_peer_id(&msg.peer_id),
                    "kicking peer for invalid encoding"
                );
                // Best effort; a failed penalize must not mask the handler error.
                if let Err(send_err) = sentry.penalize_peer(msg.peer_id, PenaltyKind::Kick).await {
                    error!(err = %send_err, "could not send penalty");
                }
            }
        }

        result
    }

    async fn dispatch_inbound_message(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        match msg.id {
            MessageId::NewBlockHashes66 => self.new_block_hashes_66(msg, sentry).await,
            MessageId::BlockHeaders66 => self.block_headers_66(msg, sentry).await,
            MessageId::NewBlock66 => self.new_block_66(msg, sentry).await,
            MessageId::BlockBodies66 => self.block_bodies_66(msg).await,
            MessageId::GetBlockHeaders66 => self.get_block_headers_66(msg, sentry).await,
            MessageId::GetBlockBodies66 => self.get_block_bodies_66(msg, sentry).await,
            MessageId::Receipts66 => self.receipts_66(msg).await,
            MessageId::GetReceipts66 => self.get_receipts_66(msg, sentry).await,
            other => Err(HandlerError::Unimplemented(other)),
        }
    }

    // -----------------------------------------------------------------------
    // Header ingestion
    // -----------------------------------------------------------------------

    async fn new_block_hashes_66(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        if self.disable_block_download {
            return Ok(());
        }
        if self.hd.initial_cycle() && !self.hd.fetching_new() {
            return Ok(());
        }

        let announces = eth66::decode_new_block_hashes(&msg.data)
            .map_err(|e| HandlerError::Decode("NewBlockHashes66", e))?;

        for announce in announces {
            self.hd.save_external_announce(announce.hash);
            if self.hd.has_link(announce.hash) {
                continue;
            }
            let query = GetBlockHeadersQuery {
                origin: HashOrNumber::Hash(announce.hash),
                amount: 1,
                skip: 0,
                reverse: false,
            };
            let request = OutboundMessage {
                id: MessageId::GetBlockHeaders66,
                data: eth66::encode_get_block_headers(rand::random(), &query),
            };
            match sentry.send_message_by_id(msg.peer_id, request).await {
                Ok(_) => {}
                Err(err) if err.is_peer_not_found() => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn block_headers_66(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        let (_request_id, headers) = eth66::decode_block_headers(&msg.data)
            .map_err(|e| HandlerError::Decode("BlockHeaders66", e))?;

        if self.disable_block_download {
            return Ok(());
        }
        if headers.is_empty() {
            debug!(peer = %short_peer_id(&msg.peer_id), "empty BlockHeaders response");
            return Ok(());
        }

        let mut highest_block = 0u64;
        let mut segments = Vec::with_capacity(headers.len());
        for hw in headers {
            highest_block = highest_block.max(hw.header.number);
            segments.push(ChainSegmentHeader::from_raw(hw.header, hw.raw.to_vec()));
        }

        if self.hd.pos_sync() {
            // Reverse height order: PoS ingestion walks from the tip down.
            segments.sort_by(|a, b| b.number.cmp(&a.number));
            let tx = self.db.begin_ro().await?;
            let penalties = self.hd.process_headers_pos(segments, tx.as_ref(), msg.peer_id)?;
            drop(tx);
            if !penalties.is_empty() {
                self.penalize(&penalties).await;
            }
        } else {
            segments.sort_by_key(|s| s.number);
            let can_request_more = self.hd.process_headers(segments, false, msg.peer_id);

            if can_request_more {
                let now = Instant::now();
                let (request, penalties) = self.hd.request_more_headers(now);
                if let Some(request) = request {
                    if let Some(peer) = self.send_header_request(&request).await {
                        self.hd.update_stats(&request, false, peer);
                        self.hd
                            .update_retry_time(&request, now, HEADER_REQUEST_RETRY_TIMEOUT);
                    }
                }
                if !penalties.is_empty() {
                    self.penalize(&penalties).await;
                }
            }
        }

        self.send_peer_min_block(sentry, msg, highest_block).await;
        Ok(())
    }

    async fn new_block_66(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        if self.disable_block_download {
            return Ok(());
        }

        let packet = eth66::decode_new_block(&msg.data)
            .map_err(|e| HandlerError::Decode("NewBlock66", e))?;
        packet
            .sanity_check()
            .map_err(|e| HandlerError::Decode("NewBlock66", e))?;
        packet
            .hash_check()
            .map_err(|e| HandlerError::Decode("NewBlock66", e))?;

        let (segments, penalty) =
            self.hd
                .single_header_as_segment(&packet.header_raw, &packet.header, true)?;

        match penalty {
            None => {
                if let Some(segment) = segments.first() {
                    let (number, hash) = (segment.number, segment.hash);

                    let mut propagate = !self.chain_config.terminal_total_difficulty_passed;
                    // Blocks at or past the first observed PoS height are the
                    // consensus layer's to announce.
                    if let Some(first_pos_height) = self.hd.first_pos_height() {
                        if propagate {
                            propagate = first_pos_height >= number;
                        }
                    }
                    if !self.is_mock && propagate {
                        self.propagate_new_block_hashes(&[BlockAnnounce { hash, number }])
                            .await;
                    }

                    self.hd.process_headers(segments, true, msg.peer_id);
                }
            }
            Some(penalty) => {
                self.penalize(&[PeerPenalty {
                    peer_id: msg.peer_id,
                    penalty,
                }])
                .await;
            }
        }

        let body = RawBlockBody {
            transactions: packet.transactions,
            uncles: packet.uncles,
            withdrawals: packet.withdrawals,
        };
        self.bd.add_to_prefetch(&packet.header, &body);

        self.send_peer_min_block(sentry, msg, packet.header.number).await;
        trace!(
            number = packet.header.number,
            peer = %short_peer_id(&msg.peer_id),
            "NewBlock received"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Body ingestion
    // -----------------------------------------------------------------------

    async fn block_bodies_66(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        if self.disable_block_download {
            return Ok(());
        }

        let (_request_id, bodies) = eth66::decode_block_bodies(&msg.data)
            .map_err(|e| HandlerError::Decode("BlockBodies66", e))?;
        let (transactions, uncles, withdrawals) = eth66::unpack_bodies(bodies);
        if transactions.is_empty() && uncles.is_empty() && withdrawals.is_empty() {
            // No point delivering an empty response.
            return Ok(());
        }
        self.bd.deliver_bodies(
            transactions,
            uncles,
            withdrawals,
            msg.data.len() as u64,
            msg.peer_id,
        );
        Ok(())
    }

    async fn receipts_66(&self, _msg: &InboundMessage) -> Result<(), HandlerError> {
        // Unsolicited receipts are not consumed on this path.
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Query responder
    // -----------------------------------------------------------------------

    async fn get_block_headers_66(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        let (request_id, query) = eth66::decode_get_block_headers(&msg.data)
            .map_err(|e| HandlerError::Decode("GetBlockHeaders66", e))?;

        let tx = self.db.begin_ro().await?;
        let headers = tx.headers_query(&query)?;
        drop(tx);

        // Reply even with an empty list: peers that treat silence as
        // misbehavior would drop us otherwise.
        let reply = OutboundMessage {
            id: MessageId::BlockHeaders66,
            data: eth66::encode_raw_list_packet(request_id, &headers),
        };
        match sentry.send_message_by_id(msg.peer_id, reply).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_peer_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_block_bodies_66(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        let (request_id, hashes) = eth66::decode_hash_list(&msg.data)
            .map_err(|e| HandlerError::Decode("GetBlockBodies66", e))?;

        let tx = self.db.begin_ro().await?;
        let bodies = tx.bodies_query(&hashes)?;
        drop(tx);

        let reply = OutboundMessage {
            id: MessageId::BlockBodies66,
            data: eth66::encode_raw_list_packet(request_id, &bodies),
        };
        match sentry.send_message_by_id(msg.peer_id, reply).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_peer_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_receipts_66(
        &self,
        msg: &InboundMessage,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        let (request_id, hashes) = eth66::decode_hash_list(&msg.data)
            .map_err(|e| HandlerError::Decode("GetReceipts66", e))?;

        let (cached, need_more) = self.receipts.cached_receipts(&hashes);
        let receipts_list = if need_more {
            // Permit before transaction; the permit outlives the rollback.
            let _permit = match self.receipt_permits.acquire().await {
                Ok(permit) => permit,
                // Closed only during shutdown.
                Err(_) => return Ok(()),
            };
            let tx = self.db.begin_ro().await?;
            // `cached` was sampled before the permit wait; a job that just
            // released the permit may have refreshed the cache since. The
            // getter treats the snapshot as a hint, not as current state.
            let list = self.receipts.receipts(tx.as_ref(), &hashes, cached).await?;
            drop(tx);
            list
        } else {
            cached.map(|c| c.encoded).unwrap_or_default()
        };

        let reply = OutboundMessage {
            id: MessageId::Receipts66,
            data: eth66::encode_raw_list_packet(request_id, &receipts_list),
        };
        match sentry.send_message_by_id(msg.peer_id, reply).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_peer_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Peer events
    // -----------------------------------------------------------------------

    /// Record a peer connect/disconnect. With `log_peer_info` set, connect
    /// events trigger a best-effort metadata fetch; its failure never blocks
    /// the stream.
    pub async fn handle_peer_event(
        &self,
        event: &PeerEvent,
        sentry: &dyn SentryClient,
    ) -> Result<(), HandlerError> {
        let peer = short_peer_id(&event.peer_id);

        if !self.log_peer_info {
            trace!(event = ?event.kind, peer = %peer, "sentry peer event");
            return Ok(());
        }

        let mut enode = String::new();
        let mut client_id = String::new();
        let mut capabilities: Vec<String> = Vec::new();
        if event.kind == PeerEventKind::Connect {
            match sentry.peer_by_id(event.peer_id).await {
                Ok(Some(info)) => {
                    enode = info.enode;
                    client_id = info.client_id;
                    capabilities = info.capabilities;
                }
                Ok(None) => {}
                Err(err) => debug!(err = %err, peer = %peer, "peer_by_id failed"),
            }
        }

        trace!(
            event = ?event.kind,
            peer = %peer,
            enode = %enode,
            client = %client_id,
            caps = ?capabilities,
            "sentry peer event"
        );
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
