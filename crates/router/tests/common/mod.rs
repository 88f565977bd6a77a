//! Recorded-call mocks for the router's collaborator seams.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use eth_wire::eth66::{GetBlockHeadersQuery, RawBlockBody};
use eth_wire::trie;
use eth_wire::types::{empty_uncle_hash, BlockHeader};
use router::downloader::{
    BodyDownloader, ChainSegmentHeader, DownloaderError, HeaderDownloader, HeaderRequest,
    PeerPenalty,
};
use router::store::{
    CachedReceipts, ChainDb, ReceiptsGetter, StatusProvider, StoreError, StoreTx,
};
use router::{ChainConfig, MultiClient, MultiClientOptions};
use sentry_grpc::{
    InboundMessage, InboundMessageStream, MessageId, OutboundMessage, PeerEvent,
    PeerEventStream, PeerId, PeerInfo, PenaltyKind, SentryClient, SentryError, StatusData,
};

pub fn peer(n: u8) -> PeerId {
    let mut id = [0u8; 64];
    id[0] = n;
    PeerId::from_slice(&id)
}

pub fn header(number: u64) -> BlockHeader {
    BlockHeader {
        parent_hash: B256::ZERO,
        uncle_hash: empty_uncle_hash(),
        coinbase: Address::ZERO,
        state_root: B256::ZERO,
        transactions_root: trie::empty_trie_hash(),
        receipts_root: B256::ZERO,
        logs_bloom: [0u8; 256],
        difficulty: U256::from(131_072u64),
        number,
        gas_limit: 8_000_000,
        gas_used: 0,
        timestamp: 1_600_000_000 + number,
        extra_data: Vec::new(),
        mix_hash: B256::ZERO,
        nonce: [0u8; 8],
        base_fee: None,
        withdrawals_root: None,
        blob_gas_used: None,
        excess_blob_gas: None,
        parent_beacon_root: None,
        requests_hash: None,
    }
}

pub fn inbound(id: MessageId, peer_id: PeerId, data: Vec<u8>) -> InboundMessage {
    InboundMessage { id, peer_id, data }
}

// ---------------------------------------------------------------------------
// Sentry mock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum SentCall {
    ById {
        peer_id: PeerId,
        msg_id: MessageId,
        data: Vec<u8>,
    },
    Random {
        max_peers: u64,
        msg_id: MessageId,
        data: Vec<u8>,
    },
    All {
        msg_id: MessageId,
        data: Vec<u8>,
    },
}

#[derive(Default)]
pub struct MockSentry {
    pub sent: Mutex<Vec<SentCall>>,
    pub penalties: Mutex<Vec<(PeerId, PenaltyKind)>>,
    pub min_blocks: Mutex<Vec<(PeerId, u64)>>,
    pub peer_by_id_calls: Mutex<Vec<PeerId>>,
    pub status_count: AtomicUsize,
    pub message_subscriptions: AtomicUsize,
    pub event_subscriptions: AtomicUsize,
    /// Streams handed out by `messages`, in order; once exhausted the mock
    /// returns streams that stay pending.
    pub message_scripts: Mutex<VecDeque<Vec<Result<InboundMessage, SentryError>>>>,
    pub event_scripts: Mutex<VecDeque<Vec<Result<PeerEvent, SentryError>>>>,
    /// Peers reported back by `send_message_to_random_peers`.
    pub random_peers_reply: Mutex<Vec<PeerId>>,
    /// When set, every send fails with a "peer not found" status.
    pub peer_not_found: AtomicBool,
    pub fail_peer_by_id: AtomicBool,
    pub not_ready: AtomicBool,
}

impl MockSentry {
    pub fn sent(&self) -> Vec<SentCall> {
        self.sent.lock().unwrap().clone()
    }

    pub fn penalties(&self) -> Vec<(PeerId, PenaltyKind)> {
        self.penalties.lock().unwrap().clone()
    }

    pub fn min_blocks(&self) -> Vec<(PeerId, u64)> {
        self.min_blocks.lock().unwrap().clone()
    }

    fn peer_gone(&self) -> Option<SentryError> {
        if self.peer_not_found.load(Ordering::SeqCst) {
            Some(SentryError::Rpc(tonic::Status::not_found("peer not found")))
        } else {
            None
        }
    }
}

#[async_trait]
impl SentryClient for MockSentry {
    async fn set_status(&self, _status: StatusData) -> Result<(), SentryError> {
        self.status_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn messages(&self, _ids: Vec<MessageId>) -> Result<InboundMessageStream, SentryError> {
        self.message_subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.message_scripts.lock().unwrap().pop_front() {
            Some(items) => Ok(stream::iter(items).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn peer_events(&self) -> Result<PeerEventStream, SentryError> {
        self.event_subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.event_scripts.lock().unwrap().pop_front() {
            Some(items) => Ok(stream::iter(items).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }

    async fn send_message_by_id(
        &self,
        peer_id: PeerId,
        msg: OutboundMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        if let Some(err) = self.peer_gone() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(SentCall::ById {
            peer_id,
            msg_id: msg.id,
            data: msg.data,
        });
        Ok(vec![peer_id])
    }

    async fn send_message_to_random_peers(
        &self,
        max_peers: u64,
        msg: OutboundMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        if let Some(err) = self.peer_gone() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(SentCall::Random {
            max_peers,
            msg_id: msg.id,
            data: msg.data,
        });
        Ok(self.random_peers_reply.lock().unwrap().clone())
    }

    async fn send_message_to_all(&self, msg: OutboundMessage) -> Result<Vec<PeerId>, SentryError> {
        self.sent.lock().unwrap().push(SentCall::All {
            msg_id: msg.id,
            data: msg.data,
        });
        Ok(Vec::new())
    }

    async fn penalize_peer(
        &self,
        peer_id: PeerId,
        penalty: PenaltyKind,
    ) -> Result<(), SentryError> {
        self.penalties.lock().unwrap().push((peer_id, penalty));
        Ok(())
    }

    async fn peer_min_block(&self, peer_id: PeerId, min_block: u64) -> Result<(), SentryError> {
        self.min_blocks.lock().unwrap().push((peer_id, min_block));
        Ok(())
    }

    async fn peer_by_id(&self, peer_id: PeerId) -> Result<Option<PeerInfo>, SentryError> {
        self.peer_by_id_calls.lock().unwrap().push(peer_id);
        if self.fail_peer_by_id.load(Ordering::SeqCst) {
            return Err(SentryError::Rpc(tonic::Status::unavailable("sentry busy")));
        }
        Ok(Some(PeerInfo {
            enode: "enode://test@127.0.0.1:30303".to_string(),
            client_id: "test-client/v1".to_string(),
            capabilities: vec!["eth/66".to_string()],
        }))
    }

    fn ready(&self) -> bool {
        !self.not_ready.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Downloader mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockHeaderDownload {
    pub links: Mutex<Vec<B256>>,
    pub announces: Mutex<Vec<B256>>,
    pub processed: Mutex<Vec<(Vec<ChainSegmentHeader>, bool, PeerId)>>,
    pub pos_processed: Mutex<Vec<(Vec<ChainSegmentHeader>, PeerId)>>,
    pub stats_updates: Mutex<Vec<(HeaderRequest, PeerId)>>,
    pub retry_updates: Mutex<Vec<(HeaderRequest, Duration)>>,
    pub next_request: Mutex<Option<HeaderRequest>>,
    pub request_penalties: Mutex<Vec<PeerPenalty>>,
    pub pos_penalties: Mutex<Vec<PeerPenalty>>,
    pub can_request_more: bool,
    pub pos_sync: bool,
    pub initial_cycle: bool,
    pub fetching_new: bool,
    pub first_pos: Option<u64>,
    pub single_header_penalty: Option<PenaltyKind>,
    pub panic_on_process: bool,
}

impl MockHeaderDownload {
    pub fn processed_numbers(&self) -> Vec<Vec<u64>> {
        self.processed
            .lock()
            .unwrap()
            .iter()
            .map(|(segments, _, _)| segments.iter().map(|s| s.number).collect())
            .collect()
    }

    pub fn pos_processed_numbers(&self) -> Vec<Vec<u64>> {
        self.pos_processed
            .lock()
            .unwrap()
            .iter()
            .map(|(segments, _)| segments.iter().map(|s| s.number).collect())
            .collect()
    }
}

impl HeaderDownloader for MockHeaderDownload {
    fn save_external_announce(&self, hash: B256) {
        self.announces.lock().unwrap().push(hash);
    }

    fn has_link(&self, hash: B256) -> bool {
        self.links.lock().unwrap().contains(&hash)
    }

    fn initial_cycle(&self) -> bool {
        self.initial_cycle
    }

    fn fetching_new(&self) -> bool {
        self.fetching_new
    }

    fn pos_sync(&self) -> bool {
        self.pos_sync
    }

    fn first_pos_height(&self) -> Option<u64> {
        self.first_pos
    }

    fn single_header_as_segment(
        &self,
        header_raw: &[u8],
        header: &BlockHeader,
        _penalize_pos_blocks: bool,
    ) -> Result<(Vec<ChainSegmentHeader>, Option<PenaltyKind>), DownloaderError> {
        Ok((
            vec![ChainSegmentHeader::from_raw(
                header.clone(),
                header_raw.to_vec(),
            )],
            self.single_header_penalty,
        ))
    }

    fn process_headers(
        &self,
        segments: Vec<ChainSegmentHeader>,
        new_block: bool,
        peer_id: PeerId,
    ) -> bool {
        if self.panic_on_process {
            panic!("engine exploded");
        }
        self.processed
            .lock()
            .unwrap()
            .push((segments, new_block, peer_id));
        self.can_request_more
    }

    fn process_headers_pos(
        &self,
        segments: Vec<ChainSegmentHeader>,
        _tx: &dyn StoreTx,
        peer_id: PeerId,
    ) -> Result<Vec<PeerPenalty>, DownloaderError> {
        self.pos_processed.lock().unwrap().push((segments, peer_id));
        Ok(self.pos_penalties.lock().unwrap().clone())
    }

    fn request_more_headers(&self, _now: Instant) -> (Option<HeaderRequest>, Vec<PeerPenalty>) {
        (
            self.next_request.lock().unwrap().take(),
            self.request_penalties.lock().unwrap().clone(),
        )
    }

    fn update_stats(&self, request: &HeaderRequest, _skeleton: bool, peer_id: PeerId) {
        self.stats_updates.lock().unwrap().push((*request, peer_id));
    }

    fn update_retry_time(&self, request: &HeaderRequest, _now: Instant, timeout: Duration) {
        self.retry_updates.lock().unwrap().push((*request, timeout));
    }
}

#[derive(Default)]
pub struct MockBodyDownload {
    pub prefetched: Mutex<Vec<(u64, usize)>>,
    pub delivered: Mutex<Vec<(usize, u64, PeerId)>>,
}

impl BodyDownloader for MockBodyDownload {
    fn add_to_prefetch(&self, header: &BlockHeader, body: &RawBlockBody) {
        self.prefetched
            .lock()
            .unwrap()
            .push((header.number, body.transactions.len()));
    }

    fn deliver_bodies(
        &self,
        transactions: Vec<Vec<Vec<u8>>>,
        _uncles: Vec<Vec<BlockHeader>>,
        _withdrawals: Vec<Vec<Vec<u8>>>,
        payload_len: u64,
        peer_id: PeerId,
    ) {
        self.delivered
            .lock()
            .unwrap()
            .push((transactions.len(), payload_len, peer_id));
    }
}

// ---------------------------------------------------------------------------
// Store mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemDbState {
    pub headers: Mutex<Vec<Vec<u8>>>,
    pub bodies: Mutex<Vec<Vec<u8>>>,
    pub header_queries: Mutex<Vec<GetBlockHeadersQuery>>,
    pub begin_count: AtomicUsize,
    pub active_tx: AtomicUsize,
    pub max_active_tx: AtomicUsize,
    pub fail_begin: AtomicBool,
}

pub struct MemDb {
    pub state: Arc<MemDbState>,
}

impl MemDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemDbState::default()),
        }
    }
}

pub struct MemTx {
    state: Arc<MemDbState>,
}

impl Drop for MemTx {
    fn drop(&mut self) {
        self.state.active_tx.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainDb for MemDb {
    async fn begin_ro(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        if self.state.fail_begin.load(Ordering::SeqCst) {
            return Err(StoreError::Begin("mock begin failure".to_string()));
        }
        self.state.begin_count.fetch_add(1, Ordering::SeqCst);
        let active = self.state.active_tx.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active_tx.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(MemTx {
            state: self.state.clone(),
        }))
    }
}

impl StoreTx for MemTx {
    fn headers_query(&self, query: &GetBlockHeadersQuery) -> Result<Vec<Vec<u8>>, StoreError> {
        self.state.header_queries.lock().unwrap().push(*query);
        Ok(self.state.headers.lock().unwrap().clone())
    }

    fn bodies_query(&self, _hashes: &[B256]) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self.state.bodies.lock().unwrap().clone())
    }
}

pub struct StaticStatus;

#[async_trait]
impl StatusProvider for StaticStatus {
    async fn status_data(&self) -> Result<StatusData, StoreError> {
        Ok(StatusData {
            network_id: 1,
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct MockReceipts {
    pub cached: Mutex<Option<CachedReceipts>>,
    pub need_more: AtomicBool,
    pub generated: Mutex<Vec<Vec<u8>>>,
    pub generate_calls: AtomicUsize,
    /// When set, `receipts` consumes one permit before returning, letting a
    /// test hold generation open.
    pub gate: Mutex<Option<Arc<tokio::sync::Semaphore>>>,
}

#[async_trait]
impl ReceiptsGetter for MockReceipts {
    fn cached_receipts(&self, _hashes: &[B256]) -> (Option<CachedReceipts>, bool) {
        (
            self.cached.lock().unwrap().clone(),
            self.need_more.load(Ordering::SeqCst),
        )
    }

    async fn receipts(
        &self,
        _tx: &dyn StoreTx,
        _hashes: &[B256],
        _cached: Option<CachedReceipts>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| StoreError::Read("gate closed".to_string()))?;
            permit.forget();
        }
        Ok(self.generated.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Rig
// ---------------------------------------------------------------------------

pub struct Rig {
    pub cs: Arc<MultiClient>,
    pub sentries: Vec<Arc<MockSentry>>,
    pub hd: Arc<MockHeaderDownload>,
    pub bd: Arc<MockBodyDownload>,
    pub db: Arc<MemDbState>,
    pub receipts: Arc<MockReceipts>,
}

impl Rig {
    pub fn sentry(&self) -> &Arc<MockSentry> {
        &self.sentries[0]
    }
}

pub fn rig(hd: MockHeaderDownload, options: MultiClientOptions) -> Rig {
    rig_with(hd, options, ChainConfig::default(), 1, MockReceipts::default())
}

pub fn rig_with(
    hd: MockHeaderDownload,
    options: MultiClientOptions,
    chain_config: ChainConfig,
    sentry_count: usize,
    receipts: MockReceipts,
) -> Rig {
    let hd = Arc::new(hd);
    let bd = Arc::new(MockBodyDownload::default());
    let receipts = Arc::new(receipts);
    let db = MemDb::new();
    let db_state = db.state.clone();

    let sentries: Vec<Arc<MockSentry>> = (0..sentry_count)
        .map(|_| Arc::new(MockSentry::default()))
        .collect();
    let sentry_clients: Vec<Arc<dyn SentryClient>> = sentries
        .iter()
        .map(|s| s.clone() as Arc<dyn SentryClient>)
        .collect();

    let cs = Arc::new(MultiClient::new(
        Arc::new(db),
        chain_config,
        sentry_clients,
        hd.clone(),
        bd.clone(),
        Arc::new(StaticStatus),
        receipts.clone(),
        // Height-derived policy so tests can tell which header reached it.
        Arc::new(|header: &BlockHeader| header.number as usize),
        options,
    ));

    Rig {
        cs,
        sentries,
        hd,
        bd,
        db: db_state,
        receipts,
    }
}
