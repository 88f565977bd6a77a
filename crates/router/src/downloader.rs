//! Collaborator seams for the header and body download engines.
//!
//! The engines are stateful services that live outside this crate; the router
//! only drives them. Methods take `&self` and implementations carry their own
//! synchronization, so one engine instance can be shared with whatever else
//! observes it. The router itself only ever mutates the header engine from
//! the `RecvMessage` loop and the body engine from that loop's NewBlock and
//! BlockBodies paths.

use std::time::{Duration, Instant};

use alloy_primitives::B256;
use thiserror::Error;

use eth_wire::eth66::RawBlockBody;
use eth_wire::types::BlockHeader;
use sentry_grpc::{PeerId, PenaltyKind};

use crate::store::StoreTx;

/// A header captured off the wire together with its exact source bytes.
///
/// `hash` is always the keccak of `header_raw`; the raw bytes are what the
/// peer sent, so the hash survives any re-encoding differences.
#[derive(Debug, Clone)]
pub struct ChainSegmentHeader {
    pub header: BlockHeader,
    pub header_raw: Vec<u8>,
    pub hash: B256,
    pub number: u64,
}

impl ChainSegmentHeader {
    pub fn from_raw(header: BlockHeader, header_raw: Vec<u8>) -> Self {
        let hash = eth_wire::types::hash_raw_header(&header_raw);
        let number = header.number;
        Self {
            header,
            header_raw,
            hash,
            number,
        }
    }
}

/// A follow-up header request chosen by the download engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRequest {
    pub hash: Option<B256>,
    pub number: u64,
    pub length: u64,
    pub skip: u64,
    pub reverse: bool,
}

/// A penalty the download engine wants applied to a peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerPenalty {
    pub peer_id: PeerId,
    pub penalty: PenaltyKind,
}

#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("header verification: {0}")]
    Verification(String),
    #[error("{0}")]
    Internal(String),
}

/// Header download engine operations consumed by the router.
pub trait HeaderDownloader: Send + Sync {
    /// Record that a peer announced this hash.
    fn save_external_announce(&self, hash: B256);

    /// Whether the engine already tracks a link for this hash.
    fn has_link(&self, hash: B256) -> bool;

    fn initial_cycle(&self) -> bool;

    fn fetching_new(&self) -> bool;

    /// Whether header ingestion runs in consensus-layer-driven (reverse
    /// ordered) mode.
    fn pos_sync(&self) -> bool;

    /// Height of the first proof-of-stake block observed, if any.
    fn first_pos_height(&self) -> Option<u64>;

    /// Wrap a single broadcast header into a segment, or name the penalty the
    /// sender earned.
    fn single_header_as_segment(
        &self,
        header_raw: &[u8],
        header: &BlockHeader,
        penalize_pos_blocks: bool,
    ) -> Result<(Vec<ChainSegmentHeader>, Option<PenaltyKind>), DownloaderError>;

    /// Feed sorted segments into the engine. Returns whether the engine can
    /// use another header request right away.
    fn process_headers(
        &self,
        segments: Vec<ChainSegmentHeader>,
        new_block: bool,
        peer_id: PeerId,
    ) -> bool;

    /// Feed reverse-sorted segments in PoS mode. Reads chain state through
    /// the supplied transaction.
    fn process_headers_pos(
        &self,
        segments: Vec<ChainSegmentHeader>,
        tx: &dyn StoreTx,
        peer_id: PeerId,
    ) -> Result<Vec<PeerPenalty>, DownloaderError>;

    /// Ask the engine for the next request worth sending at `now`.
    fn request_more_headers(&self, now: Instant) -> (Option<HeaderRequest>, Vec<PeerPenalty>);

    fn update_stats(&self, request: &HeaderRequest, skeleton: bool, peer_id: PeerId);

    fn update_retry_time(&self, request: &HeaderRequest, now: Instant, timeout: Duration);
}

/// Body download engine operations consumed by the router.
pub trait BodyDownloader: Send + Sync {
    /// Pre-cache a broadcast block's body so it is on hand when the header
    /// becomes canonical.
    fn add_to_prefetch(&self, header: &BlockHeader, body: &RawBlockBody);

    /// Deliver unpacked bodies received from a peer.
    fn deliver_bodies(
        &self,
        transactions: Vec<Vec<Vec<u8>>>,
        uncles: Vec<Vec<BlockHeader>>,
        withdrawals: Vec<Vec<Vec<u8>>>,
        payload_len: u64,
        peer_id: PeerId,
    );
}

/// Stand-in header engine installed when block download is disabled. Every
/// announce handler gates on the flag first, so these only answer the few
/// introspection calls that remain reachable.
pub struct DisabledHeaderDownload;

impl HeaderDownloader for DisabledHeaderDownload {
    fn save_external_announce(&self, _hash: B256) {}

    fn has_link(&self, _hash: B256) -> bool {
        false
    }

    fn initial_cycle(&self) -> bool {
        true
    }

    fn fetching_new(&self) -> bool {
        false
    }

    fn pos_sync(&self) -> bool {
        false
    }

    fn first_pos_height(&self) -> Option<u64> {
        None
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
            None,
        ))
    }

    fn process_headers(
        &self,
        _segments: Vec<ChainSegmentHeader>,
        _new_block: bool,
        _peer_id: PeerId,
    ) -> bool {
        false
    }

    fn process_headers_pos(
        &self,
        _segments: Vec<ChainSegmentHeader>,
        _tx: &dyn StoreTx,
        _peer_id: PeerId,
    ) -> Result<Vec<PeerPenalty>, DownloaderError> {
        Ok(Vec::new())
    }

    fn request_more_headers(&self, _now: Instant) -> (Option<HeaderRequest>, Vec<PeerPenalty>) {
        (None, Vec::new())
    }

    fn update_stats(&self, _request: &HeaderRequest, _skeleton: bool, _peer_id: PeerId) {}

    fn update_retry_time(&self, _request: &HeaderRequest, _now: Instant, _timeout: Duration) {}
}

/// Stand-in body engine installed when block download is disabled.
pub struct DisabledBodyDownload;

impl BodyDownloader for DisabledBodyDownload {
    fn add_to_prefetch(&self, _header: &BlockHeader, _body: &RawBlockBody) {}

    fn deliver_bodies(
        &self,
        _transactions: Vec<Vec<Vec<u8>>>,
        _uncles: Vec<Vec<BlockHeader>>,
        _withdrawals: Vec<Vec<Vec<u8>>>,
        _payload_len: u64,
        _peer_id: PeerId,
    ) {
    }
}
