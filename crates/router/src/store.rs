//! Read-only seams onto chain data: the temporal store, the status-handshake
//! provider and the receipts cache/generator.

use alloy_primitives::B256;
use async_trait::async_trait;
use thiserror::Error;

use eth_wire::eth66::GetBlockHeadersQuery;
use sentry_grpc::StatusData;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("begin read transaction: {0}")]
    Begin(String),
    #[error("read: {0}")]
    Read(String),
}

/// Read-only temporal chain database.
#[async_trait]
pub trait ChainDb: Send + Sync {
    /// Open a read-only transaction. The handle rolls back when dropped, and
    /// it never leaves the handler call that opened it.
    async fn begin_ro(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// One read-only transaction.
///
/// Queries answer raw RLP exactly as stored, so replies preserve the original
/// encoding. Origin/skip/reverse semantics of header queries are the store's
/// concern, including reads that fall through to frozen snapshot segments.
pub trait StoreTx: Send {
    fn headers_query(&self, query: &GetBlockHeadersQuery) -> Result<Vec<Vec<u8>>, StoreError>;

    fn bodies_query(&self, hashes: &[B256]) -> Result<Vec<Vec<u8>>, StoreError>;
}

/// Produces the chain-status handshake payload the sentry requires before it
/// accepts a subscription.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn status_data(&self) -> Result<StatusData, StoreError>;
}

/// Receipt lists already present in the generator's cache, one encoded list
/// per requested block.
#[derive(Debug, Clone, Default)]
pub struct CachedReceipts {
    pub encoded: Vec<Vec<u8>>,
}

/// Receipts cache/generator. The cache-only path is cheap and unguarded; the
/// full path is heavy and runs under the router's single-permit semaphore.
#[async_trait]
pub trait ReceiptsGetter: Send + Sync {
    /// Cache-only lookup. Returns whatever was cached plus whether a full
    /// generation pass is still needed to satisfy the request.
    fn cached_receipts(&self, hashes: &[B256]) -> (Option<CachedReceipts>, bool);

    /// Generate the remaining receipt lists inside `tx`, reusing `cached`
    /// where possible.
    async fn receipts(
        &self,
        tx: &dyn StoreTx,
        hashes: &[B256],
        cached: Option<CachedReceipts>,
    ) -> Result<Vec<Vec<u8>>, StoreError>;
}
