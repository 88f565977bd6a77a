use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use eth_wire::eth66::GetBlockHeadersQuery;
use eth_wire::types::BlockHeader;
use router::downloader::{DisabledBodyDownload, DisabledHeaderDownload};
use router::store::{
    CachedReceipts, ChainDb, ReceiptsGetter, StatusProvider, StoreError, StoreTx,
};
use router::{ChainConfig, MultiClient, MultiClientOptions};
use sentry_grpc::{RemoteSentry, SentryClient, StatusData};

use crate::config::RuntimeConfig;

/// Blocks broadcast to at most this many peers; consulted by an external
/// scheduler, kept as the standalone default policy.
const MAX_BROADCAST_PEERS: usize = 4;

/// Standalone router node.
///
/// Runs the stream loops against the configured sentries in responder-only
/// mode: queries are answered from an empty store (always with a reply, even
/// if empty), invalid traffic is penalized, and block download stays
/// disabled. A full node embeds `MultiClient` with its real store and
/// download engines instead.
pub struct Node {
    config: RuntimeConfig,
}

impl Node {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("starting sentry-router");

        let mut sentries: Vec<Arc<dyn SentryClient>> = Vec::with_capacity(self.config.sentries.len());
        for addr in &self.config.sentries {
            let sentry = RemoteSentry::connect(addr)?;
            info!(addr = %addr, "sentry channel created");
            sentries.push(Arc::new(sentry));
        }

        let chain_config = ChainConfig {
            network_id: self.config.network_id,
            genesis_hash: self.config.genesis_hash,
            terminal_total_difficulty_passed: self.config.ttd_passed,
        };

        let status = StatusData {
            network_id: self.config.network_id,
            best_hash: self.config.genesis_hash,
            genesis_hash: self.config.genesis_hash,
            ..Default::default()
        };

        let client = Arc::new(MultiClient::new(
            Arc::new(EmptyDb),
            chain_config,
            sentries,
            Arc::new(DisabledHeaderDownload),
            Arc::new(DisabledBodyDownload),
            Arc::new(StaticStatusProvider { status }),
            Arc::new(EmptyReceipts),
            Arc::new(|_header: &BlockHeader| MAX_BROADCAST_PEERS),
            MultiClientOptions {
                log_peer_info: self.config.log_peer_info,
                disable_block_download: true,
                is_mock: false,
            },
        ));

        let shutdown = CancellationToken::new();
        let handles = client.start_stream_loops(&shutdown);
        info!(sentries = self.config.sentries.len(), "stream loops started");

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// Store with no chain data. Every query answers an empty list, which the
/// router still turns into a well-formed reply.
struct EmptyDb;

struct EmptyTx;

#[async_trait]
impl ChainDb for EmptyDb {
    async fn begin_ro(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(EmptyTx))
    }
}

impl StoreTx for EmptyTx {
    fn headers_query(&self, _query: &GetBlockHeadersQuery) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(Vec::new())
    }

    fn bodies_query(&self, _hashes: &[B256]) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(Vec::new())
    }
}

struct StaticStatusProvider {
    status: StatusData,
}

#[async_trait]
impl StatusProvider for StaticStatusProvider {
    async fn status_data(&self) -> Result<StatusData, StoreError> {
        Ok(self.status.clone())
    }
}

struct EmptyReceipts;

#[async_trait]
impl ReceiptsGetter for EmptyReceipts {
    fn cached_receipts(&self, _hashes: &[B256]) -> (Option<CachedReceipts>, bool) {
        (None, false)
    }

    async fn receipts(
        &self,
        _tx: &dyn StoreTx,
        _hashes: &[B256],
        _cached: Option<CachedReceipts>,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(Vec::new())
    }
}
