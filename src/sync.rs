//! Node synchronization module for LedgerChain
//!
//! This module provides:
//! - The `PeerSource` contract a peer must satisfy to be synced from
//! - An HTTP peer client and an in-process peer over a local ledger
//! - Peer management and selection (failure counts, best peer first)
//! - Block-by-block sync through the normal validator, with peer fallback
//!
//! Sync never bypasses validation. Each applied block is durable on its
//! own, so a failure midway leaves a valid prefix and the next peer
//! continues from the new tip.

use crate::blockchain::{Block, BlockNumber, Blockchain, BlockchainState};
use crate::config::SyncConfig;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What sync needs from a peer.
pub trait PeerSource: Send + Sync {
    /// Stable key for the peer registry.
    fn address(&self) -> String;

    fn last_block_number(&self) -> impl Future<Output = Result<Option<BlockNumber>>> + Send;

    fn last_blockchain_state(&self) -> impl Future<Output = Result<Option<BlockchainState>>> + Send;

    /// Up to `limit` consecutive blocks starting at `start`.
    fn blocks_from(
        &self,
        start: BlockNumber,
        limit: u64,
    ) -> impl Future<Output = Result<Vec<Block>>> + Send;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastBlockNumberResponse {
    pub last_block_number: Option<BlockNumber>,
}

/// Peer reached over HTTP at a base URL such as `http://127.0.0.1:8555`.
///
/// Endpoints: `GET /api/blocks/last-number`, `GET /api/blocks?from=N&limit=K`
/// and `GET /api/blockchain-states/last`, all JSON.
#[derive(Debug, Clone)]
pub struct HttpPeer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl PeerSource for HttpPeer {
    fn address(&self) -> String {
        self.base_url.clone()
    }

    async fn last_block_number(&self) -> Result<Option<BlockNumber>> {
        let response: LastBlockNumberResponse = self
            .client
            .get(self.url("/api/blocks/last-number"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.last_block_number)
    }

    async fn last_blockchain_state(&self) -> Result<Option<BlockchainState>> {
        let response = self
            .client
            .get(self.url("/api/blockchain-states/last"))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(response.error_for_status()?.json().await?)
    }

    async fn blocks_from(&self, start: BlockNumber, limit: u64) -> Result<Vec<Block>> {
        Ok(self
            .client
            .get(self.url("/api/blocks"))
            .query(&[("from", start), ("limit", limit)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

/// Another ledger in the same process, e.g. a second store being seeded.
#[derive(Clone)]
pub struct LocalPeer {
    name: String,
    blockchain: Arc<Blockchain>,
}

impl LocalPeer {
    pub fn new(name: impl Into<String>, blockchain: Arc<Blockchain>) -> Self {
        Self {
            name: name.into(),
            blockchain,
        }
    }
}

impl PeerSource for LocalPeer {
    fn address(&self) -> String {
        self.name.clone()
    }

    async fn last_block_number(&self) -> Result<Option<BlockNumber>> {
        self.blockchain.last_block_number()
    }

    async fn last_blockchain_state(&self) -> Result<Option<BlockchainState>> {
        Ok(self
            .blockchain
            .last_blockchain_state()?
            .map(|state| (*state).clone()))
    }

    async fn blocks_from(&self, start: BlockNumber, limit: u64) -> Result<Vec<Block>> {
        self.blockchain
            .yield_blocks_from(start)?
            .take(limit as usize)
            .collect()
    }
}

/// Peer sync information
#[derive(Debug, Clone)]
pub struct PeerSyncInfo {
    pub address: String,
    pub last_block_number: Option<BlockNumber>,
    pub last_seen: Instant,
    pub blocks_received: u64,
    pub sync_failures: u32,
}

impl PeerSyncInfo {
    pub fn new(address: String, last_block_number: Option<BlockNumber>) -> Self {
        Self {
            address,
            last_block_number,
            last_seen: Instant::now(),
            blocks_received: 0,
            sync_failures: 0,
        }
    }

    /// Check if peer should be considered unreliable
    pub fn is_unreliable(&self) -> bool {
        self.sync_failures >= 3
    }
}

/// Sync statistics
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub total_blocks_synced: u64,
    pub failed_attempts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// Node synchronizer
pub struct NodeSynchronizer {
    peers: Arc<RwLock<HashMap<String, PeerSyncInfo>>>,
    sync_state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
    batch_size: u64,
    timeout: Duration,
}

impl NodeSynchronizer {
    pub fn new(batch_size: u64, timeout: Duration) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            sync_state: Arc::new(RwLock::new(SyncState::Idle)),
            stats: Arc::new(RwLock::new(SyncStats::default())),
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.batch_size, Duration::from_secs(config.timeout_secs))
    }

    /// Registers the peer or refreshes its advertised tip.
    pub async fn update_peer(&self, address: &str, last_block_number: Option<BlockNumber>) {
        let mut peers = self.peers.write().await;
        let peer = peers
            .entry(address.to_string())
            .or_insert_with(|| PeerSyncInfo::new(address.to_string(), last_block_number));
        peer.last_block_number = last_block_number;
        peer.last_seen = Instant::now();
    }

    pub async fn get_peer_info(&self, address: &str) -> Option<PeerSyncInfo> {
        self.peers.read().await.get(address).cloned()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Get the best peer to sync from (highest tip, not unreliable)
    pub async fn get_best_peer(&self) -> Option<String> {
        self.ranked_peers().await.into_iter().next()
    }

    /// Reliable peers by advertised tip, highest first.
    async fn ranked_peers(&self) -> Vec<String> {
        let peers = self.peers.read().await;
        let mut ranked: Vec<_> = peers.values().filter(|p| !p.is_unreliable()).collect();
        ranked.sort_by(|a, b| {
            b.last_block_number
                .cmp(&a.last_block_number)
                .then_with(|| a.address.cmp(&b.address))
        });
        ranked.into_iter().map(|p| p.address.clone()).collect()
    }

    pub async fn get_sync_state(&self) -> SyncState {
        *self.sync_state.read().await
    }

    pub async fn get_stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    async fn set_sync_state(&self, state: SyncState) {
        *self.sync_state.write().await = state;
    }

    async fn record_blocks_received(&self, address: &str, count: u64) {
        if let Some(peer) = self.peers.write().await.get_mut(address) {
            peer.blocks_received += count;
            peer.last_seen = Instant::now();
        }
        self.stats.write().await.total_blocks_synced += count;
    }

    /// Record sync failure for a peer
    pub async fn record_sync_failure(&self, address: &str) {
        if let Some(peer) = self.peers.write().await.get_mut(address) {
            peer.sync_failures += 1;
            if peer.is_unreliable() {
                warn!("Peer {} marked as unreliable", address);
            }
        }
        self.stats.write().await.failed_attempts += 1;
    }

    async fn with_timeout<T>(&self, address: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| LedgerError::Network(format!("Peer {} timed out", address)))?
    }

    /// Pulls every block after the local tip from `peer`, bootstrapping from
    /// the peer's latest blockchain state when the local ledger is empty.
    ///
    /// Returns the number of blocks applied. Storage writes run on the
    /// blocking pool, never on the runtime's worker threads.
    pub async fn sync_from_peer<P: PeerSource>(
        &self,
        blockchain: &Arc<Blockchain>,
        peer: &P,
    ) -> Result<u64> {
        let address = peer.address();
        let remote_last = self.with_timeout(&address, peer.last_block_number()).await?;
        self.update_peer(&address, remote_last).await;

        if !blockchain.is_initialized()? {
            let state = self
                .with_timeout(&address, peer.last_blockchain_state())
                .await?
                .ok_or_else(|| {
                    LedgerError::Network(format!("Peer {} has no blockchain state", address))
                })?;
            info!(
                "Bootstrapping from {} blockchain state at {:?}",
                address, state.last_block_number
            );
            let target = Arc::clone(blockchain);
            tokio::task::spawn_blocking(move || target.add_blockchain_state(state))
                .await
                .map_err(|e| {
                    LedgerError::StorageIo(format!("Bootstrap task failed: {}", e))
                })??;
        }

        let mut applied = 0;
        while let Some(remote_last) = remote_last {
            let next = blockchain.next_block_number()?;
            if next > remote_last {
                break;
            }
            let limit = self.batch_size.min(remote_last - next + 1);
            let blocks = self
                .with_timeout(&address, peer.blocks_from(next, limit))
                .await?;
            if blocks.is_empty() {
                return Err(LedgerError::Network(format!(
                    "Peer {} returned no blocks from {}",
                    address, next
                )));
            }

            // Blocks applied before a bad one stay; the next peer resumes after them.
            let (count, outcome) = apply_blocks(blockchain, blocks).await;
            if count > 0 {
                applied += count;
                self.record_blocks_received(&address, count).await;
                debug!("Applied {} blocks from {} (tip {})", count, address, next + count - 1);
            }
            outcome?;
        }
        Ok(applied)
    }

    /// Syncs from the best peer, falling back to the others on failure.
    ///
    /// A peer whose tip query fails is counted as failed once and skipped
    /// for the rest of the round.
    pub async fn sync_with_peers<P: PeerSource>(
        &self,
        blockchain: &Arc<Blockchain>,
        peers: &[P],
    ) -> Result<u64> {
        if peers.is_empty() {
            debug!("No peers to sync from");
            return Ok(0);
        }
        self.set_sync_state(SyncState::Syncing).await;

        let mut unreachable = HashSet::new();
        let mut last_error = None;
        for peer in peers {
            let address = peer.address();
            match self.with_timeout(&address, peer.last_block_number()).await {
                Ok(last) => self.update_peer(&address, last).await,
                Err(e) => {
                    warn!("Peer {} unreachable: {}", address, e);
                    self.update_peer(&address, None).await;
                    self.record_sync_failure(&address).await;
                    unreachable.insert(address);
                    last_error = Some(e);
                }
            }
        }

        let by_address: HashMap<String, &P> = peers.iter().map(|p| (p.address(), p)).collect();
        let mut total = 0;
        for address in self.ranked_peers().await {
            if unreachable.contains(&address) {
                continue;
            }
            let Some(peer) = by_address.get(&address) else {
                continue;
            };
            match self.sync_from_peer(blockchain, *peer).await {
                Ok(applied) => {
                    total += applied;
                    info!("Synced {} blocks from {}", applied, address);
                    self.set_sync_state(SyncState::Synced).await;
                    return Ok(total);
                }
                Err(e) => {
                    warn!("Sync from {} failed: {}", address, e);
                    self.record_sync_failure(&address).await;
                    last_error = Some(e);
                }
            }
        }

        self.set_sync_state(SyncState::Failed).await;
        Err(last_error.unwrap_or_else(|| {
            LedgerError::Network("No reliable peers to sync from".to_string())
        }))
    }
}

/// Applies `blocks` in order on the blocking pool. Returns how many were
/// applied and the error that stopped the batch, if any.
async fn apply_blocks(blockchain: &Arc<Blockchain>, blocks: Vec<Block>) -> (u64, Result<()>) {
    let blockchain = Arc::clone(blockchain);
    let task = tokio::task::spawn_blocking(move || {
        let mut count = 0;
        for block in blocks {
            if let Err(e) = blockchain.add_block(block) {
                return (count, Err(e));
            }
            count += 1;
        }
        (count, Ok(()))
    });
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => (
            0,
            Err(LedgerError::StorageIo(format!("Block application task failed: {}", e))),
        ),
    }
}

impl Default for NodeSynchronizer {
    fn default() -> Self {
        let config = SyncConfig::default();
        Self::from_config(&config)
    }
}
