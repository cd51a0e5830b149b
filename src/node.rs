use crate::blockchain::{Block, Blockchain, NodeRole};
use crate::config::{load_config, Config};
use crate::crypto::KeyPair;
use crate::error::{LedgerError, Result};
use crate::request::SignedChangeRequest;
use crate::sync::{HttpPeer, NodeSynchronizer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Installs the fmt subscriber. Only process entry points call this.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
}

/// Process-level wiring of one ledger: configuration, storage and peers.
pub struct LedgerNode {
    pub config: Config,
    pub blockchain: Arc<Blockchain>,
    pub synchronizer: NodeSynchronizer,
    signing_key: Option<KeyPair>,
}

impl LedgerNode {
    pub fn init(config: Config) -> Result<Self> {
        config.validate()?;
        let blockchain = Arc::new(Blockchain::from_config(&config.storage)?);
        let signing_key = config
            .node
            .signing_key
            .as_deref()
            .map(KeyPair::from_secret_hex)
            .transpose()?;
        let synchronizer = NodeSynchronizer::from_config(&config.sync);

        info!(
            "Opened ledger at {} (tip {:?}, {:?} backend)",
            config.storage.path.display(),
            blockchain.last_block_number()?,
            config.storage.backend
        );
        if let Some(key) = &signing_key {
            info!("Signing key configured for {}", key.account_number());
        }
        Ok(Self {
            config,
            blockchain,
            synchronizer,
            signing_key,
        })
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(load_config(path)?)
    }

    /// Role of the configured signing key for the next block; `None` without a key.
    pub fn local_role(&self) -> Result<Option<NodeRole>> {
        match &self.signing_key {
            Some(key) if self.blockchain.is_initialized()? => {
                self.blockchain.get_node_role(&key.account_number(), None)
            }
            _ => Ok(None),
        }
    }

    /// Turns `request` into the next block, signed with the configured key.
    pub fn submit_request(&self, request: SignedChangeRequest) -> Result<Block> {
        let key = self.signing_key.as_ref().ok_or_else(|| {
            LedgerError::Config("node.signing_key is required to produce blocks".to_string())
        })?;
        self.blockchain.add_block_from_request(request, key)
    }

    pub fn http_peers(&self) -> Result<Vec<HttpPeer>> {
        let timeout = Duration::from_secs(self.config.sync.timeout_secs);
        self.config
            .sync
            .peers
            .iter()
            .map(|url| HttpPeer::new(url.clone(), timeout))
            .collect()
    }

    /// One sync round against the configured peers.
    pub async fn sync_once(&self) -> Result<u64> {
        let peers = self.http_peers()?;
        if peers.is_empty() {
            warn!("No peers configured under [sync]");
            return Ok(0);
        }
        self.synchronizer
            .sync_with_peers(&self.blockchain, &peers)
            .await
    }
}
