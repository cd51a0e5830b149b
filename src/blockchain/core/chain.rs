use crate::cache::RoleCache;
use crate::config::StorageConfig;
use crate::crypto::{hash_normalized, verify_signature, AccountNumber, Hash, KeyPair, Signature};
use crate::error::LedgerError;
use crate::persistence::{open_backend, InMemoryPersistence, Persistence};
use crate::request::{SignedChangeRequest, SignedChangeRequestMessage};
use crate::storage::{BlockCursor, ChunkMeta, Direction, StateMeta};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::schedule::ScheduleIndex;
use super::state::{AccountState, BlockchainState};

pub type BlockNumber = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub number: BlockNumber,
    /// Hash of the previous block's message, or the genesis marker.
    pub identifier: Hash,
    pub timestamp: DateTime<Utc>,
    pub request: SignedChangeRequest,
    /// Resulting states of the accounts this block touched.
    pub updated_account_states: BTreeMap<AccountNumber, AccountState>,
}

impl BlockMessage {
    pub fn signable_message(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn hash(&self) -> Result<Hash, LedgerError> {
        hash_normalized(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub signer: AccountNumber,
    pub signature: Signature,
    pub message: BlockMessage,
}

impl Block {
    pub fn sign(message: BlockMessage, keypair: &KeyPair) -> Result<Self, LedgerError> {
        let signature = keypair.sign(&message.signable_message()?)?;
        Ok(Block {
            signer: keypair.account_number(),
            signature,
            message,
        })
    }

    pub fn number(&self) -> BlockNumber {
        self.message.number
    }

    /// Identifier the following block must carry.
    pub fn hash(&self) -> Result<Hash, LedgerError> {
        self.message.hash()
    }

    pub fn validate_signature(&self) -> Result<(), LedgerError> {
        verify_signature(&self.signer, &self.message.signable_message()?, &self.signature)
    }

    pub fn is_primary_validator_schedule(&self) -> bool {
        matches!(
            self.message.request.message,
            SignedChangeRequestMessage::PrimaryValidatorSchedule(_)
        )
    }

    pub fn touches_account(&self, account_number: &str) -> bool {
        self.message.request.signer == account_number
            || self
                .message
                .updated_account_states
                .contains_key(account_number)
    }
}

/// The ledger handle. Constructed explicitly by the process entry point and
/// passed to whoever needs it; storage backend is chosen at construction.
pub struct Blockchain {
    persistence: Box<dyn Persistence>,
    snapshot_period_in_blocks: u64,
    pub(crate) schedule: RwLock<ScheduleIndex>,
    pub(crate) roles: RoleCache,
    /// Serializes validate + append + snapshot as one unit.
    write_lock: Mutex<()>,
}

impl Blockchain {
    pub fn new(
        persistence: Box<dyn Persistence>,
        snapshot_period_in_blocks: u64,
    ) -> Result<Self, LedgerError> {
        if snapshot_period_in_blocks == 0 {
            return Err(LedgerError::Config(
                "snapshot_period_in_blocks must be at least 1".to_string(),
            ));
        }
        let schedule = ScheduleIndex::load(persistence.as_ref())?;

        Ok(Blockchain {
            persistence,
            snapshot_period_in_blocks,
            schedule: RwLock::new(schedule),
            roles: RoleCache::new(RoleCache::DEFAULT_CAPACITY, RoleCache::DEFAULT_TTL),
            write_lock: Mutex::new(()),
        })
    }

    /// Create a `Blockchain` backed by memory only.
    pub fn in_memory(
        block_chunk_size: u64,
        snapshot_period_in_blocks: u64,
    ) -> Result<Self, LedgerError> {
        Self::new(
            Box::new(InMemoryPersistence::new(block_chunk_size)?),
            snapshot_period_in_blocks,
        )
    }

    /// Create a `Blockchain` with the backend selected by configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self, LedgerError> {
        Self::new(open_backend(config)?, config.snapshot_period_in_blocks)
    }

    pub fn persistence(&self) -> &dyn Persistence {
        self.persistence.as_ref()
    }

    pub fn snapshot_period_in_blocks(&self) -> u64 {
        self.snapshot_period_in_blocks
    }

    /// True once a genesis (or bootstrap) blockchain state has been stored.
    pub fn is_initialized(&self) -> Result<bool, LedgerError> {
        Ok(!self.persistence.blockchain_states()?.is_empty())
    }

    /// Stores the first blockchain state of an empty ledger.
    ///
    /// Used for genesis and for bootstrapping from a peer's snapshot.
    pub fn add_blockchain_state(&self, state: BlockchainState) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock();
        if self.is_initialized()? || self.persistence.last_block_number()?.is_some() {
            return Err(LedgerError::validation(
                "Blockchain is already initialized",
            ));
        }

        self.persistence.append_blockchain_state(&state)?;
        self.schedule.write().seed_from_state(&state);
        info!(
            "Initialized blockchain from state at {:?} ({} accounts)",
            state.last_block_number,
            state.account_states.len()
        );
        Ok(())
    }

    /// Highest block number the ledger knows about, counting a bootstrap snapshot.
    pub fn last_block_number(&self) -> Result<Option<BlockNumber>, LedgerError> {
        let from_blocks = self.persistence.last_block_number()?;
        let from_states = self
            .persistence
            .blockchain_states()?
            .last()
            .and_then(|meta| meta.last_block_number);
        Ok(from_blocks.max(from_states))
    }

    pub fn next_block_number(&self) -> Result<BlockNumber, LedgerError> {
        Ok(self.last_block_number()?.map_or(0, |n| n + 1))
    }

    /// Identifier the next block must carry.
    pub fn next_block_identifier(&self) -> Result<Hash, LedgerError> {
        let last_state = self.last_blockchain_state()?.ok_or_else(|| {
            LedgerError::validation("Blockchain is not initialized with a blockchain state")
        })?;

        match self.get_last_block()? {
            Some(block) if Some(block.number()) > last_state.last_block_number => block.hash(),
            _ => Ok(last_state.next_block_identifier.clone()),
        }
    }

    /// Validates `block` against the current tip and durably appends it.
    pub fn add_block(&self, block: Block) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock();
        self.apply_block_locked(&block)
    }

    /// Builds and signs the next block for `request`. Nothing is stored.
    pub fn create_block(
        &self,
        request: SignedChangeRequest,
        keypair: &KeyPair,
    ) -> Result<Block, LedgerError> {
        let number = self.next_block_number()?;
        let identifier = self.next_block_identifier()?;
        let updated_account_states = self.compute_updated_account_states(&request, number)?;

        let message = BlockMessage {
            number,
            identifier,
            timestamp: Utc::now(),
            request,
            updated_account_states,
        };
        Block::sign(message, keypair)
    }

    /// Create + add under one lock, for a node acting as primary validator.
    pub fn add_block_from_request(
        &self,
        request: SignedChangeRequest,
        keypair: &KeyPair,
    ) -> Result<Block, LedgerError> {
        let _guard = self.write_lock.lock();
        let block = self.create_block(request, keypair)?;
        self.apply_block_locked(&block)?;
        Ok(block)
    }

    fn apply_block_locked(&self, block: &Block) -> Result<(), LedgerError> {
        self.validate_block(block)?;
        self.persistence.append_block(block)?;

        if block.is_primary_validator_schedule() {
            self.schedule.write().record_block(block);
        }
        info!(
            "Applied block {} ({}) signed by {}",
            block.number(),
            block.message.request.message.kind(),
            block.signer
        );

        // The block is durable at this point; a failed snapshot is retried on the next block.
        if let Err(e) = self.snapshot_if_due(block.number()) {
            warn!("Failed to write blockchain state after block {}: {}", block.number(), e);
        }
        Ok(())
    }

    fn snapshot_if_due(&self, tip: BlockNumber) -> Result<(), LedgerError> {
        let last_snapshot = self
            .persistence
            .blockchain_states()?
            .last()
            .and_then(|meta| meta.last_block_number);
        let blocks_since = tip + 1 - last_snapshot.map_or(0, |n| n + 1);
        if blocks_since >= self.snapshot_period_in_blocks {
            self.write_blockchain_state_at(tip)?;
        }
        Ok(())
    }

    /// Materializes and stores the blockchain state at the current tip.
    pub fn snapshot_blockchain_state(&self) -> Result<Option<Arc<BlockchainState>>, LedgerError> {
        let _guard = self.write_lock.lock();
        let Some(tip) = self.persistence.last_block_number()? else {
            return Ok(None);
        };
        let last = self.last_blockchain_state()?;
        if last.as_ref().and_then(|s| s.last_block_number) == Some(tip) {
            return Ok(last);
        }
        self.write_blockchain_state_at(tip).map(Some)
    }

    fn write_blockchain_state_at(
        &self,
        target: BlockNumber,
    ) -> Result<Arc<BlockchainState>, LedgerError> {
        let state = Arc::new(self.make_blockchain_state_at(target)?);
        if let Some(block) = self.persistence.get_block(target)? {
            if state.last_block_identifier.as_ref() != Some(&block.message.identifier)
                || state.next_block_identifier != block.hash()?
            {
                return Err(LedgerError::StorageIo(format!(
                    "Blockchain state at {} does not continue block {}",
                    target, target
                )));
            }
        }
        self.persistence.append_blockchain_state(&state)?;
        info!(
            "Wrote blockchain state at block {} ({} accounts)",
            target,
            state.account_states.len()
        );
        Ok(state)
    }

    /// Prior snapshot plus every intervening block's delta.
    pub fn make_blockchain_state_at(
        &self,
        target: BlockNumber,
    ) -> Result<BlockchainState, LedgerError> {
        self.check_height(Some(target))?;
        let base = self
            .get_blockchain_state_by_block_number(Some(target))?
            .ok_or_else(|| {
                LedgerError::Range(format!("No blockchain state at or before {}", target))
            })?;

        let mut state = (*base).clone();
        let start = state.next_block_number();
        if start <= target {
            for block in self.yield_blocks_from(start)? {
                let block = block?;
                if block.number() > target {
                    break;
                }
                state.apply_block(&block)?;
            }
        }
        debug!("Materialized blockchain state at {} from {:?}", target, base.last_block_number);
        Ok(state)
    }

    pub fn get_block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, LedgerError> {
        self.persistence.get_block(number)
    }

    pub fn get_last_block(&self) -> Result<Option<Block>, LedgerError> {
        match self.persistence.last_block_number()? {
            Some(number) => self.persistence.get_block(number),
            None => Ok(None),
        }
    }

    /// Ascending blocks starting at `number`.
    pub fn yield_blocks_from(&self, number: BlockNumber) -> Result<BlockCursor<'_>, LedgerError> {
        let mut cursor = BlockCursor::new(self.persistence(), Direction::Forward)?;
        cursor.seek(number);
        Ok(cursor)
    }

    /// Descending blocks from the tip.
    pub fn yield_blocks_reversed(&self) -> Result<BlockCursor<'_>, LedgerError> {
        BlockCursor::new(self.persistence(), Direction::Backward)
    }

    /// Descending blocks that changed or were signed by `account_number`.
    pub fn yield_blocks_for_account(
        &self,
        account_number: &str,
    ) -> Result<BlockCursor<'_>, LedgerError> {
        let account_number = account_number.to_string();
        Ok(self
            .yield_blocks_reversed()?
            .with_filter(move |block| block.touches_account(&account_number)))
    }

    pub fn yield_block_chunks_meta(
        &self,
    ) -> Result<impl DoubleEndedIterator<Item = ChunkMeta>, LedgerError> {
        Ok(self.persistence.block_chunks()?.into_iter())
    }

    pub fn yield_block_chunks_meta_reversed(
        &self,
    ) -> Result<impl Iterator<Item = ChunkMeta>, LedgerError> {
        Ok(self.yield_block_chunks_meta()?.rev())
    }

    pub fn yield_blockchain_states_meta(
        &self,
    ) -> Result<impl DoubleEndedIterator<Item = StateMeta>, LedgerError> {
        Ok(self.persistence.blockchain_states()?.into_iter())
    }

    /// Nearest blockchain state whose last block is at or before `at_block_number`.
    pub fn get_blockchain_state_by_block_number(
        &self,
        at_block_number: Option<BlockNumber>,
    ) -> Result<Option<Arc<BlockchainState>>, LedgerError> {
        self.persistence.closest_blockchain_state(at_block_number)
    }

    pub fn last_blockchain_state(&self) -> Result<Option<Arc<BlockchainState>>, LedgerError> {
        self.persistence.last_blockchain_state()
    }

    pub fn first_blockchain_state(&self) -> Result<Option<Arc<BlockchainState>>, LedgerError> {
        self.persistence.first_blockchain_state()
    }
}
