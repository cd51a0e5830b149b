//! Storage backends for the ledger.
//!
//! The `Blockchain` handle only talks to `Persistence`; which backend sits
//! behind it is decided once, at construction, by `open_backend`.

use crate::blockchain::{Block, BlockNumber, BlockchainState};
use crate::config::{BackendKind, StorageConfig};
use crate::error::{LedgerError, Result};
use crate::storage::{
    block_chunk_filename, blockchain_state_filename, find_chunk, ChunkCodec, ChunkMeta,
    FilePersistence, StateMeta,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Abstraction for persistence backends. Appends must be atomic: after an
/// error the backend reads exactly as it did before the call.
///
/// Listings are returned as owned copies, so callers iterate a consistent
/// view while writers keep appending.
pub trait Persistence: Send + Sync {
    /// Appends the block that directly follows the stored tip.
    fn append_block(&self, block: &Block) -> Result<()>;

    /// Every chunk in block order.
    fn block_chunks(&self) -> Result<Vec<ChunkMeta>>;

    fn read_block_chunk(&self, meta: &ChunkMeta) -> Result<Arc<Vec<Block>>>;

    /// Stores a blockchain state strictly after every stored one.
    fn append_blockchain_state(&self, state: &BlockchainState) -> Result<()>;

    /// Every stored blockchain state in block order, genesis first.
    fn blockchain_states(&self) -> Result<Vec<StateMeta>>;

    fn read_blockchain_state(&self, meta: &StateMeta) -> Result<Arc<BlockchainState>>;

    fn last_block_number(&self) -> Result<Option<BlockNumber>> {
        Ok(self.block_chunks()?.last().map(|chunk| chunk.end))
    }

    fn get_block(&self, number: BlockNumber) -> Result<Option<Block>> {
        let chunks = self.block_chunks()?;
        let Some(idx) = find_chunk(&chunks, number) else {
            return Ok(None);
        };
        let chunk = &chunks[idx];
        let blocks = self.read_block_chunk(chunk)?;
        Ok(blocks.get((number - chunk.start) as usize).cloned())
    }

    /// Latest state whose last block is at or before `at_block_number`.
    fn closest_blockchain_state(
        &self,
        at_block_number: Option<BlockNumber>,
    ) -> Result<Option<Arc<BlockchainState>>> {
        let states = self.blockchain_states()?;
        let idx = states.partition_point(|meta| meta.last_block_number <= at_block_number);
        match idx.checked_sub(1) {
            Some(idx) => self.read_blockchain_state(&states[idx]).map(Some),
            None => Ok(None),
        }
    }

    fn first_blockchain_state(&self) -> Result<Option<Arc<BlockchainState>>> {
        match self.blockchain_states()?.first() {
            Some(meta) => self.read_blockchain_state(meta).map(Some),
            None => Ok(None),
        }
    }

    fn last_blockchain_state(&self) -> Result<Option<Arc<BlockchainState>>> {
        match self.blockchain_states()?.last() {
            Some(meta) => self.read_blockchain_state(meta).map(Some),
            None => Ok(None),
        }
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
///
/// Blocks are grouped into virtual chunks of `chunk_size` so chunk listings
/// look the same as the file backend's.
pub struct InMemoryPersistence {
    chunk_size: u64,
    blocks: RwLock<Vec<Block>>,
    states: RwLock<Vec<Arc<BlockchainState>>>,
}

impl InMemoryPersistence {
    pub fn new(chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(LedgerError::Config(
                "block_chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            chunk_size,
            blocks: RwLock::new(Vec::new()),
            states: RwLock::new(Vec::new()),
        })
    }
}

impl Persistence for InMemoryPersistence {
    fn append_block(&self, block: &Block) -> Result<()> {
        let mut blocks = self.blocks.write();
        if let Some(last) = blocks.last() {
            if block.number() != last.number() + 1 {
                return Err(LedgerError::validation(format!(
                    "Block {} does not follow stored block {}",
                    block.number(),
                    last.number()
                )));
            }
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn block_chunks(&self) -> Result<Vec<ChunkMeta>> {
        let blocks = self.blocks.read();
        Ok(blocks
            .chunks(self.chunk_size as usize)
            .filter_map(|chunk| {
                let start = chunk.first()?.number();
                let end = chunk.last()?.number();
                let finalized = chunk.len() as u64 == self.chunk_size;
                Some(ChunkMeta {
                    filename: block_chunk_filename(start, finalized.then_some(end), false),
                    start,
                    end,
                    finalized,
                    compressed: false,
                })
            })
            .collect())
    }

    fn read_block_chunk(&self, meta: &ChunkMeta) -> Result<Arc<Vec<Block>>> {
        let blocks = self.blocks.read();
        let first = blocks.first().map_or(0, |b| b.number());
        let offset = meta.start.checked_sub(first).map(|o| o as usize);
        let range = offset.map(|o| o..o + meta.block_count() as usize);
        range
            .and_then(|range| blocks.get(range))
            .map(|slice| Arc::new(slice.to_vec()))
            .ok_or_else(|| {
                LedgerError::StorageIo(format!("Block chunk {} is not stored", meta.filename))
            })
    }

    fn append_blockchain_state(&self, state: &BlockchainState) -> Result<()> {
        let mut states = self.states.write();
        if let Some(last) = states.last() {
            if state.last_block_number <= last.last_block_number {
                return Err(LedgerError::validation(format!(
                    "Blockchain state at {:?} is not after stored state at {:?}",
                    state.last_block_number, last.last_block_number
                )));
            }
        }
        states.push(Arc::new(state.clone()));
        Ok(())
    }

    fn blockchain_states(&self) -> Result<Vec<StateMeta>> {
        Ok(self
            .states
            .read()
            .iter()
            .map(|state| StateMeta {
                filename: blockchain_state_filename(state.last_block_number, false),
                last_block_number: state.last_block_number,
                compressed: false,
            })
            .collect())
    }

    fn read_blockchain_state(&self, meta: &StateMeta) -> Result<Arc<BlockchainState>> {
        self.states
            .read()
            .iter()
            .find(|state| state.last_block_number == meta.last_block_number)
            .cloned()
            .ok_or_else(|| {
                LedgerError::StorageIo(format!("Blockchain state {} is not stored", meta.filename))
            })
    }
}

pub fn open_backend(config: &StorageConfig) -> Result<Box<dyn Persistence>> {
    match config.backend {
        BackendKind::Memory => Ok(Box::new(InMemoryPersistence::new(config.block_chunk_size)?)),
        BackendKind::File => {
            let codec = ChunkCodec::new(config.compress, config.compression_level);
            Ok(Box::new(FilePersistence::open(
                &config.path,
                config.block_chunk_size,
                codec,
            )?))
        }
    }
}
