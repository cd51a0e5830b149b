//! File-backed storage: a chunked block log and a blockchain state store
//! living side by side under one root directory.

pub mod block_store;
pub mod chunk;
pub mod cursor;
pub mod state_store;

pub use block_store::BlockChunkStore;
pub use chunk::{
    block_chunk_filename, blockchain_state_filename, find_chunk, ChunkCodec, ChunkMeta,
    StateMeta,
};
pub use cursor::{BlockCursor, Direction};
pub use state_store::BlockchainStateStore;

use crate::blockchain::{Block, BlockchainState};
use crate::error::Result;
use crate::persistence::Persistence;
use std::path::Path;
use std::sync::Arc;

pub const BLOCKS_DIRECTORY: &str = "blocks";
pub const BLOCKCHAIN_STATES_DIRECTORY: &str = "blockchain-states";

pub struct FilePersistence {
    blocks: BlockChunkStore,
    states: BlockchainStateStore,
}

impl FilePersistence {
    pub fn open(root: impl AsRef<Path>, block_chunk_size: u64, codec: ChunkCodec) -> Result<Self> {
        let root = root.as_ref();
        Ok(Self {
            blocks: BlockChunkStore::open(root.join(BLOCKS_DIRECTORY), block_chunk_size, codec)?,
            states: BlockchainStateStore::open(root.join(BLOCKCHAIN_STATES_DIRECTORY), codec)?,
        })
    }

    pub fn block_store(&self) -> &BlockChunkStore {
        &self.blocks
    }
}

impl Persistence for FilePersistence {
    fn append_block(&self, block: &Block) -> Result<()> {
        self.blocks.append(block)
    }

    fn block_chunks(&self) -> Result<Vec<ChunkMeta>> {
        Ok(self.blocks.chunks())
    }

    fn read_block_chunk(&self, meta: &ChunkMeta) -> Result<Arc<Vec<Block>>> {
        self.blocks.read_chunk(meta)
    }

    fn last_block_number(&self) -> Result<Option<u64>> {
        Ok(self.blocks.last_block_number())
    }

    fn append_blockchain_state(&self, state: &BlockchainState) -> Result<()> {
        self.states.append(state)
    }

    fn blockchain_states(&self) -> Result<Vec<StateMeta>> {
        Ok(self.states.states())
    }

    fn read_blockchain_state(&self, meta: &StateMeta) -> Result<Arc<BlockchainState>> {
        self.states.read(meta)
    }
}
