//! Blockchain state snapshots, one file each, keyed by last block number.

use crate::blockchain::BlockchainState;
use crate::cache::StateCache;
use crate::error::{LedgerError, Result};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use super::chunk::{
    blockchain_state_filename, is_temp_file, parse_blockchain_state_filename, write_atomically,
    ChunkCodec, StateMeta,
};

pub struct BlockchainStateStore {
    directory: PathBuf,
    codec: ChunkCodec,
    index: RwLock<Vec<StateMeta>>,
    cache: StateCache,
}

impl BlockchainStateStore {
    pub fn open(directory: impl AsRef<Path>, codec: ChunkCodec) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let mut index = Vec::new();
        for entry in fs::read_dir(&directory)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if is_temp_file(&name) {
                warn!("Removing leftover temp file {}", name);
                fs::remove_file(directory.join(&name))?;
                continue;
            }
            if let Some((last_block_number, compressed)) = parse_blockchain_state_filename(&name) {
                index.push(StateMeta {
                    filename: name,
                    last_block_number,
                    compressed,
                });
            }
        }
        index.sort_by_key(|meta| meta.last_block_number);
        // Same height written both compressed and not after a config change.
        index.dedup_by_key(|meta| meta.last_block_number);

        debug!(
            "Opened blockchain state store at {} with {} states",
            directory.display(),
            index.len()
        );
        Ok(Self {
            directory,
            codec,
            index: RwLock::new(index),
            cache: StateCache::new(StateCache::DEFAULT_CAPACITY),
        })
    }

    pub fn states(&self) -> Vec<StateMeta> {
        self.index.read().clone()
    }

    pub fn append(&self, state: &BlockchainState) -> Result<()> {
        let mut index = self.index.write();
        if let Some(last) = index.last() {
            if state.last_block_number <= last.last_block_number {
                return Err(LedgerError::validation(format!(
                    "Blockchain state at {:?} is not after stored state at {:?}",
                    state.last_block_number, last.last_block_number
                )));
            }
        }

        let compressed = self.codec.compresses();
        let filename = blockchain_state_filename(state.last_block_number, compressed);
        let bytes = self.codec.encode(std::slice::from_ref(state), compressed)?;
        write_atomically(&self.directory, &filename, &bytes)?;

        self.cache
            .put(state.last_block_number, Arc::new(state.clone()));
        index.push(StateMeta {
            filename,
            last_block_number: state.last_block_number,
            compressed,
        });
        Ok(())
    }

    pub fn read(&self, meta: &StateMeta) -> Result<Arc<BlockchainState>> {
        if let Some(state) = self.cache.get(&meta.last_block_number) {
            return Ok(state);
        }

        let bytes = fs::read(self.directory.join(&meta.filename))?;
        let mut records: Vec<BlockchainState> = ChunkCodec::decode(&bytes, meta.compressed)?;
        if records.len() != 1 {
            return Err(LedgerError::StorageIo(format!(
                "Blockchain state file {} holds {} records",
                meta.filename,
                records.len()
            )));
        }
        let state = records.remove(0);
        if state.last_block_number != meta.last_block_number {
            return Err(LedgerError::StorageIo(format!(
                "Blockchain state file {} holds state at {:?}",
                meta.filename, state.last_block_number
            )));
        }

        let state = Arc::new(state);
        self.cache.put(meta.last_block_number, Arc::clone(&state));
        Ok(state)
    }
}
