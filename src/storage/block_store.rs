//! Append-only block log split into rotating chunk files.
//!
//! Only the last chunk is ever rewritten. It is rewritten whole through a
//! temp file and a rename, and it is finalized (renamed with its real end,
//! optionally compressed) in the same step that stores its last block.

use crate::blockchain::Block;
use crate::cache::ChunkCache;
use crate::error::{LedgerError, Result};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::chunk::{
    block_chunk_filename, is_temp_file, parse_block_chunk_filename, write_atomically, ChunkCodec,
    ChunkMeta,
};

pub struct BlockChunkStore {
    directory: PathBuf,
    chunk_size: u64,
    codec: ChunkCodec,
    index: RwLock<Vec<ChunkMeta>>,
    cache: ChunkCache,
}

impl BlockChunkStore {
    pub fn open(directory: impl AsRef<Path>, chunk_size: u64, codec: ChunkCodec) -> Result<Self> {
        if chunk_size == 0 {
            return Err(LedgerError::Config(
                "block_chunk_size must be at least 1".to_string(),
            ));
        }
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let index = Self::scan(&directory)?;
        debug!(
            "Opened block store at {} with {} chunks",
            directory.display(),
            index.len()
        );
        Ok(Self {
            directory,
            chunk_size,
            codec,
            index: RwLock::new(index),
            cache: ChunkCache::new(ChunkCache::DEFAULT_CAPACITY),
        })
    }

    /// Builds the chunk index from the directory, cleaning up after interrupted writes.
    fn scan(directory: &Path) -> Result<Vec<ChunkMeta>> {
        let mut finalized = Vec::new();
        let mut open = Vec::new();

        for entry in fs::read_dir(directory)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if is_temp_file(&name) {
                warn!("Removing leftover temp file {}", name);
                fs::remove_file(directory.join(&name))?;
                continue;
            }
            let Some(parsed) = parse_block_chunk_filename(&name) else {
                continue;
            };
            match parsed.end {
                Some(end) => finalized.push(ChunkMeta {
                    filename: name,
                    start: parsed.start,
                    end,
                    finalized: true,
                    compressed: parsed.compressed,
                }),
                None => open.push((parsed.start, name, parsed.compressed)),
            }
        }

        let mut chunks = finalized;
        let mut open_chunks = Vec::new();
        for (start, name, compressed) in open {
            // Crash between finalizing a chunk and removing its open predecessor.
            if chunks.iter().any(|c| c.contains(start)) {
                warn!("Removing open chunk {} superseded by a finalized chunk", name);
                fs::remove_file(directory.join(&name))?;
                continue;
            }
            let bytes = fs::read(directory.join(&name))?;
            let blocks: Vec<Block> = ChunkCodec::decode(&bytes, compressed)?;
            if blocks.is_empty() {
                warn!("Removing empty open chunk {}", name);
                fs::remove_file(directory.join(&name))?;
                continue;
            }
            open_chunks.push(ChunkMeta {
                filename: name,
                start,
                end: start + blocks.len() as u64 - 1,
                finalized: false,
                compressed,
            });
        }
        if open_chunks.len() > 1 {
            return Err(LedgerError::StorageIo(format!(
                "Found {} open block chunks in {}",
                open_chunks.len(),
                directory.display()
            )));
        }
        chunks.extend(open_chunks);
        chunks.sort_by_key(|c| c.start);

        for pair in chunks.windows(2) {
            if pair[1].start != pair[0].end + 1 {
                return Err(LedgerError::StorageIo(format!(
                    "Block chunks {} and {} are not contiguous",
                    pair[0].filename, pair[1].filename
                )));
            }
        }
        if let Some(open) = chunks.iter().find(|c| !c.finalized) {
            if chunks.last() != Some(open) {
                return Err(LedgerError::StorageIo(format!(
                    "Open block chunk {} is not the last chunk",
                    open.filename
                )));
            }
        }
        Ok(chunks)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// The index as of now; later appends do not affect the returned copy.
    pub fn chunks(&self) -> Vec<ChunkMeta> {
        self.index.read().clone()
    }

    pub fn last_block_number(&self) -> Option<u64> {
        self.index.read().last().map(|c| c.end)
    }

    /// Appends `block` to the open chunk, rotating when the chunk fills.
    /// On error the store is left as it was.
    pub fn append(&self, block: &Block) -> Result<()> {
        let mut index = self.index.write();

        if let Some(last) = index.last() {
            if block.number() != last.end + 1 {
                return Err(LedgerError::validation(format!(
                    "Block {} does not follow stored block {}",
                    block.number(),
                    last.end
                )));
            }
        }

        let replaced = index.last().filter(|c| !c.finalized).cloned();
        let mut blocks = match replaced {
            Some(ref open) => (*self.load(open)?).clone(),
            None => Vec::new(),
        };
        blocks.push(block.clone());

        let start = blocks[0].number();
        let end = block.number();
        let finalized = blocks.len() as u64 >= self.chunk_size;
        let compressed = finalized && self.codec.compresses();
        let filename = block_chunk_filename(start, finalized.then_some(end), compressed);

        let bytes = self.codec.encode(&blocks, compressed)?;
        write_atomically(&self.directory, &filename, &bytes)?;

        if let Some(ref open) = replaced {
            if open.filename != filename {
                if let Err(e) = fs::remove_file(self.directory.join(&open.filename)) {
                    warn!("Failed to remove rotated chunk {}: {}", open.filename, e);
                }
            }
            index.pop();
        }
        if finalized {
            info!("Finalized block chunk {} ({} blocks)", filename, blocks.len());
        }

        let meta = ChunkMeta {
            filename,
            start,
            end,
            finalized,
            compressed,
        };
        self.cache.put(meta.cache_key(), Arc::new(blocks));
        index.push(meta);
        Ok(())
    }

    /// Blocks of `meta`, limited to the range `meta` described when it was taken.
    pub fn read_chunk(&self, meta: &ChunkMeta) -> Result<Arc<Vec<Block>>> {
        match self.load(meta) {
            Err(LedgerError::StorageIo(_)) if !meta.finalized => {
                // The open chunk was rotated after the caller took its copy of the index.
                let current = self
                    .index
                    .read()
                    .iter()
                    .find(|c| c.start == meta.start)
                    .cloned()
                    .ok_or_else(|| {
                        LedgerError::StorageIo(format!("Block chunk {} disappeared", meta.filename))
                    })?;
                let blocks = self.load(&current)?;
                blocks
                    .get(..meta.block_count() as usize)
                    .map(|prefix| Arc::new(prefix.to_vec()))
                    .ok_or_else(|| {
                        LedgerError::StorageIo(format!("Block chunk {} shrank", current.filename))
                    })
            }
            result => result,
        }
    }

    fn load(&self, meta: &ChunkMeta) -> Result<Arc<Vec<Block>>> {
        let key = meta.cache_key();
        if let Some(blocks) = self.cache.get(&key) {
            return Ok(blocks);
        }

        let bytes = fs::read(self.directory.join(&meta.filename))?;
        let mut blocks: Vec<Block> = ChunkCodec::decode(&bytes, meta.compressed)?;

        let expected = meta.block_count() as usize;
        if blocks.len() < expected {
            return Err(LedgerError::StorageIo(format!(
                "Block chunk {} holds {} blocks, expected {}",
                meta.filename,
                blocks.len(),
                expected
            )));
        }
        blocks.truncate(expected);
        for (offset, block) in blocks.iter().enumerate() {
            if block.number() != meta.start + offset as u64 {
                return Err(LedgerError::StorageIo(format!(
                    "Block chunk {} is corrupted: block {} found at position {}",
                    meta.filename,
                    block.number(),
                    offset
                )));
            }
        }

        let blocks = Arc::new(blocks);
        self.cache.put(key, Arc::clone(&blocks));
        Ok(blocks)
    }
}
