//! Chunk file naming and the on-disk record codec.
//!
//! Block chunk files are named `<start>-<end>-block-chunk.cbor[.zst]` with
//! both numbers zero-padded to 20 digits, so a directory listing sorts in
//! block order. The chunk still accepting appends has `x`s in place of its
//! end. Blockchain state files are `<last block>-blockchain-state.cbor[.zst]`,
//! with dashes standing in for the genesis state so it sorts first.

use crate::blockchain::BlockNumber;
use crate::error::{LedgerError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const BLOCK_NUMBER_WIDTH: usize = 20;
pub const BLOCK_CHUNK_SUFFIX: &str = "-block-chunk.cbor";
pub const BLOCKCHAIN_STATE_SUFFIX: &str = "-blockchain-state.cbor";
pub const COMPRESSED_EXTENSION: &str = ".zst";
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const OPEN_CHUNK_END: &str = "xxxxxxxxxxxxxxxxxxxx";
const GENESIS_STATE_KEY: &str = "--------------------";

/// Location and range of one block chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub filename: String,
    pub start: BlockNumber,
    pub end: BlockNumber,
    pub finalized: bool,
    pub compressed: bool,
}

impl ChunkMeta {
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, number: BlockNumber) -> bool {
        self.start <= number && number <= self.end
    }

    /// The open chunk keeps its filename while it grows, so the end is part of the key.
    pub fn cache_key(&self) -> (String, BlockNumber) {
        (self.filename.clone(), self.end)
    }
}

/// Location of one stored blockchain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMeta {
    pub filename: String,
    pub last_block_number: Option<BlockNumber>,
    pub compressed: bool,
}

/// Index of the chunk holding `number` in a start-sorted, contiguous chunk list.
pub fn find_chunk(chunks: &[ChunkMeta], number: BlockNumber) -> Option<usize> {
    let idx = chunks.partition_point(|chunk| chunk.end < number);
    chunks
        .get(idx)
        .filter(|chunk| chunk.contains(number))
        .map(|_| idx)
}

fn format_block_number(number: BlockNumber) -> String {
    format!("{:0width$}", number, width = BLOCK_NUMBER_WIDTH)
}

fn parse_block_number(value: &str) -> Option<BlockNumber> {
    if value.len() != BLOCK_NUMBER_WIDTH || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn with_compression(name: String, compressed: bool) -> String {
    if compressed {
        name + COMPRESSED_EXTENSION
    } else {
        name
    }
}

fn strip_compression(name: &str) -> (&str, bool) {
    match name.strip_suffix(COMPRESSED_EXTENSION) {
        Some(stem) => (stem, true),
        None => (name, false),
    }
}

/// `end` is `None` for the open chunk.
pub fn block_chunk_filename(start: BlockNumber, end: Option<BlockNumber>, compressed: bool) -> String {
    let end = end.map_or_else(|| OPEN_CHUNK_END.to_string(), format_block_number);
    with_compression(
        format!("{}-{}{}", format_block_number(start), end, BLOCK_CHUNK_SUFFIX),
        compressed,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedChunkName {
    pub start: BlockNumber,
    pub end: Option<BlockNumber>,
    pub compressed: bool,
}

pub fn parse_block_chunk_filename(name: &str) -> Option<ParsedChunkName> {
    let (stem, compressed) = strip_compression(name);
    let range = stem.strip_suffix(BLOCK_CHUNK_SUFFIX)?;
    let (start, end) = range.split_once('-')?;
    let start = parse_block_number(start)?;
    let end = if end == OPEN_CHUNK_END {
        None
    } else {
        Some(parse_block_number(end)?)
    };
    if end.is_some_and(|end| end < start) {
        return None;
    }
    Some(ParsedChunkName {
        start,
        end,
        compressed,
    })
}

pub fn blockchain_state_filename(last_block_number: Option<BlockNumber>, compressed: bool) -> String {
    let key = last_block_number.map_or_else(|| GENESIS_STATE_KEY.to_string(), format_block_number);
    with_compression(format!("{}{}", key, BLOCKCHAIN_STATE_SUFFIX), compressed)
}

/// Returns the state's last block number (`None` for genesis) and compression flag.
pub fn parse_blockchain_state_filename(name: &str) -> Option<(Option<BlockNumber>, bool)> {
    let (stem, compressed) = strip_compression(name);
    let key = stem.strip_suffix(BLOCKCHAIN_STATE_SUFFIX)?;
    if key == GENESIS_STATE_KEY {
        return Some((None, compressed));
    }
    Some((Some(parse_block_number(key)?), compressed))
}

/// CBOR records laid end to end, optionally wrapped in whole-file zstd.
#[derive(Debug, Clone, Copy)]
pub struct ChunkCodec {
    compression_level: Option<i32>,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new(true, DEFAULT_COMPRESSION_LEVEL)
    }
}

impl ChunkCodec {
    pub fn new(compress: bool, level: i32) -> Self {
        Self {
            compression_level: compress.then_some(level.clamp(1, 22)),
        }
    }

    pub fn uncompressed() -> Self {
        Self {
            compression_level: None,
        }
    }

    pub fn compresses(&self) -> bool {
        self.compression_level.is_some()
    }

    pub fn encode<T: Serialize>(&self, records: &[T], compress: bool) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for record in records {
            serde_cbor::to_writer(&mut bytes, record)?;
        }
        match self.compression_level {
            Some(level) if compress => zstd::encode_all(&bytes[..], level)
                .map_err(|e| LedgerError::StorageIo(format!("Compression failed: {}", e))),
            _ => Ok(bytes),
        }
    }

    pub fn decode<T: DeserializeOwned>(bytes: &[u8], compressed: bool) -> Result<Vec<T>> {
        let raw = if compressed {
            zstd::decode_all(bytes)
                .map_err(|e| LedgerError::StorageIo(format!("Decompression failed: {}", e)))?
        } else {
            bytes.to_vec()
        };
        let records = serde_cbor::Deserializer::from_slice(&raw)
            .into_iter::<T>()
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(records)
    }
}

/// Writes through a temp file in the same directory, then renames into place.
pub fn write_atomically(directory: &Path, filename: &str, bytes: &[u8]) -> Result<()> {
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(directory.join(filename))?;
    Ok(())
}

/// Leftovers of interrupted `write_atomically` calls.
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with(".tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_filenames_sort_numerically() {
        let a = block_chunk_filename(0, Some(9), false);
        let b = block_chunk_filename(10, Some(19), true);
        let c = block_chunk_filename(100, None, false);
        assert_eq!(a, "00000000000000000000-00000000000000000009-block-chunk.cbor");
        assert!(a < b && b < c);
    }

    #[test]
    fn test_chunk_filename_parsing() {
        let parsed = parse_block_chunk_filename(&block_chunk_filename(10, Some(19), true)).unwrap();
        assert_eq!(
            parsed,
            ParsedChunkName {
                start: 10,
                end: Some(19),
                compressed: true
            }
        );

        let open = parse_block_chunk_filename(&block_chunk_filename(20, None, false)).unwrap();
        assert_eq!(open.end, None);

        assert!(parse_block_chunk_filename("notes.txt").is_none());
        assert!(parse_block_chunk_filename("10-19-block-chunk.cbor").is_none());
        assert!(parse_block_chunk_filename(&block_chunk_filename(19, Some(10), false)).is_none());
    }

    #[test]
    fn test_genesis_state_sorts_first() {
        let genesis = blockchain_state_filename(None, false);
        let zero = blockchain_state_filename(Some(0), false);
        assert!(genesis < zero);
        assert_eq!(parse_blockchain_state_filename(&genesis), Some((None, false)));
        assert_eq!(parse_blockchain_state_filename(&zero), Some((Some(0), false)));
        assert_eq!(
            parse_blockchain_state_filename(&blockchain_state_filename(Some(7), true)),
            Some((Some(7), true))
        );
    }

    #[test]
    fn test_codec_handles_record_sequences() {
        let records = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        for codec in [ChunkCodec::default(), ChunkCodec::uncompressed()] {
            for compress in [false, true] {
                let bytes = codec.encode(&records, compress).unwrap();
                let compressed = compress && codec.compresses();
                let decoded: Vec<String> = ChunkCodec::decode(&bytes, compressed).unwrap();
                assert_eq!(decoded, records);
            }
        }
    }

    #[test]
    fn test_find_chunk() {
        let chunks: Vec<ChunkMeta> = [(0, 4), (5, 9), (10, 11)]
            .iter()
            .map(|&(start, end)| ChunkMeta {
                filename: block_chunk_filename(start, Some(end), false),
                start,
                end,
                finalized: true,
                compressed: false,
            })
            .collect();
        assert_eq!(find_chunk(&chunks, 0), Some(0));
        assert_eq!(find_chunk(&chunks, 7), Some(1));
        assert_eq!(find_chunk(&chunks, 11), Some(2));
        assert_eq!(find_chunk(&chunks, 12), None);
        assert_eq!(find_chunk(&[], 0), None);
    }
}
