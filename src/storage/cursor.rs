use crate::blockchain::{Block, BlockNumber};
use crate::error::Result;
use crate::persistence::Persistence;
use std::sync::Arc;

use super::chunk::{find_chunk, ChunkMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Restartable iterator over stored blocks.
///
/// The chunk index is captured when the cursor is created, so blocks appended
/// afterwards are not yielded and a concurrent rotation never tears a read.
/// At most one chunk is held in memory at a time.
pub struct BlockCursor<'a> {
    persistence: &'a dyn Persistence,
    chunks: Vec<ChunkMeta>,
    direction: Direction,
    position: Option<BlockNumber>,
    loaded: Option<(usize, Arc<Vec<Block>>)>,
    filter: Option<Box<dyn Fn(&Block) -> bool + 'a>>,
}

impl<'a> BlockCursor<'a> {
    pub fn new(persistence: &'a dyn Persistence, direction: Direction) -> Result<Self> {
        let chunks = persistence.block_chunks()?;
        let position = match direction {
            Direction::Forward => chunks.first().map(|c| c.start),
            Direction::Backward => chunks.last().map(|c| c.end),
        };
        Ok(Self {
            persistence,
            chunks,
            direction,
            position,
            loaded: None,
            filter: None,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn bounds(&self) -> Option<(BlockNumber, BlockNumber)> {
        Some((self.chunks.first()?.start, self.chunks.last()?.end))
    }

    /// Moves the cursor so the next block yielded is `number`, or the nearest
    /// stored block in the cursor's direction.
    pub fn seek(&mut self, number: BlockNumber) {
        self.position = self.bounds().and_then(|(first, last)| match self.direction {
            Direction::Forward => (number <= last).then(|| number.max(first)),
            Direction::Backward => (number >= first).then(|| number.min(last)),
        });
    }

    /// Only yield blocks for which `filter` returns true.
    pub fn with_filter(mut self, filter: impl Fn(&Block) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    fn step(&self, number: BlockNumber) -> Option<BlockNumber> {
        let (first, last) = self.bounds()?;
        match self.direction {
            Direction::Forward => number.checked_add(1).filter(|&n| n <= last),
            Direction::Backward => number.checked_sub(1).filter(|&n| n >= first),
        }
    }

    fn fetch(&mut self, number: BlockNumber) -> Result<Option<Block>> {
        let Some(idx) = find_chunk(&self.chunks, number) else {
            return Ok(None);
        };
        let blocks = match &self.loaded {
            Some((loaded_idx, blocks)) if *loaded_idx == idx => Arc::clone(blocks),
            _ => {
                let blocks = self.persistence.read_block_chunk(&self.chunks[idx])?;
                self.loaded = Some((idx, Arc::clone(&blocks)));
                blocks
            }
        };
        let offset = (number - self.chunks[idx].start) as usize;
        Ok(blocks.get(offset).cloned())
    }

    pub fn next_block(&mut self) -> Result<Option<Block>> {
        while let Some(number) = self.position {
            self.position = self.step(number);
            let Some(block) = self.fetch(number)? else {
                continue;
            };
            if self.filter.as_ref().map_or(true, |filter| filter(&block)) {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }
}

impl Iterator for BlockCursor<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_block() {
            Ok(block) => block.map(Ok),
            Err(e) => {
                self.position = None;
                Some(Err(e))
            }
        }
    }
}
