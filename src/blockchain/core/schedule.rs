//! Primary validator schedule resolution.
//!
//! Entries come from two places: the schedule history carried by the
//! earliest stored blockchain state (genesis declarations plus every commit
//! before it), and committed `PrimaryValidatorSchedule` blocks after that
//! state. Each commit is tagged with the block that committed it and only
//! takes effect for blocks after its commit.

use crate::crypto::AccountNumber;
use crate::error::LedgerError;
use crate::persistence::Persistence;
use crate::request::SignedChangeRequestMessage;
use crate::storage::{BlockCursor, Direction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chain::{Block, BlockNumber, Blockchain};
use super::state::{BlockchainState, Node, PrimaryValidatorSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    PrimaryValidator,
    RegularNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Block that committed the entry; `None` for genesis declarations.
    pub committed_at: Option<BlockNumber>,
    pub primary_validator: AccountNumber,
    pub schedule: PrimaryValidatorSchedule,
    /// Seeded entries are the default authority and may be overridden by any commit.
    pub seeded: bool,
}

impl ScheduleEntry {
    /// A genesis declaration.
    pub fn seeded(primary_validator: AccountNumber, schedule: PrimaryValidatorSchedule) -> Self {
        Self {
            committed_at: None,
            primary_validator,
            schedule,
            seeded: true,
        }
    }

    /// The entry a schedule block commits, if `block` is one.
    pub fn from_block(block: &Block) -> Option<Self> {
        let SignedChangeRequestMessage::PrimaryValidatorSchedule(ref message) =
            block.message.request.message
        else {
            return None;
        };
        Some(Self {
            committed_at: Some(block.number()),
            primary_validator: message.primary_validator.clone(),
            schedule: PrimaryValidatorSchedule::new(
                message.begin_block_number,
                message.end_block_number,
            ),
            seeded: false,
        })
    }

    fn is_effective_for(&self, block_number: BlockNumber) -> bool {
        self.schedule.covers(block_number)
            && self.committed_at.map_or(true, |committed| committed < block_number)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleIndex {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleIndex {
    /// Seeds from the earliest stored state and replays every stored schedule change.
    pub fn load(persistence: &dyn Persistence) -> Result<Self, LedgerError> {
        let mut index = ScheduleIndex::default();
        let Some(first) = persistence.first_blockchain_state()? else {
            return Ok(index);
        };
        index.seed_from_state(&first);

        let mut cursor = BlockCursor::new(persistence, Direction::Forward)?
            .with_filter(|block: &Block| block.is_primary_validator_schedule());
        cursor.seek(first.next_block_number());
        for block in cursor {
            index.record_block(&block?);
        }
        debug!("Loaded {} primary validator schedule entries", index.entries.len());
        Ok(index)
    }

    /// Replaces the index with the history carried by `state`.
    pub fn seed_from_state(&mut self, state: &BlockchainState) {
        self.entries = state.primary_validator_schedules.clone();
    }

    pub fn record_block(&mut self, block: &Block) {
        let Some(entry) = ScheduleEntry::from_block(block) else {
            return;
        };
        if self.entries.iter().any(|e| e.committed_at == entry.committed_at) {
            return;
        }
        self.entries.push(entry);
    }

    /// Latest-committed entry covering `block_number`. Genesis declarations
    /// all sort first; among those the later begin wins.
    pub fn resolve(&self, block_number: BlockNumber) -> Option<&ScheduleEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.is_effective_for(block_number))
            .max_by_key(|entry| (entry.committed_at, entry.schedule.begin_block_number))
    }

    /// A committed entry, other than `current`, whose range intersects `schedule`.
    pub fn overlapping(
        &self,
        schedule: &PrimaryValidatorSchedule,
        current: Option<&ScheduleEntry>,
    ) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|entry| {
            !entry.seeded && Some(*entry) != current && entry.schedule.overlaps(schedule)
        })
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }
}

impl Blockchain {
    /// Account authorized to sign block `block_number`.
    pub fn primary_validator_for_block(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<AccountNumber>, LedgerError> {
        Ok(self
            .schedule
            .read()
            .resolve(block_number)
            .map(|entry| entry.primary_validator.clone()))
    }

    /// Primary validator node for `at_block_number`, or for the next block when `None`.
    pub fn get_primary_validator(
        &self,
        at_block_number: Option<BlockNumber>,
    ) -> Result<Option<Node>, LedgerError> {
        let block_number = match at_block_number {
            Some(n) => n,
            None => self.next_block_number()?,
        };
        let Some(identifier) = self.primary_validator_for_block(block_number)? else {
            return Ok(None);
        };
        let state_height = self.state_height_before(block_number)?;
        Ok(self
            .get_account_state(&identifier, state_height)?
            .and_then(|state| state.node))
    }

    pub fn get_node_role(
        &self,
        identifier: &str,
        at_block_number: Option<BlockNumber>,
    ) -> Result<Option<NodeRole>, LedgerError> {
        let next = self.next_block_number()?;
        let block_number = at_block_number.unwrap_or(next);
        let cacheable = block_number <= next;

        let key = (identifier.to_string(), block_number);
        if cacheable {
            if let Some(role) = self.roles.get_role(&key) {
                return Ok(role);
            }
        }

        let role = if self.primary_validator_for_block(block_number)?.as_deref() == Some(identifier)
        {
            Some(NodeRole::PrimaryValidator)
        } else {
            let state_height = self.state_height_before(block_number)?;
            self.get_account_state(identifier, state_height)?
                .and_then(|state| state.node)
                .map(|_| NodeRole::RegularNode)
        };

        if cacheable {
            self.roles.put_role(key, role);
        }
        Ok(role)
    }

    /// Height whose state governs block `block_number`, clamped to the tip.
    fn state_height_before(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<BlockNumber>, LedgerError> {
        let tip = self.last_block_number()?;
        Ok(block_number.checked_sub(1).min(tip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::AccountState;
    use std::collections::BTreeMap;

    fn genesis_with_pv(pv: &str, end: BlockNumber) -> BlockchainState {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            pv.to_string(),
            AccountState {
                node: Some(Node::new(pv.to_string(), 0)),
                primary_validator_schedule: Some(PrimaryValidatorSchedule::new(0, end)),
                ..Default::default()
            },
        );
        BlockchainState::genesis(accounts).unwrap()
    }

    #[test]
    fn test_genesis_pv_covers_default_range_only() {
        let mut index = ScheduleIndex::default();
        index.seed_from_state(&genesis_with_pv("pv", 99));

        for n in [0, 50, 99] {
            assert_eq!(index.resolve(n).unwrap().primary_validator, "pv");
        }
        assert!(index.resolve(100).is_none());
    }

    #[test]
    fn test_latest_commit_wins_and_takes_effect_after_commit() {
        let mut index = ScheduleIndex::default();
        index.seed_from_state(&genesis_with_pv("pv", 99));
        index.entries.push(ScheduleEntry {
            committed_at: Some(10),
            primary_validator: "next".to_string(),
            schedule: PrimaryValidatorSchedule::new(10, 20),
            seeded: false,
        });

        // Block 10 committed the entry, so block 10 itself is still signed by the old PV.
        assert_eq!(index.resolve(10).unwrap().primary_validator, "pv");
        assert_eq!(index.resolve(11).unwrap().primary_validator, "next");
        assert_eq!(index.resolve(21).unwrap().primary_validator, "pv");
    }

    #[test]
    fn test_state_history_rebuilds_replayed_index() {
        // Replay keeps every commit; a state seeded later must yield the same index.
        let mut state = genesis_with_pv("pv", u64::MAX);
        let mut replayed = ScheduleIndex::default();
        replayed.seed_from_state(&state);

        for (committed_at, pv, begin, end) in [(0, "next", 2, 10), (2, "pv", 4, 6)] {
            let entry = ScheduleEntry {
                committed_at: Some(committed_at),
                primary_validator: pv.to_string(),
                schedule: PrimaryValidatorSchedule::new(begin, end),
                seeded: false,
            };
            replayed.entries.push(entry.clone());
            state.primary_validator_schedules.push(entry);
        }
        state.last_block_number = Some(8);

        let mut seeded = ScheduleIndex::default();
        seeded.seed_from_state(&state);
        assert_eq!(seeded.entries(), replayed.entries());

        let expected = [
            (3, "next"),
            (4, "pv"),
            (6, "pv"),
            (7, "next"),
            (10, "next"),
            (11, "pv"),
        ];
        for (n, pv) in expected {
            assert_eq!(seeded.resolve(n).unwrap().primary_validator, pv, "block {}", n);
        }
        // Commits carried in a state keep their overlap protection.
        assert!(seeded
            .overlapping(&PrimaryValidatorSchedule::new(5, 12), seeded.resolve(9))
            .is_some());
    }

    #[test]
    fn test_overlap_detection() {
        let mut index = ScheduleIndex::default();
        index.seed_from_state(&genesis_with_pv("pv", 99));

        // The genesis range is only a default and can be handed off.
        assert!(index
            .overlapping(&PrimaryValidatorSchedule::new(90, 120), None)
            .is_none());

        index.entries.push(ScheduleEntry {
            committed_at: Some(5),
            primary_validator: "next".to_string(),
            schedule: PrimaryValidatorSchedule::new(100, 120),
            seeded: false,
        });
        let proposed = PrimaryValidatorSchedule::new(110, 130);
        assert!(index.overlapping(&proposed, None).is_some());

        let current = index.entries[1].clone();
        assert!(index.overlapping(&proposed, Some(&current)).is_none());
        assert!(index
            .overlapping(&PrimaryValidatorSchedule::new(121, 130), None)
            .is_none());
    }
}
