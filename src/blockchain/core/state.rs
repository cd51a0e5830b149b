use crate::crypto::{hash_normalized, AccountNumber, Hash};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::chain::{Block, BlockNumber, Blockchain};
use super::schedule::ScheduleEntry;

/// A node declaration. Role (regular node or primary validator) is not stored
/// here; it is resolved from the primary validator schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub identifier: AccountNumber,
    #[serde(default)]
    pub network_addresses: Vec<String>,
    pub fee_amount: u64,
    #[serde(default)]
    pub fee_account: Option<AccountNumber>,
}

impl Node {
    pub fn new(identifier: AccountNumber, fee_amount: u64) -> Self {
        Node {
            identifier,
            network_addresses: Vec::new(),
            fee_amount,
            fee_account: None,
        }
    }

    pub fn with_network_address(mut self, address: impl Into<String>) -> Self {
        self.network_addresses.push(address.into());
        self
    }

    pub fn with_fee_account(mut self, fee_account: AccountNumber) -> Self {
        self.fee_account = Some(fee_account);
        self
    }

    /// The account that receives this node's fees.
    pub fn fee_payee(&self) -> &AccountNumber {
        self.fee_account.as_ref().unwrap_or(&self.identifier)
    }
}

/// Inclusive range of block numbers a primary validator may sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryValidatorSchedule {
    pub begin_block_number: BlockNumber,
    pub end_block_number: BlockNumber,
}

impl PrimaryValidatorSchedule {
    pub fn new(begin_block_number: BlockNumber, end_block_number: BlockNumber) -> Self {
        Self {
            begin_block_number,
            end_block_number,
        }
    }

    pub fn covers(&self, block_number: BlockNumber) -> bool {
        self.begin_block_number <= block_number && block_number <= self.end_block_number
    }

    pub fn overlaps(&self, other: &PrimaryValidatorSchedule) -> bool {
        self.begin_block_number <= other.end_block_number
            && other.begin_block_number <= self.end_block_number
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u64,
    /// `None` until the account first spends; the account number is the lock until then.
    #[serde(default)]
    pub balance_lock: Option<Hash>,
    #[serde(default)]
    pub node: Option<Node>,
    #[serde(default)]
    pub primary_validator_schedule: Option<PrimaryValidatorSchedule>,
}

impl AccountState {
    pub fn with_balance(balance: u64) -> Self {
        AccountState {
            balance,
            ..Default::default()
        }
    }

    pub fn effective_balance_lock(&self, account_number: &str) -> Hash {
        self.balance_lock
            .clone()
            .unwrap_or_else(|| account_number.to_string())
    }
}

/// Full materialization of every account state at a checkpoint height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainState {
    /// `None` for the genesis state (before block 0).
    pub last_block_number: Option<BlockNumber>,
    pub last_block_identifier: Option<Hash>,
    pub last_block_timestamp: Option<DateTime<Utc>>,
    /// Identifier the next block must carry.
    pub next_block_identifier: Hash,
    pub account_states: BTreeMap<AccountNumber, AccountState>,
    /// Every schedule entry known at this height, in commit order. Account
    /// states only keep each account's latest range, so resolution after a
    /// bootstrap needs the full history.
    #[serde(default)]
    pub primary_validator_schedules: Vec<ScheduleEntry>,
}

impl BlockchainState {
    /// Genesis state; the genesis marker is the hash of the seed account states.
    pub fn genesis(
        account_states: BTreeMap<AccountNumber, AccountState>,
    ) -> Result<Self, LedgerError> {
        let next_block_identifier = hash_normalized(&account_states)?;
        let primary_validator_schedules = account_states
            .iter()
            .filter_map(|(account_number, state)| {
                state
                    .primary_validator_schedule
                    .map(|schedule| ScheduleEntry::seeded(account_number.clone(), schedule))
            })
            .collect();
        Ok(BlockchainState {
            last_block_number: None,
            last_block_identifier: None,
            last_block_timestamp: None,
            next_block_identifier,
            account_states,
            primary_validator_schedules,
        })
    }

    pub fn is_genesis(&self) -> bool {
        self.last_block_number.is_none()
    }

    pub fn next_block_number(&self) -> BlockNumber {
        self.last_block_number.map_or(0, |n| n + 1)
    }

    pub fn get_account_state(&self, account_number: &str) -> Option<&AccountState> {
        self.account_states.get(account_number)
    }

    /// Folds one block's delta into this state, checking it continues the chain.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), LedgerError> {
        let message = &block.message;
        if message.number != self.next_block_number() {
            return Err(LedgerError::validation(format!(
                "Block {} does not follow blockchain state at {:?}",
                message.number, self.last_block_number
            )));
        }
        if message.identifier != self.next_block_identifier {
            return Err(LedgerError::validation(format!(
                "Block {} identifier {} does not continue blockchain state (expected {})",
                message.number, message.identifier, self.next_block_identifier
            )));
        }

        for (account_number, account_state) in &message.updated_account_states {
            self.account_states
                .insert(account_number.clone(), account_state.clone());
        }
        if let Some(entry) = ScheduleEntry::from_block(block) {
            self.primary_validator_schedules.push(entry);
        }
        self.last_block_number = Some(message.number);
        self.last_block_identifier = Some(message.identifier.clone());
        self.last_block_timestamp = Some(message.timestamp);
        self.next_block_identifier = block.hash()?;
        Ok(())
    }
}

// Balance/lock engine: nearest snapshot at or before the height, then replay.
impl Blockchain {
    /// Account state right after block `at_block_number` (`None` = before any block).
    ///
    /// Returns `Ok(None)` for accounts the ledger has never seen.
    pub fn get_account_state(
        &self,
        account_number: &str,
        at_block_number: Option<BlockNumber>,
    ) -> Result<Option<AccountState>, LedgerError> {
        self.check_height(at_block_number)?;

        let snapshot = self
            .get_blockchain_state_by_block_number(at_block_number)?
            .ok_or_else(|| {
                LedgerError::Range(format!(
                    "No blockchain state at or before {:?}",
                    at_block_number
                ))
            })?;
        let mut account_state = snapshot.get_account_state(account_number).cloned();

        if let Some(target) = at_block_number {
            let start = snapshot.next_block_number();
            if start <= target {
                for block in self.yield_blocks_from(start)? {
                    let block = block?;
                    if block.message.number > target {
                        break;
                    }
                    if let Some(updated) = block.message.updated_account_states.get(account_number)
                    {
                        account_state = Some(updated.clone());
                    }
                }
            }
        }

        Ok(account_state)
    }

    /// Account state at the current tip.
    pub fn get_current_account_state(
        &self,
        account_number: &str,
    ) -> Result<Option<AccountState>, LedgerError> {
        self.get_account_state(account_number, self.last_block_number()?)
    }

    pub fn get_balance(
        &self,
        account_number: &str,
        at_block_number: Option<BlockNumber>,
    ) -> Result<u64, LedgerError> {
        Ok(self
            .get_account_state(account_number, at_block_number)?
            .map_or(0, |state| state.balance))
    }

    /// The token that must be presented to authorize the account's next request.
    pub fn get_balance_lock(
        &self,
        account_number: &str,
        at_block_number: Option<BlockNumber>,
    ) -> Result<Hash, LedgerError> {
        Ok(self
            .get_account_state(account_number, at_block_number)?
            .unwrap_or_default()
            .effective_balance_lock(account_number))
    }

    pub(crate) fn check_height(&self, at_block_number: Option<BlockNumber>) -> Result<(), LedgerError> {
        if let Some(n) = at_block_number {
            match self.last_block_number()? {
                Some(tip) if n <= tip => {}
                tip => {
                    return Err(LedgerError::Range(format!(
                        "Block number {} is beyond the chain tip {:?}",
                        n, tip
                    )))
                }
            }
        }
        Ok(())
    }
}
