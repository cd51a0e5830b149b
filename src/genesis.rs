//! Genesis blockchain state construction.
//!
//! A ledger starts from a full account-state map: either built directly or
//! imported from a legacy account root file, a JSON object mapping account
//! numbers to `{"balance": .., "balance_lock": ..}`.

use crate::blockchain::{
    AccountState, BlockNumber, Blockchain, BlockchainState, Node, PrimaryValidatorSchedule,
};
use crate::crypto::AccountNumber;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootAccountEntry {
    pub balance: u64,
    #[serde(default)]
    pub balance_lock: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenesisOptions {
    /// Node declared as the initial primary validator.
    pub primary_validator: Option<Node>,
    /// Last block the initial primary validator may sign.
    pub primary_validator_schedule_end: BlockNumber,
}

impl Default for GenesisOptions {
    fn default() -> Self {
        Self {
            primary_validator: None,
            primary_validator_schedule_end: BlockNumber::MAX,
        }
    }
}

impl GenesisOptions {
    pub fn with_primary_validator(node: Node, schedule_end: BlockNumber) -> Self {
        Self {
            primary_validator: Some(node),
            primary_validator_schedule_end: schedule_end,
        }
    }
}

pub fn make_genesis_state(
    mut accounts: BTreeMap<AccountNumber, AccountState>,
    options: &GenesisOptions,
) -> Result<BlockchainState> {
    if let Some(node) = &options.primary_validator {
        let state = accounts.entry(node.identifier.clone()).or_default();
        state.node = Some(node.clone());
        state.primary_validator_schedule = Some(PrimaryValidatorSchedule::new(
            0,
            options.primary_validator_schedule_end,
        ));
    }
    BlockchainState::genesis(accounts)
}

/// Converts root file entries into account states. A lock equal to the
/// account number is the default lock and is not stored.
pub fn parse_account_root_file(json: &str) -> Result<BTreeMap<AccountNumber, AccountState>> {
    let entries: BTreeMap<AccountNumber, RootAccountEntry> = serde_json::from_str(json)?;
    let mut accounts = BTreeMap::new();
    for (account_number, entry) in entries {
        if account_number.is_empty() {
            return Err(LedgerError::validation("Empty account number in root file"));
        }
        let balance_lock = entry
            .balance_lock
            .filter(|lock| !lock.is_empty() && lock != &account_number);
        accounts.insert(
            account_number,
            AccountState {
                balance: entry.balance,
                balance_lock,
                ..Default::default()
            },
        );
    }
    Ok(accounts)
}

/// Initializes an empty ledger from the account root file at `path`.
pub fn import_account_root_file(
    blockchain: &Blockchain,
    path: impl AsRef<Path>,
    options: &GenesisOptions,
) -> Result<BlockchainState> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)?;
    let accounts = parse_account_root_file(&json)?;
    let state = make_genesis_state(accounts, options)?;
    blockchain.add_blockchain_state(state.clone())?;
    info!(
        "Imported {} accounts from {}",
        state.account_states.len(),
        path.display()
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_file_locks() {
        let json = r#"{
            "aaaa": {"balance": 10, "balance_lock": "aaaa"},
            "bbbb": {"balance": 20, "balance_lock": "c0ffee"},
            "cccc": {"balance": 30}
        }"#;
        let accounts = parse_account_root_file(json).unwrap();
        assert_eq!(accounts["aaaa"].balance_lock, None);
        assert_eq!(accounts["bbbb"].balance_lock.as_deref(), Some("c0ffee"));
        assert_eq!(accounts["cccc"].balance, 30);
        assert_eq!(accounts["aaaa"].effective_balance_lock("aaaa"), "aaaa");
    }

    #[test]
    fn test_root_file_rejects_malformed_json() {
        assert!(matches!(
            parse_account_root_file(r#"{"aaaa": {"balance": -1}}"#),
            Err(LedgerError::Serialization(_))
        ));
    }

    #[test]
    fn test_genesis_declares_primary_validator() {
        let node = Node::new("pv".to_string(), 4);
        let options = GenesisOptions::with_primary_validator(node.clone(), 99);
        let state = make_genesis_state(BTreeMap::new(), &options).unwrap();

        let pv = state.get_account_state("pv").unwrap();
        assert_eq!(pv.node.as_ref(), Some(&node));
        assert_eq!(
            pv.primary_validator_schedule,
            Some(PrimaryValidatorSchedule::new(0, 99))
        );
        assert!(state.is_genesis());
    }

    #[test]
    fn test_genesis_marker_depends_on_accounts() {
        let options = GenesisOptions::default();
        let mut accounts = BTreeMap::new();
        let empty = make_genesis_state(accounts.clone(), &options).unwrap();
        accounts.insert("aaaa".to_string(), AccountState::with_balance(1));
        let funded = make_genesis_state(accounts, &options).unwrap();
        assert_ne!(empty.next_block_identifier, funded.next_block_identifier);
    }
}
