//! Integration tests for block validation, the balance/lock engine and the
//! primary validator schedule.

mod common;

use common::*;
use ledgerchain::blockchain::{Blockchain, NodeRole};
use ledgerchain::error::LedgerError;
use ledgerchain::request::SignedChangeRequestMessage;
use std::sync::Arc;

fn in_memory_ledger(accounts: &Accounts, snapshot_period: u64, schedule_end: u64) -> Blockchain {
    let blockchain = Blockchain::in_memory(10, snapshot_period).expect("in-memory ledger");
    accounts.initialize(&blockchain, schedule_end);
    blockchain
}

fn assert_validation_error(result: Result<impl std::fmt::Debug, LedgerError>, needle: &str) {
    match result {
        Err(LedgerError::Validation(message)) => assert!(
            message.contains(needle),
            "expected '{}' in '{}'",
            needle,
            message
        ),
        other => panic!("expected validation error containing '{}', got {:?}", needle, other),
    }
}

#[test]
fn test_transfer_with_fees() -> TestResult {
    let accounts = Accounts::new(4);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);

    let request = transfer(
        &blockchain,
        &accounts.alice,
        &accounts.bob.account_number(),
        100,
        &[accounts.pv_node(), accounts.preferred_node()],
    );
    let expected_lock = request.hash()?;
    let block = blockchain.add_block_from_request(request, &accounts.pv)?;
    assert_eq!(block.number(), 0);

    let tip = blockchain.last_block_number()?;
    assert_eq!(tip, Some(0));
    assert_eq!(blockchain.get_balance(&accounts.alice.account_number(), tip)?, 895);
    assert_eq!(blockchain.get_balance(&accounts.bob.account_number(), tip)?, 100);
    assert_eq!(blockchain.get_balance(&accounts.pv.account_number(), tip)?, 4);
    assert_eq!(blockchain.get_balance(&accounts.node.account_number(), tip)?, 1);
    assert_eq!(
        blockchain.get_balance_lock(&accounts.alice.account_number(), tip)?,
        expected_lock
    );

    // Before the block the genesis values still hold.
    assert_eq!(
        blockchain.get_balance(&accounts.alice.account_number(), None)?,
        ALICE_BALANCE
    );
    assert_eq!(
        blockchain.get_balance_lock(&accounts.alice.account_number(), None)?,
        accounts.alice.account_number()
    );
    Ok(())
}

#[test]
fn test_replayed_request_is_rejected() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);

    let request = transfer(&blockchain, &accounts.alice, &accounts.bob.account_number(), 10, &[]);
    blockchain.add_block_from_request(request.clone(), &accounts.pv)?;

    assert_validation_error(
        blockchain.add_block_from_request(request, &accounts.pv),
        "Stale or invalid lock",
    );
    assert_eq!(blockchain.last_block_number()?, Some(0));
    assert_eq!(
        blockchain.get_balance(&accounts.alice.account_number(), Some(0))?,
        990
    );
    Ok(())
}

#[test]
fn test_re_adding_a_block_is_a_sequencing_error() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);
    let block = add_transfers(&blockchain, &accounts, 1).remove(0);

    assert_validation_error(blockchain.add_block(block), "Block number mismatch");
    assert_eq!(blockchain.last_block_number()?, Some(0));
    Ok(())
}

#[test]
fn test_chain_break_is_rejected() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);
    add_transfers(&blockchain, &accounts, 1);

    let request = transfer(&blockchain, &accounts.alice, &accounts.bob.account_number(), 1, &[]);
    let mut block = blockchain.create_block(request, &accounts.pv)?;
    block.message.identifier = "00".repeat(32);
    let block = ledgerchain::blockchain::Block::sign(block.message, &accounts.pv)?;

    assert_validation_error(blockchain.add_block(block), "Chain break");
    Ok(())
}

#[test]
fn test_fee_rules() -> TestResult {
    let accounts = Accounts::new(4);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);
    let bob = accounts.bob.account_number();

    let missing_pv_fee = transfer(&blockchain, &accounts.alice, &bob, 10, &[]);
    assert_validation_error(
        blockchain.add_block_from_request(missing_pv_fee, &accounts.pv),
        "Missing primary validator fee",
    );

    let mut cheap_pv = accounts.pv_node();
    cheap_pv.fee_amount = 3;
    let wrong_amount = transfer(&blockchain, &accounts.alice, &bob, 10, &[cheap_pv]);
    assert_validation_error(
        blockchain.add_block_from_request(wrong_amount, &accounts.pv),
        "Fee mismatch",
    );

    let undeclared = ledgerchain::blockchain::Node::new(accounts.bob.account_number(), 2);
    let unknown_node = transfer(
        &blockchain,
        &accounts.alice,
        &accounts.node.account_number(),
        10,
        &[accounts.pv_node(), undeclared],
    );
    assert_validation_error(
        blockchain.add_block_from_request(unknown_node, &accounts.pv),
        "has no node declaration",
    );

    assert_eq!(blockchain.last_block_number()?, None);
    Ok(())
}

#[test]
fn test_insufficient_balance() -> TestResult {
    let accounts = Accounts::new(4);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);

    // 997 + 4 exceeds 1000.
    let request = transfer(
        &blockchain,
        &accounts.alice,
        &accounts.bob.account_number(),
        997,
        &[accounts.pv_node()],
    );
    assert_validation_error(
        blockchain.add_block_from_request(request, &accounts.pv),
        "Insufficient balance",
    );

    let exact = transfer(
        &blockchain,
        &accounts.alice,
        &accounts.bob.account_number(),
        996,
        &[accounts.pv_node()],
    );
    blockchain.add_block_from_request(exact, &accounts.pv)?;
    assert_eq!(
        blockchain.get_balance(&accounts.alice.account_number(), Some(0))?,
        0
    );
    Ok(())
}

#[test]
fn test_block_signed_by_non_primary_validator() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);

    let request = transfer(&blockchain, &accounts.alice, &accounts.bob.account_number(), 5, &[]);
    let block = blockchain.create_block(request, &accounts.node)?;
    assert_validation_error(blockchain.add_block(block), "Unauthorized signer");

    let request = transfer(&blockchain, &accounts.alice, &accounts.bob.account_number(), 5, &[]);
    let mut block = blockchain.create_block(request, &accounts.pv)?;
    block.message.timestamp = block.message.timestamp + chrono::Duration::seconds(1);
    assert_validation_error(blockchain.add_block(block), "Unauthorized signer");
    Ok(())
}

#[test]
fn test_tampered_updates_are_rejected() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);

    let request = transfer(&blockchain, &accounts.alice, &accounts.bob.account_number(), 5, &[]);
    let mut block = blockchain.create_block(request, &accounts.pv)?;
    if let Some(state) = block
        .message
        .updated_account_states
        .get_mut(&accounts.bob.account_number())
    {
        state.balance = 500;
    }
    let block = ledgerchain::blockchain::Block::sign(block.message, &accounts.pv)?;
    assert_validation_error(blockchain.add_block(block), "do not match");
    Ok(())
}

#[test]
fn test_lock_and_balance_history() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 4, u64::MAX);
    let blocks = add_transfers(&blockchain, &accounts, 11);
    let alice = accounts.alice.account_number();

    for block in &blocks {
        let n = block.number();
        assert_eq!(blockchain.get_balance(&alice, Some(n))?, ALICE_BALANCE - n - 1);
        assert_eq!(blockchain.get_balance_lock(&alice, Some(n))?, block.message.request.hash()?);
        assert_eq!(
            blockchain.get_balance(&accounts.bob.account_number(), Some(n))?,
            n + 1
        );
    }

    // Snapshots bound replay: genesis plus one per period.
    let states: Vec<_> = blockchain
        .yield_blockchain_states_meta()?
        .map(|meta| meta.last_block_number)
        .collect();
    assert_eq!(states, vec![None, Some(3), Some(7)]);

    assert!(matches!(
        blockchain.get_balance(&alice, Some(11)),
        Err(LedgerError::Range(_))
    ));
    assert_eq!(blockchain.get_balance("unknown", Some(5))?, 0);
    assert!(blockchain.get_account_state("unknown", Some(5))?.is_none());
    Ok(())
}

#[test]
fn test_materialized_state_matches_replay() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 5, u64::MAX);
    let blocks = add_transfers(&blockchain, &accounts, 7);

    let state = blockchain.make_blockchain_state_at(6)?;
    assert_eq!(state.last_block_number, Some(6));
    assert_eq!(state.last_block_identifier.as_ref(), Some(&blocks[6].message.identifier));
    assert_eq!(state.next_block_identifier, blocks[6].hash()?);
    assert_eq!(
        state
            .get_account_state(&accounts.alice.account_number())
            .map(|s| s.balance),
        Some(ALICE_BALANCE - 7)
    );

    let snapshot = blockchain.snapshot_blockchain_state()?.expect("snapshot");
    assert_eq!(*snapshot, state);
    assert_eq!(blockchain.next_block_identifier()?, blocks[6].hash()?);
    Ok(())
}

#[test]
fn test_blocks_for_account() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);
    add_transfers(&blockchain, &accounts, 3);

    let request = transfer(&blockchain, &accounts.alice, &accounts.node.account_number(), 2, &[]);
    blockchain.add_block_from_request(request, &accounts.pv)?;

    let bob_blocks: Vec<u64> = blockchain
        .yield_blocks_for_account(&accounts.bob.account_number())?
        .map(|block| block.map(|b| b.number()))
        .collect::<Result<_, _>>()?;
    assert_eq!(bob_blocks, vec![2, 1, 0]);

    let node_blocks: Vec<u64> = blockchain
        .yield_blocks_for_account(&accounts.node.account_number())?
        .map(|block| block.map(|b| b.number()))
        .collect::<Result<_, _>>()?;
    assert_eq!(node_blocks, vec![3]);
    Ok(())
}

#[test]
fn test_primary_validator_beyond_genesis_range() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, 9);

    for n in [0, 5, 9] {
        assert_eq!(blockchain.get_primary_validator(Some(n))?, Some(accounts.pv_node()));
    }
    assert_eq!(blockchain.get_primary_validator(Some(10))?, None);
    assert_eq!(blockchain.get_primary_validator(None)?, Some(accounts.pv_node()));

    assert_eq!(
        blockchain.get_node_role(&accounts.pv.account_number(), Some(3))?,
        Some(NodeRole::PrimaryValidator)
    );
    assert_eq!(
        blockchain.get_node_role(&accounts.node.account_number(), None)?,
        Some(NodeRole::RegularNode)
    );
    assert_eq!(
        blockchain.get_node_role(&accounts.alice.account_number(), None)?,
        None
    );

    add_transfers(&blockchain, &accounts, 10);
    let request = transfer(&blockchain, &accounts.alice, &accounts.bob.account_number(), 1, &[]);
    assert_validation_error(
        blockchain.add_block_from_request(request, &accounts.pv),
        "Unauthorized signer",
    );
    Ok(())
}

#[test]
fn test_primary_validator_handoff() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = in_memory_ledger(&accounts, 100, u64::MAX);
    let node = accounts.node.account_number();

    // Only the current PV may schedule.
    let request = schedule(&blockchain, &accounts.alice, &node, 3, 20);
    assert_validation_error(
        blockchain.add_block_from_request(request, &accounts.pv),
        "Only the primary validator",
    );

    // The designated account must have declared a node.
    let request = schedule(&blockchain, &accounts.pv, &accounts.bob.account_number(), 3, 20);
    assert_validation_error(
        blockchain.add_block_from_request(request, &accounts.pv),
        "has no node declaration",
    );

    let request = schedule(&blockchain, &accounts.pv, &node, 0, 20);
    assert_validation_error(
        blockchain.add_block_from_request(request, &accounts.pv),
        "Schedule must begin after block 0",
    );

    let request = schedule(&blockchain, &accounts.pv, &node, 3, 20);
    let block = blockchain.add_block_from_request(request, &accounts.pv)?;
    assert!(matches!(
        block.message.request.message,
        SignedChangeRequestMessage::PrimaryValidatorSchedule(_)
    ));

    // A second commit overlapping the pending one is rejected.
    let request = schedule(&blockchain, &accounts.pv, &node, 15, 30);
    assert_validation_error(
        blockchain.add_block_from_request(request, &accounts.pv),
        "overlaps",
    );
    assert_eq!(blockchain.last_block_number()?, Some(0));
    add_transfers(&blockchain, &accounts, 2);

    assert_eq!(
        blockchain.get_primary_validator(Some(3))?,
        Some(accounts.preferred_node())
    );
    assert_eq!(blockchain.get_primary_validator(Some(21))?, Some(accounts.pv_node()));

    // Block 3 now needs the new PV's signature and, since alice is not the PV, its fee.
    let request = transfer(
        &blockchain,
        &accounts.alice,
        &accounts.bob.account_number(),
        1,
        &[accounts.preferred_node()],
    );
    assert_validation_error(
        blockchain.add_block_from_request(request.clone(), &accounts.pv),
        "Unauthorized signer",
    );
    let block = blockchain.add_block_from_request(request, &accounts.node)?;
    assert_eq!(block.number(), 3);
    assert_eq!(
        blockchain.get_balance(&node, Some(3))?,
        PREFERRED_NODE_FEE
    );

    // The governing PV may hand off before its own range ends.
    let request = schedule(&blockchain, &accounts.node, &accounts.pv.account_number(), 10, 40);
    blockchain.add_block_from_request(request, &accounts.node)?;
    assert_eq!(blockchain.primary_validator_for_block(9)?, Some(node.clone()));
    assert_eq!(
        blockchain.primary_validator_for_block(10)?,
        Some(accounts.pv.account_number())
    );
    Ok(())
}

#[test]
fn test_concurrent_writers_are_serialized() -> TestResult {
    let accounts = Accounts::new(0);
    let blockchain = Arc::new(in_memory_ledger(&accounts, 3, u64::MAX));

    // Fund independent senders so their requests don't share a lock.
    let senders: Vec<_> = (0..4)
        .map(|_| ledgerchain::crypto::KeyPair::generate())
        .collect::<Result<_, _>>()?;
    for sender in &senders {
        let request = transfer(&blockchain, &accounts.alice, &sender.account_number(), 50, &[]);
        blockchain.add_block_from_request(request, &accounts.pv)?;
    }

    std::thread::scope(|scope| {
        for sender in &senders {
            let blockchain = Arc::clone(&blockchain);
            let accounts = &accounts;
            scope.spawn(move || {
                for _ in 0..5 {
                    let request =
                        transfer(&blockchain, sender, &accounts.bob.account_number(), 1, &[]);
                    blockchain
                        .add_block_from_request(request, &accounts.pv)
                        .expect("concurrent add");
                }
            });
        }
    });

    assert_eq!(blockchain.last_block_number()?, Some(23));
    let numbers: Vec<u64> = blockchain
        .yield_blocks_from(0)?
        .map(|block| block.map(|b| b.number()))
        .collect::<Result<_, _>>()?;
    assert_eq!(numbers, (0..24).collect::<Vec<_>>());
    assert_eq!(
        blockchain.get_balance(&accounts.bob.account_number(), Some(23))?,
        20
    );
    Ok(())
}
