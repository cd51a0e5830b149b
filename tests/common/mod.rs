//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use ledgerchain::blockchain::{AccountState, Block, BlockNumber, Blockchain, Node};
use ledgerchain::crypto::KeyPair;
use ledgerchain::genesis::{make_genesis_state, GenesisOptions};
use ledgerchain::request::{
    CoinTransferMessage, PrimaryValidatorScheduleMessage, SignedChangeRequest,
    SignedChangeRequestMessage,
};
use std::collections::BTreeMap;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const ALICE_BALANCE: u64 = 1000;
pub const PREFERRED_NODE_FEE: u64 = 1;

/// Keys for a small ledger: a primary validator, a preferred node and two users.
pub struct Accounts {
    pub pv: KeyPair,
    pub node: KeyPair,
    pub alice: KeyPair,
    pub bob: KeyPair,
    pub pv_fee: u64,
}

impl Accounts {
    pub fn new(pv_fee: u64) -> Self {
        Self {
            pv: KeyPair::generate().expect("keygen"),
            node: KeyPair::generate().expect("keygen"),
            alice: KeyPair::generate().expect("keygen"),
            bob: KeyPair::generate().expect("keygen"),
            pv_fee,
        }
    }

    pub fn pv_node(&self) -> Node {
        Node::new(self.pv.account_number(), self.pv_fee)
    }

    pub fn preferred_node(&self) -> Node {
        Node::new(self.node.account_number(), PREFERRED_NODE_FEE)
            .with_network_address("http://127.0.0.1:8555")
    }

    /// Alice holds the only balance; the preferred node is declared at genesis.
    pub fn genesis_options(&self, schedule_end: BlockNumber) -> GenesisOptions {
        GenesisOptions::with_primary_validator(self.pv_node(), schedule_end)
    }

    pub fn initialize(&self, blockchain: &Blockchain, schedule_end: BlockNumber) {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            self.alice.account_number(),
            AccountState::with_balance(ALICE_BALANCE),
        );
        accounts.insert(
            self.node.account_number(),
            AccountState {
                node: Some(self.preferred_node()),
                ..Default::default()
            },
        );
        let state = make_genesis_state(accounts, &self.genesis_options(schedule_end))
            .expect("genesis state");
        blockchain
            .add_blockchain_state(state)
            .expect("initialize blockchain");
    }
}

/// Gives `target` the same genesis as `source`.
pub fn copy_genesis(source: &Blockchain, target: &Blockchain) {
    let genesis = source
        .first_blockchain_state()
        .expect("read genesis")
        .expect("source is initialized");
    target
        .add_blockchain_state((*genesis).clone())
        .expect("initialize target");
}

pub fn current_lock(blockchain: &Blockchain, account: &KeyPair) -> String {
    let tip = blockchain.last_block_number().expect("tip");
    blockchain
        .get_balance_lock(&account.account_number(), tip)
        .expect("balance lock")
}

pub fn transfer(
    blockchain: &Blockchain,
    from: &KeyPair,
    to: &str,
    amount: u64,
    fee_nodes: &[Node],
) -> SignedChangeRequest {
    let mut message = CoinTransferMessage::new(current_lock(blockchain, from), to.to_string(), amount);
    for node in fee_nodes {
        message = message.with_fee_for(node);
    }
    SignedChangeRequest::create(SignedChangeRequestMessage::CoinTransfer(message), from)
        .expect("sign transfer")
}

pub fn schedule(
    blockchain: &Blockchain,
    signer: &KeyPair,
    primary_validator: &str,
    begin: BlockNumber,
    end: BlockNumber,
) -> SignedChangeRequest {
    let message = PrimaryValidatorScheduleMessage {
        balance_lock: current_lock(blockchain, signer),
        primary_validator: primary_validator.to_string(),
        begin_block_number: begin,
        end_block_number: end,
    };
    SignedChangeRequest::create(
        SignedChangeRequestMessage::PrimaryValidatorSchedule(message),
        signer,
    )
    .expect("sign schedule")
}

/// Appends `count` one-coin transfers from alice to bob, signed by the genesis PV.
pub fn add_transfers(blockchain: &Blockchain, accounts: &Accounts, count: u64) -> Vec<Block> {
    let fee_nodes: Vec<Node> = if accounts.pv_fee > 0 {
        vec![accounts.pv_node()]
    } else {
        Vec::new()
    };
    (0..count)
        .map(|_| {
            let request = transfer(
                blockchain,
                &accounts.alice,
                &accounts.bob.account_number(),
                1,
                &fee_nodes,
            );
            blockchain
                .add_block_from_request(request, &accounts.pv)
                .expect("add block")
        })
        .collect()
}
