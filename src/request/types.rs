/// Signed change request types for LedgerChain
use crate::blockchain::Node;
use crate::crypto::{hash_normalized, AccountNumber, Hash, KeyPair, Signature};
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};

/// The primary movement of coins in a coin transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinTransferTransaction {
    pub recipient: AccountNumber,
    pub amount: u64,
    #[serde(default)]
    pub memo: Option<String>,
}

/// A fee owed to a node, at the amount the node itself declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTransaction {
    /// Identifier of the node being paid (the primary validator or a preferred node).
    pub node: AccountNumber,
    /// The node's fee account, or the node itself when it declared none.
    pub recipient: AccountNumber,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinTransferMessage {
    pub balance_lock: Hash,
    pub transaction: CoinTransferTransaction,
    #[serde(default)]
    pub fees: Vec<FeeTransaction>,
}

impl CoinTransferMessage {
    /// Maximum memo length (256 characters)
    pub const MAX_MEMO_LENGTH: usize = 256;

    pub fn new(balance_lock: Hash, recipient: AccountNumber, amount: u64) -> Self {
        CoinTransferMessage {
            balance_lock,
            transaction: CoinTransferTransaction {
                recipient,
                amount,
                memo: None,
            },
            fees: Vec::new(),
        }
    }

    pub fn with_memo(mut self, memo: String) -> Result<Self, LedgerError> {
        if memo.chars().count() > Self::MAX_MEMO_LENGTH {
            return Err(LedgerError::validation(format!(
                "Memo exceeds maximum length of {} characters",
                Self::MAX_MEMO_LENGTH
            )));
        }
        self.transaction.memo = Some(memo);
        Ok(self)
    }

    /// Adds the fee owed to `node` at its declared amount.
    pub fn with_fee_for(mut self, node: &Node) -> Self {
        self.fees.push(FeeTransaction {
            node: node.identifier.clone(),
            recipient: node.fee_payee().clone(),
            amount: node.fee_amount,
        });
        self
    }

    /// Amount plus every fee, or `None` on overflow.
    pub fn total_amount(&self) -> Option<u64> {
        self.fees
            .iter()
            .try_fold(self.transaction.amount, |acc, fee| acc.checked_add(fee.amount))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDeclarationMessage {
    pub balance_lock: Hash,
    pub node: Node,
}

/// Hands block-signing authority over `[begin, end]` to `primary_validator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryValidatorScheduleMessage {
    pub balance_lock: Hash,
    pub primary_validator: AccountNumber,
    pub begin_block_number: u64,
    pub end_block_number: u64,
}

/// The instruction carried by a signed change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignedChangeRequestMessage {
    CoinTransfer(CoinTransferMessage),
    NodeDeclaration(NodeDeclarationMessage),
    PrimaryValidatorSchedule(PrimaryValidatorScheduleMessage),
}

impl SignedChangeRequestMessage {
    pub fn balance_lock(&self) -> &Hash {
        match self {
            SignedChangeRequestMessage::CoinTransfer(m) => &m.balance_lock,
            SignedChangeRequestMessage::NodeDeclaration(m) => &m.balance_lock,
            SignedChangeRequestMessage::PrimaryValidatorSchedule(m) => &m.balance_lock,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignedChangeRequestMessage::CoinTransfer(_) => "coin_transfer",
            SignedChangeRequestMessage::NodeDeclaration(_) => "node_declaration",
            SignedChangeRequestMessage::PrimaryValidatorSchedule(_) => "primary_validator_schedule",
        }
    }

    /// Bytes covered by the request signature.
    pub fn signable_message(&self) -> Result<Vec<u8>, LedgerError> {
        Ok(bincode::serialize(self)?)
    }

    /// The signer's balance lock after this message is applied.
    pub fn hash(&self) -> Result<Hash, LedgerError> {
        hash_normalized(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedChangeRequest {
    pub signer: AccountNumber,
    pub signature: Signature,
    pub message: SignedChangeRequestMessage,
}

impl SignedChangeRequest {
    pub fn create(
        message: SignedChangeRequestMessage,
        keypair: &KeyPair,
    ) -> Result<Self, LedgerError> {
        let signature = keypair.sign(&message.signable_message()?)?;
        Ok(SignedChangeRequest {
            signer: keypair.account_number(),
            signature,
            message,
        })
    }

    pub fn hash(&self) -> Result<Hash, LedgerError> {
        self.message.hash()
    }

    pub fn as_coin_transfer(&self) -> Option<&CoinTransferMessage> {
        match &self.message {
            SignedChangeRequestMessage::CoinTransfer(m) => Some(m),
            _ => None,
        }
    }
}
