/// Stateless validation for signed change requests.
/// Checks that need chain state live in `blockchain::core::validation`.
use crate::crypto::{is_valid_account_number, verify_signature};
use crate::error::LedgerError;
use crate::request::types::{
    CoinTransferMessage, NodeDeclarationMessage, PrimaryValidatorScheduleMessage,
    SignedChangeRequest, SignedChangeRequestMessage,
};
use std::collections::HashSet;

impl SignedChangeRequest {
    /// Verifies the signature over the serialized message.
    pub fn validate_signature(&self) -> Result<(), LedgerError> {
        let message = self.message.signable_message()?;
        verify_signature(&self.signer, &message, &self.signature)
            .map_err(|e| LedgerError::validation(format!("Invalid request signature: {}", e)))
    }

    /// Signature plus every check that does not depend on chain state.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if !is_valid_account_number(&self.signer) {
            return Err(LedgerError::validation(format!(
                "Malformed signer account number: {}",
                self.signer
            )));
        }
        self.validate_signature()?;

        match &self.message {
            SignedChangeRequestMessage::CoinTransfer(m) => m.validate(&self.signer),
            SignedChangeRequestMessage::NodeDeclaration(m) => m.validate(&self.signer),
            SignedChangeRequestMessage::PrimaryValidatorSchedule(m) => m.validate(),
        }
    }
}

impl CoinTransferMessage {
    fn validate(&self, signer: &str) -> Result<(), LedgerError> {
        let tx = &self.transaction;
        if !is_valid_account_number(&tx.recipient) {
            return Err(LedgerError::validation(format!(
                "Malformed recipient account number: {}",
                tx.recipient
            )));
        }
        if tx.recipient == signer {
            return Err(LedgerError::validation(
                "Sender and recipient cannot be the same",
            ));
        }
        if tx.amount == 0 {
            return Err(LedgerError::validation("Transfer amount must be positive"));
        }
        if let Some(ref memo) = tx.memo {
            if memo.chars().count() > Self::MAX_MEMO_LENGTH {
                return Err(LedgerError::validation(format!(
                    "Memo exceeds maximum length of {} characters",
                    Self::MAX_MEMO_LENGTH
                )));
            }
        }

        let mut seen_nodes = HashSet::new();
        for fee in &self.fees {
            if fee.amount == 0 {
                return Err(LedgerError::validation(format!(
                    "Fee for node {} must be positive",
                    fee.node
                )));
            }
            if fee.recipient == signer || fee.node == signer {
                return Err(LedgerError::validation("Sender cannot pay a fee to itself"));
            }
            if !seen_nodes.insert(fee.node.as_str()) {
                return Err(LedgerError::validation(format!(
                    "Duplicate fee for node {}",
                    fee.node
                )));
            }
        }

        if self.total_amount().is_none() {
            return Err(LedgerError::validation("Total transfer amount overflows"));
        }
        Ok(())
    }
}

impl NodeDeclarationMessage {
    fn validate(&self, signer: &str) -> Result<(), LedgerError> {
        if self.node.identifier != signer {
            return Err(LedgerError::validation(format!(
                "Node identifier {} does not match signer {}",
                self.node.identifier, signer
            )));
        }
        if let Some(ref fee_account) = self.node.fee_account {
            if !is_valid_account_number(fee_account) {
                return Err(LedgerError::validation(format!(
                    "Malformed fee account: {}",
                    fee_account
                )));
            }
        }
        if self.node.network_addresses.iter().any(|a| a.trim().is_empty()) {
            return Err(LedgerError::validation("Empty network address"));
        }
        Ok(())
    }
}

impl PrimaryValidatorScheduleMessage {
    fn validate(&self) -> Result<(), LedgerError> {
        if !is_valid_account_number(&self.primary_validator) {
            return Err(LedgerError::validation(format!(
                "Malformed primary validator account number: {}",
                self.primary_validator
            )));
        }
        if self.begin_block_number > self.end_block_number {
            return Err(LedgerError::validation(format!(
                "Schedule begins at {} after it ends at {}",
                self.begin_block_number, self.end_block_number
            )));
        }
        Ok(())
    }
}
