use crate::crypto::AccountNumber;
use crate::error::LedgerError;
use crate::request::{
    CoinTransferMessage, NodeDeclarationMessage, PrimaryValidatorScheduleMessage,
    SignedChangeRequest, SignedChangeRequestMessage,
};
use std::collections::BTreeMap;

use super::chain::{Block, BlockNumber, Blockchain};
use super::state::{AccountState, PrimaryValidatorSchedule};

type AccountUpdates = BTreeMap<AccountNumber, AccountState>;

impl Blockchain {
    /// Checks `block` against the current tip: sequencing, chaining, signer
    /// authorization, then the embedded request and its resulting states.
    pub fn validate_block(&self, block: &Block) -> Result<(), LedgerError> {
        let message = &block.message;

        let expected_number = self.next_block_number()?;
        if message.number != expected_number {
            return Err(LedgerError::validation(format!(
                "Block number mismatch: expected {}, got {}",
                expected_number, message.number
            )));
        }

        let expected_identifier = self.next_block_identifier()?;
        if message.identifier != expected_identifier {
            return Err(LedgerError::validation(format!(
                "Chain break at block {}: expected identifier {}, got {}",
                message.number, expected_identifier, message.identifier
            )));
        }

        let primary_validator = self.primary_validator_for_block(message.number)?;
        if primary_validator.as_deref() != Some(block.signer.as_str()) {
            return Err(LedgerError::validation(format!(
                "Unauthorized signer {} for block {} (primary validator: {:?})",
                block.signer, message.number, primary_validator
            )));
        }
        block.validate_signature().map_err(|e| {
            LedgerError::validation(format!("Unauthorized signer {}: {}", block.signer, e))
        })?;

        let expected_updates = self.compute_updated_account_states(&message.request, message.number)?;
        if expected_updates != message.updated_account_states {
            return Err(LedgerError::validation(format!(
                "Updated account states of block {} do not match its request",
                message.number
            )));
        }
        Ok(())
    }

    /// Validates `request` as the content of block `block_number` and returns
    /// the resulting states of every account it touches.
    pub fn compute_updated_account_states(
        &self,
        request: &SignedChangeRequest,
        block_number: BlockNumber,
    ) -> Result<AccountUpdates, LedgerError> {
        request.validate()?;

        let previous = block_number.checked_sub(1);
        let signer_state = self
            .get_account_state(&request.signer, previous)?
            .unwrap_or_default();

        let current_lock = signer_state.effective_balance_lock(&request.signer);
        if request.message.balance_lock() != &current_lock {
            return Err(LedgerError::validation(format!(
                "Stale or invalid lock for {}: expected {}, got {}",
                request.signer,
                current_lock,
                request.message.balance_lock()
            )));
        }

        let mut updates = AccountUpdates::new();
        let mut signer_update = signer_state;
        signer_update.balance_lock = Some(request.hash()?);
        updates.insert(request.signer.clone(), signer_update);

        match &request.message {
            SignedChangeRequestMessage::CoinTransfer(message) => {
                self.coin_transfer_updates(&request.signer, message, block_number, &mut updates)?
            }
            SignedChangeRequestMessage::NodeDeclaration(message) => {
                node_declaration_updates(&request.signer, message, &mut updates)
            }
            SignedChangeRequestMessage::PrimaryValidatorSchedule(message) => self
                .primary_validator_schedule_updates(
                    &request.signer,
                    message,
                    block_number,
                    &mut updates,
                )?,
        }
        Ok(updates)
    }

    fn coin_transfer_updates(
        &self,
        signer: &str,
        message: &CoinTransferMessage,
        block_number: BlockNumber,
        updates: &mut AccountUpdates,
    ) -> Result<(), LedgerError> {
        let previous = block_number.checked_sub(1);
        let primary_validator = self.primary_validator_for_block(block_number)?;

        let mut primary_validator_fee_paid = false;
        let mut preferred_node_fees = 0;
        for fee in &message.fees {
            let node = self
                .get_account_state(&fee.node, previous)?
                .and_then(|state| state.node)
                .ok_or_else(|| {
                    LedgerError::validation(format!(
                        "Fee payee {} has no node declaration",
                        fee.node
                    ))
                })?;
            if &fee.recipient != node.fee_payee() {
                return Err(LedgerError::validation(format!(
                    "Fee for node {} must go to {}, not {}",
                    fee.node,
                    node.fee_payee(),
                    fee.recipient
                )));
            }
            if fee.amount != node.fee_amount {
                return Err(LedgerError::validation(format!(
                    "Fee mismatch for node {}: declared {}, got {}",
                    fee.node, node.fee_amount, fee.amount
                )));
            }

            if primary_validator.as_deref() == Some(fee.node.as_str()) {
                primary_validator_fee_paid = true;
            } else {
                preferred_node_fees += 1;
            }
        }
        if preferred_node_fees > 1 {
            return Err(LedgerError::validation(
                "At most one preferred node fee is allowed",
            ));
        }

        if let Some(ref pv) = primary_validator {
            if pv != signer && !primary_validator_fee_paid {
                let pv_fee = self
                    .get_account_state(pv, previous)?
                    .and_then(|state| state.node)
                    .map_or(0, |node| node.fee_amount);
                if pv_fee > 0 {
                    return Err(LedgerError::validation(format!(
                        "Missing primary validator fee of {} for {}",
                        pv_fee, pv
                    )));
                }
            }
        }

        let total = message
            .total_amount()
            .ok_or_else(|| LedgerError::validation("Total transfer amount overflows"))?;
        let signer_update = updates
            .get_mut(signer)
            .ok_or_else(|| LedgerError::validation("Signer state missing from updates"))?;
        if signer_update.balance < total {
            return Err(LedgerError::validation(format!(
                "Insufficient balance for {}: balance {}, required {}",
                signer, signer_update.balance, total
            )));
        }
        signer_update.balance -= total;

        let credits = std::iter::once((&message.transaction.recipient, message.transaction.amount))
            .chain(message.fees.iter().map(|fee| (&fee.recipient, fee.amount)));
        for (recipient, amount) in credits {
            let state = match updates.get(recipient) {
                Some(state) => state.clone(),
                None => self
                    .get_account_state(recipient, previous)?
                    .unwrap_or_default(),
            };
            let balance = state.balance.checked_add(amount).ok_or_else(|| {
                LedgerError::validation(format!("Balance of {} overflows", recipient))
            })?;
            updates.insert(recipient.clone(), AccountState { balance, ..state });
        }
        Ok(())
    }

    fn primary_validator_schedule_updates(
        &self,
        signer: &str,
        message: &PrimaryValidatorScheduleMessage,
        block_number: BlockNumber,
        updates: &mut AccountUpdates,
    ) -> Result<(), LedgerError> {
        if self.primary_validator_for_block(block_number)?.as_deref() != Some(signer) {
            return Err(LedgerError::validation(format!(
                "Only the primary validator may change the schedule; {} is not primary validator for block {}",
                signer, block_number
            )));
        }
        if message.begin_block_number <= block_number {
            return Err(LedgerError::validation(format!(
                "Schedule must begin after block {}, got {}",
                block_number, message.begin_block_number
            )));
        }

        let schedule =
            PrimaryValidatorSchedule::new(message.begin_block_number, message.end_block_number);
        let index = self.schedule.read();
        let current = index.resolve(block_number);
        if let Some(existing) = index.overlapping(&schedule, current) {
            return Err(LedgerError::validation(format!(
                "Schedule {}..={} overlaps {} at {}..={}",
                schedule.begin_block_number,
                schedule.end_block_number,
                existing.primary_validator,
                existing.schedule.begin_block_number,
                existing.schedule.end_block_number
            )));
        }
        drop(index);

        let previous = block_number.checked_sub(1);
        let designated = match updates.get(&message.primary_validator) {
            Some(state) => state.clone(),
            None => self
                .get_account_state(&message.primary_validator, previous)?
                .unwrap_or_default(),
        };
        if designated.node.is_none() {
            return Err(LedgerError::validation(format!(
                "Designated primary validator {} has no node declaration",
                message.primary_validator
            )));
        }
        updates.insert(
            message.primary_validator.clone(),
            AccountState {
                primary_validator_schedule: Some(schedule),
                ..designated
            },
        );
        Ok(())
    }
}

fn node_declaration_updates(
    signer: &str,
    message: &NodeDeclarationMessage,
    updates: &mut AccountUpdates,
) {
    if let Some(state) = updates.get_mut(signer) {
        state.node = Some(message.node.clone());
    }
}
