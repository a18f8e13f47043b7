//! Validation stage: admission checks run against a fresh state view.
//!
//! Checks short-circuit on the first failure, in this order:
//! size, value sign, block gas ceiling, sender recovery, nonce, balance,
//! intrinsic gas. Nothing here mutates state.

use super::entities::{BlockHeader, ChainConfig, SignedTransaction, ValidatedTransaction, U256};
use super::errors::{AdmissionError, ValidationError};
use super::gas::intrinsic_gas;
use crate::ports::outbound::{SenderRecovery, StateView};

/// Static bounds applied by the validation stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationRules {
    /// Maximum encoded transaction size in bytes.
    pub max_tx_size: u64,
    /// Chain parameters (signature domain, pricing forks).
    pub chain: ChainConfig,
}

/// Returns true when `value` would read as negative in two's complement.
fn has_sign_bit(value: &U256) -> bool {
    value.bit(255)
}

/// Runs every admission check against `state` as of `head`.
pub fn validate_transaction(
    tx: &SignedTransaction,
    state: &dyn StateView,
    head: &BlockHeader,
    rules: &ValidationRules,
    recovery: &dyn SenderRecovery,
) -> Result<ValidatedTransaction, ValidationError> {
    let size = tx.encoded_size();
    if size > rules.max_tx_size {
        return Err(AdmissionError::OversizedData {
            size,
            max: rules.max_tx_size,
        }
        .into());
    }

    if has_sign_bit(&tx.value) {
        return Err(AdmissionError::NegativeValue.into());
    }

    if tx.gas_limit > head.gas_limit {
        return Err(AdmissionError::GasLimitExceeded {
            gas_limit: tx.gas_limit,
            block_gas_limit: head.gas_limit,
        }
        .into());
    }

    let sender = recovery
        .recover_sender(tx)
        .map_err(|_| AdmissionError::InvalidSender)?;

    let account_nonce = state.get_nonce(&sender)?;
    if account_nonce > tx.nonce {
        return Err(AdmissionError::NonceTooLow {
            account_nonce,
            tx_nonce: tx.nonce,
        }
        .into());
    }

    let balance = state.get_balance(&sender)?;
    match tx.cost() {
        Some(cost) if balance >= cost => {}
        cost => {
            return Err(AdmissionError::InsufficientFunds {
                balance,
                cost: cost.unwrap_or(U256::MAX),
            }
            .into())
        }
    }

    // Pricing follows the block the transaction would land in.
    let is_istanbul = rules.chain.is_istanbul(head.height.saturating_add(1));
    let intrinsic = intrinsic_gas(&tx.data, tx.is_contract_creation(), is_istanbul)?;
    if tx.gas_limit < intrinsic {
        return Err(AdmissionError::IntrinsicGasTooLow {
            gas_limit: tx.gas_limit,
            intrinsic,
        }
        .into());
    }

    Ok(ValidatedTransaction {
        hash: tx.hash(),
        transaction: tx.clone(),
        sender,
    })
}
