//! Error types for the transaction preview domain.
//!
//! Admission errors are terminal for one transaction and are reported back
//! to the submitter. Execution errors are captured inside a preview outcome.
//! State errors are system failures and abort the surrounding cycle.

use super::entities::{Address, Hash, U256};
use thiserror::Error;

// =============================================================================
// ADMISSION ERRORS
// =============================================================================

/// Why a submitted transaction was not admitted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Identity is already queued or executing.
    #[error("already known")]
    AlreadyKnown,

    /// Identity was previewed recently.
    #[error("already executed")]
    AlreadyExecuted,

    /// A receipt for this identity exists on chain.
    #[error("already mined")]
    AlreadyMined,

    /// Encoded transaction exceeds the DoS bound.
    #[error("oversized data: {size} > {max} bytes")]
    OversizedData {
        /// Encoded size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },

    /// Value carries the sign bit of a two's-complement encoding.
    #[error("negative value")]
    NegativeValue,

    /// Gas limit exceeds the current block ceiling.
    #[error("exceeds block gas limit: {gas_limit} > {block_gas_limit}")]
    GasLimitExceeded {
        /// Transaction gas limit.
        gas_limit: u64,
        /// Head block gas limit.
        block_gas_limit: u64,
    },

    /// Sender could not be recovered from the signature.
    #[error("invalid sender")]
    InvalidSender,

    /// Nonce is below the sender's on-chain nonce.
    #[error("nonce too low: account {account_nonce}, tx {tx_nonce}")]
    NonceTooLow {
        /// Sender nonce on chain.
        account_nonce: u64,
        /// Nonce carried by the transaction.
        tx_nonce: u64,
    },

    /// Balance does not cover `value + gas_price * gas_limit`.
    #[error("insufficient funds for gas * price + value: balance {balance}, cost {cost}")]
    InsufficientFunds {
        /// Sender balance.
        balance: U256,
        /// Maximum cost of the transaction.
        cost: U256,
    },

    /// Gas limit is below the intrinsic floor.
    #[error("intrinsic gas too low: have {gas_limit}, want {intrinsic}")]
    IntrinsicGasTooLow {
        /// Transaction gas limit.
        gas_limit: u64,
        /// Intrinsic gas floor.
        intrinsic: u64,
    },

    /// Intrinsic gas computation overflowed 64 bits.
    #[error("intrinsic gas overflows u64")]
    IntrinsicGasOverflow,

    /// Destination has no code and contract targets are required.
    #[error("target {0:?} is not a contract")]
    TargetNotContract(Address),
}

// =============================================================================
// STATE ERRORS
// =============================================================================

/// Failures reported by the state facade.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The backing store could not be read.
    #[error("state unavailable: {0}")]
    Unavailable(String),

    /// No state is known for the requested root.
    #[error("unknown state root {0:?}")]
    UnknownRoot(Hash),

    /// Snapshot token does not belong to this view or was already reverted.
    #[error("invalid snapshot {0}")]
    InvalidSnapshot(u64),

    /// Reverting a valid snapshot failed.
    #[error("revert to snapshot {id} failed: {reason}")]
    RevertFailed {
        /// Snapshot id.
        id: u64,
        /// Facade-specific cause.
        reason: String,
    },
}

// =============================================================================
// EXECUTION ERRORS
// =============================================================================

/// Errors the execution primitive reports for one transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The virtual block does not have enough gas left.
    #[error("gas pool exhausted: requested {requested}, available {available}")]
    GasPoolExhausted {
        /// Gas the transaction asked for.
        requested: u64,
        /// Gas left in the pool.
        available: u64,
    },

    /// Execution ran out of gas.
    #[error("out of gas")]
    OutOfGas,

    /// Sender cannot pay for the transaction at execution time.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount needed.
        required: U256,
        /// Balance held.
        available: U256,
    },

    /// Account nonce moved since admission.
    #[error("nonce mismatch: expected {expected}, got {actual}")]
    NonceMismatch {
        /// Account nonce.
        expected: u64,
        /// Transaction nonce.
        actual: u64,
    },

    /// Execution reverted.
    #[error("revert: {0}")]
    Reverted(String),

    /// State access failed inside the primitive.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Primitive-specific failure.
    #[error("internal error: {0}")]
    Internal(String),
}

// =============================================================================
// VALIDATION / POOL ERRORS
// =============================================================================

/// Outcome of a failed admission check: either a verdict on the transaction
/// or a state failure that prevented reaching one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The transaction is rejected.
    #[error(transparent)]
    Rejected(#[from] AdmissionError),

    /// State could not be read.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Illegal bucket transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// `finish` called for a hash that is not executing.
    #[error("transaction {0:?} is not executing")]
    NotExecuting(Hash),
}

/// Signature recovery failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// `v` is not 0, 1, 27 or 28.
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    /// `r`/`s` do not form a valid signature.
    #[error("malformed signature")]
    InvalidFormat,

    /// No public key recovers from this signature.
    #[error("public key recovery failed")]
    RecoveryFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_error_display() {
        let err = AdmissionError::NonceTooLow {
            account_nonce: 5,
            tx_nonce: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("nonce too low"));
        assert!(msg.contains('5'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_insufficient_funds_uses_u256() {
        let err = AdmissionError::InsufficientFunds {
            balance: U256::from(100u64),
            cost: U256::from(21_010u64),
        };
        assert!(err.to_string().contains("21010"));
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err: ValidationError = AdmissionError::AlreadyKnown.into();
        assert_eq!(err.to_string(), "already known");

        let err: ValidationError = StateError::Unavailable("disk".into()).into();
        assert!(err.to_string().contains("disk"));
    }

    #[test]
    fn test_state_error_converts_into_execution_error() {
        let err: ExecutionError = StateError::InvalidSnapshot(3).into();
        assert!(matches!(err, ExecutionError::State(StateError::InvalidSnapshot(3))));
    }
}
