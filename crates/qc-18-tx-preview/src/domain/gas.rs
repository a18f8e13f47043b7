//! Intrinsic gas: the floor cost a transaction pays before any execution.

use super::errors::AdmissionError;

/// Base cost of a message call.
pub const TX_GAS: u64 = 21_000;

/// Base cost of a contract-creation transaction.
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;

/// Cost per zero byte of call data.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Cost per non-zero byte of call data before Istanbul.
pub const TX_DATA_NON_ZERO_GAS_FRONTIER: u64 = 68;

/// Cost per non-zero byte of call data from Istanbul (EIP-2028).
pub const TX_DATA_NON_ZERO_GAS_ISTANBUL: u64 = 16;

/// Computes the intrinsic gas of a transaction.
///
/// Base cost depends on whether the transaction creates a contract; call data
/// is charged per byte with non-zero bytes priced by protocol version.
pub fn intrinsic_gas(
    data: &[u8],
    is_contract_creation: bool,
    is_istanbul: bool,
) -> Result<u64, AdmissionError> {
    let base = if is_contract_creation {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };

    if data.is_empty() {
        return Ok(base);
    }

    let non_zero = data.iter().filter(|&&byte| byte != 0).count() as u64;
    let zero = data.len() as u64 - non_zero;
    let non_zero_price = if is_istanbul {
        TX_DATA_NON_ZERO_GAS_ISTANBUL
    } else {
        TX_DATA_NON_ZERO_GAS_FRONTIER
    };

    non_zero
        .checked_mul(non_zero_price)
        .and_then(|gas| gas.checked_add(base))
        .and_then(|gas| zero.checked_mul(TX_DATA_ZERO_GAS).and_then(|z| gas.checked_add(z)))
        .ok_or(AdmissionError::IntrinsicGasOverflow)
}
