//! Value-transfer execution primitive.
//!
//! A minimal interpreter sufficient for previews in tests and light nodes:
//!
//! - message calls move value; calls into code emit a `Transfer` log
//! - code starting with `0xFD` reverts with the remaining bytes as reason
//! - creations install the init code at a nonce-derived address
//!
//! Gas: intrinsic gas plus the LOG cost of emitted events. Fees go to the
//! coinbase, unused gas is refunded to the sender and the block gas pool.

use crate::domain::{
    intrinsic_gas, keccak256, Address, CallTrace, CallType, ExecutionError, GasPool, Hash, Log,
    Receipt, SignedTransaction, U256,
};
use crate::ports::{ApplyContext, ExecutionPrimitive, StateView};

/// Leading code byte that makes every call revert.
pub const REVERT_OPCODE: u8 = 0xFD;

/// Static cost of one LOG operation.
const LOG_GAS: u64 = 375;
/// Cost per LOG topic.
const LOG_TOPIC_GAS: u64 = 375;
/// Cost per byte of LOG data.
const LOG_DATA_GAS: u64 = 8;

/// Event signature topic of `Transfer(address,address,uint256)`.
pub fn transfer_topic() -> Hash {
    keccak256(b"Transfer(address,address,uint256)")
}

/// Address of the contract `sender` deploys with `nonce`.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut preimage = Vec::with_capacity(28);
    preimage.extend_from_slice(sender);
    preimage.extend_from_slice(&nonce.to_be_bytes());
    let hash = keccak256(&preimage);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

fn address_topic(address: &Address) -> Hash {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(address);
    topic
}

fn log_gas(log: &Log) -> u64 {
    LOG_GAS + LOG_TOPIC_GAS * log.topics.len() as u64 + LOG_DATA_GAS * log.data.len() as u64
}

/// Result of the call frame after fees are settled.
struct Frame {
    success: bool,
    logs: Vec<Log>,
    return_data: Vec<u8>,
    contract_address: Option<Address>,
    extra_gas: u64,
    callee: Address,
}

/// Execution primitive that understands value transfers only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferPrimitive;

impl TransferPrimitive {
    fn run_frame(
        state: &mut dyn StateView,
        tx: &SignedTransaction,
        sender: Address,
        deploy_nonce: u64,
    ) -> Result<Frame, ExecutionError> {
        let (callee, code) = match tx.to {
            Some(to) => (to, state.get_code(&to)?),
            None => (contract_address(&sender, deploy_nonce), Vec::new()),
        };

        if code.first() == Some(&REVERT_OPCODE) {
            return Ok(Frame {
                success: false,
                logs: Vec::new(),
                return_data: code[1..].to_vec(),
                contract_address: None,
                extra_gas: 0,
                callee,
            });
        }

        let sender_balance = state.get_balance(&sender)?;
        if sender_balance < tx.value {
            return Err(ExecutionError::InsufficientBalance {
                required: tx.value,
                available: sender_balance,
            });
        }
        state.set_balance(&sender, sender_balance - tx.value)?;
        let callee_balance = state.get_balance(&callee)?;
        state.set_balance(&callee, callee_balance.saturating_add(tx.value))?;

        let mut frame = Frame {
            success: true,
            logs: Vec::new(),
            return_data: Vec::new(),
            contract_address: None,
            extra_gas: 0,
            callee,
        };

        if tx.is_contract_creation() {
            state.set_code(&callee, tx.data.clone())?;
            state.set_nonce(&callee, 1)?;
            frame.contract_address = Some(callee);
        } else if !code.is_empty() {
            let mut data = [0u8; 32];
            tx.value.to_big_endian(&mut data);
            let log = Log {
                address: callee,
                topics: vec![transfer_topic(), address_topic(&sender), address_topic(&callee)],
                data: data.to_vec(),
            };
            frame.extra_gas += log_gas(&log);
            frame.logs.push(log);
        }

        Ok(frame)
    }
}

impl ExecutionPrimitive for TransferPrimitive {
    fn apply(
        &self,
        ctx: &ApplyContext<'_>,
        state: &mut dyn StateView,
        tx: &SignedTransaction,
        sender: Address,
        gas_pool: &mut GasPool,
        gas_used: &mut u64,
    ) -> Result<Receipt, ExecutionError> {
        let nonce = state.get_nonce(&sender)?;
        if nonce != tx.nonce {
            return Err(ExecutionError::NonceMismatch {
                expected: nonce,
                actual: tx.nonce,
            });
        }

        let intrinsic = intrinsic_gas(
            &tx.data,
            tx.is_contract_creation(),
            ctx.chain_config.is_istanbul(ctx.header.number),
        )
        .map_err(|err| ExecutionError::Internal(err.to_string()))?;
        if tx.gas_limit < intrinsic {
            return Err(ExecutionError::OutOfGas);
        }

        let balance = state.get_balance(&sender)?;
        let cost = tx.cost().ok_or(ExecutionError::InsufficientBalance {
            required: U256::MAX,
            available: balance,
        })?;
        if balance < cost {
            return Err(ExecutionError::InsufficientBalance {
                required: cost,
                available: balance,
            });
        }

        let next_nonce = nonce
            .checked_add(1)
            .ok_or_else(|| ExecutionError::Internal("sender nonce overflow".into()))?;

        gas_pool.sub_gas(tx.gas_limit)?;

        // Buy gas up front and bump the nonce; both survive a reverted frame.
        let prepaid = tx.gas_price * U256::from(tx.gas_limit);
        state.set_balance(&sender, balance - prepaid)?;
        state.set_nonce(&sender, next_nonce)?;

        let checkpoint = state.snapshot();
        let mut frame = Self::run_frame(state, tx, sender, nonce)?;
        let mut used = intrinsic.saturating_add(frame.extra_gas);
        if used > tx.gas_limit {
            frame = Frame {
                success: false,
                logs: Vec::new(),
                return_data: Vec::new(),
                contract_address: None,
                extra_gas: 0,
                callee: frame.callee,
            };
            used = tx.gas_limit;
        }
        if !frame.success {
            state.revert_to_snapshot(checkpoint)?;
        }

        let refund = tx.gas_limit - used;
        let sender_balance = state.get_balance(&sender)?;
        state.set_balance(&sender, sender_balance + tx.gas_price * U256::from(refund))?;
        let coinbase = ctx.coinbase.unwrap_or(ctx.header.coinbase);
        let coinbase_balance = state.get_balance(&coinbase)?;
        state.set_balance(
            &coinbase,
            coinbase_balance.saturating_add(tx.gas_price * U256::from(used)),
        )?;
        gas_pool.add_gas(refund);
        *gas_used = gas_used.saturating_add(used);

        let call_trace = ctx.vm.record_call_trace.then(|| CallTrace {
            call_type: if tx.is_contract_creation() {
                CallType::Create
            } else {
                CallType::Call
            },
            from: sender,
            to: frame.callee,
            input: tx.data.clone(),
            output: frame.return_data.clone(),
            value: tx.value,
            trace_index: 1,
        });

        Ok(Receipt {
            success: frame.success,
            gas_used: used,
            cumulative_gas_used: *gas_used,
            logs: frame.logs,
            contract_address: frame.contract_address,
            return_data: frame.return_data,
            call_trace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{Account, InMemoryChain};
    use crate::domain::{ChainConfig, EcdsaSignature, ExecutionHeader, VmConfig};
    use crate::ports::ChainState;

    const ALICE: Address = [0xA1; 20];
    const TOKEN: Address = [0x70; 20];
    const BROKEN: Address = [0xDE; 20];
    const MINER: Address = [0xC0; 20];

    fn chain() -> InMemoryChain {
        InMemoryChain::new(30_000_000)
            .with_account(ALICE, Account::new(0, 1_000_000u64))
            .with_account(TOKEN, Account::contract(vec![0x60, 0x00]))
            .with_account(BROKEN, Account::contract(b"\xFDnope".to_vec()))
    }

    fn tx(to: Option<Address>, value: u64) -> SignedTransaction {
        SignedTransaction {
            to,
            value: U256::from(value),
            nonce: 0,
            gas_price: U256::one(),
            gas_limit: 50_000,
            data: vec![],
            signature: EcdsaSignature::default(),
        }
    }

    fn run(
        chain: &InMemoryChain,
        tx: &SignedTransaction,
    ) -> (Result<Receipt, ExecutionError>, Box<dyn StateView>) {
        let head = chain.current_head().unwrap();
        let mut state = chain.state_at(&head.state_root).unwrap();
        let config = ChainConfig::default();
        let header = ExecutionHeader::child_of(&head, 10_000_000, 0, MINER);
        let ctx = ApplyContext {
            chain_config: &config,
            chain,
            header: &header,
            coinbase: None,
            vm: VmConfig {
                record_call_trace: true,
            },
        };
        let mut pool = GasPool::new(header.gas_limit);
        let mut used = 0;
        let result = TransferPrimitive.apply(&ctx, state.as_mut(), tx, ALICE, &mut pool, &mut used);
        (result, state)
    }

    fn balance(state: &dyn StateView, address: &Address) -> U256 {
        state.get_balance(address).unwrap()
    }

    #[test]
    fn test_plain_transfer_moves_value_and_fees() {
        let chain = chain();
        let (receipt, state) = run(&chain, &tx(Some([0xB0; 20]), 10));
        let receipt = receipt.unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.gas_used, 21_000);
        assert!(receipt.logs.is_empty());
        assert_eq!(balance(state.as_ref(), &[0xB0; 20]), U256::from(10u64));
        assert_eq!(balance(state.as_ref(), &MINER), U256::from(21_000u64));
        assert_eq!(
            balance(state.as_ref(), &ALICE),
            U256::from(1_000_000u64 - 21_010)
        );
        assert_eq!(state.get_nonce(&ALICE).unwrap(), 1);
        assert_eq!(chain.account(&ALICE), Account::new(0, 1_000_000u64));
    }

    #[test]
    fn test_call_into_contract_emits_transfer_log() {
        let chain = chain();
        let receipt = run(&chain, &tx(Some(TOKEN), 7)).0.unwrap();

        assert!(receipt.success);
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(receipt.logs[0].address, TOKEN);
        assert_eq!(receipt.logs[0].topics[0], transfer_topic());
        assert_eq!(receipt.gas_used, 21_000 + 375 + 3 * 375 + 8 * 32);

        let trace = receipt.call_trace.unwrap();
        assert_eq!(trace.call_type, CallType::Call);
        assert_eq!(trace.to, TOKEN);
        assert_eq!(trace.trace_index, 1);
    }

    #[test]
    fn test_reverting_contract_keeps_fee_drops_value() {
        let chain = chain();
        let (receipt, state) = run(&chain, &tx(Some(BROKEN), 500));
        let receipt = receipt.unwrap();

        assert!(!receipt.success);
        assert_eq!(receipt.return_data, b"nope".to_vec());
        assert_eq!(balance(state.as_ref(), &BROKEN), U256::zero());
        assert_eq!(
            balance(state.as_ref(), &ALICE),
            U256::from(1_000_000u64 - 21_000)
        );
    }

    #[test]
    fn test_creation_deploys_code() {
        let chain = chain();
        let mut create = tx(None, 0);
        create.data = vec![0x60, 0x80];
        create.gas_limit = 60_000;

        let (receipt, state) = run(&chain, &create);
        let receipt = receipt.unwrap();
        let deployed = contract_address(&ALICE, 0);

        assert_eq!(receipt.contract_address, Some(deployed));
        assert_eq!(state.get_code(&deployed).unwrap(), vec![0x60, 0x80]);
        assert_eq!(receipt.call_trace.unwrap().call_type, CallType::Create);
    }

    #[test]
    fn test_nonce_mismatch() {
        let chain = chain();
        let mut ahead = tx(Some([0xB0; 20]), 1);
        ahead.nonce = 3;
        assert!(matches!(
            run(&chain, &ahead).0,
            Err(ExecutionError::NonceMismatch {
                expected: 0,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_max_nonce_is_reported_not_wrapped() {
        let chain = chain().with_account(ALICE, Account::new(u64::MAX, 1_000_000u64));
        let mut last = tx(Some([0xB0; 20]), 1);
        last.nonce = u64::MAX;

        let (result, state) = run(&chain, &last);
        assert!(matches!(result, Err(ExecutionError::Internal(_))));
        assert_eq!(state.get_nonce(&ALICE).unwrap(), u64::MAX);
        assert_eq!(balance(state.as_ref(), &ALICE), U256::from(1_000_000u64));
    }

    #[test]
    fn test_log_cost_beyond_gas_limit_fails_frame() {
        let chain = chain();
        let mut tight = tx(Some(TOKEN), 7);
        tight.gas_limit = 21_500;

        let (receipt, state) = run(&chain, &tight);
        let receipt = receipt.unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.gas_used, 21_500);
        assert!(receipt.logs.is_empty());
        assert_eq!(balance(state.as_ref(), &TOKEN), U256::zero());
    }
}
