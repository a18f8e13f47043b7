//! # Adapters Layer (Outer Hexagon)
//!
//! Concrete implementations of the outbound ports.
//!
//! - `ecdsa`: secp256k1 `SenderRecovery`
//! - `memory`: journaled in-memory `ChainState` / `StateView`
//! - `transfer`: value-transfer `ExecutionPrimitive`
//! - `sink`: `TracingSink` and `BroadcastSink`

pub mod ecdsa;
pub mod memory;
pub mod sink;
pub mod transfer;

pub use ecdsa::{address_of, sign_transaction, EcdsaSenderRecovery};
pub use memory::{Account, InMemoryChain, InMemoryStateView};
pub use sink::{BroadcastSink, TracingSink};
pub use transfer::{contract_address, transfer_topic, TransferPrimitive};
