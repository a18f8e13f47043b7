//! # Shared Types Crate
//!
//! Chain entities consumed by every subsystem that reads blocks or handles
//! transactions.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: Headers, transactions and logs are defined
//!   here once and re-exported by subsystem crates.
//! - **Content Identity**: A transaction is identified by the Keccak-256 hash
//!   of its full signed content, signature included.
//! - **No Ambient Sender**: Transactions carry no `from` field; the sender is
//!   recovered from the signature by whoever needs it.

pub mod entities;

pub use entities::*;
