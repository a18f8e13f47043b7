//! # Domain Layer - Transaction Preview Subsystem
//!
//! Pure business logic: pool buckets, executed history, validation stage.
//!
//! ## Components
//!
//! - `entities`: TxStatus, PoolEntry, ExecutionHeader, Receipt, PreviewOutcome
//! - `pool`: PreviewPool with queued / executing / executed buckets
//! - `history`: ExecutedHistory ring buffer
//! - `validation`: admission checks against a state view
//! - `gas`: intrinsic gas schedule
//! - `errors`: AdmissionError, StateError, ExecutionError
//!
//! ## Data Types
//!
//! - Address: `[u8; 20]` (20-byte account address)
//! - Hash: `[u8; 32]` (32-byte transaction/block hash)
//! - U256: values and prices (from shared-types)

pub mod entities;
pub mod errors;
pub mod gas;
pub mod history;
pub mod pool;
pub mod validation;

pub use entities::*;
pub use errors::*;
pub use gas::*;
pub use history::*;
pub use pool::*;
pub use validation::*;
