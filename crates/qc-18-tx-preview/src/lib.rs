//! # QC-18 Transaction Preview - Speculative Execution Subsystem
//!
//! **Subsystem ID:** 18
//!
//! ## Purpose
//!
//! Previews the effect of pending transactions against the current chain
//! state before they are mined. Every preview runs on a disposable snapshot
//! that is reverted unconditionally, so canonical state never changes.
//!
//! ## Pipeline
//!
//! ```text
//! submit -> validation -> pool (Queued | Executing) -> event loop
//!        -> speculative executor -> execution primitive (on a snapshot)
//!        -> preview sink
//! ```
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | A hash is in at most one bucket | `domain/pool.rs` - `PreviewPool::admit()` |
//! | Executed history never exceeds capacity | `domain/history.rs` - `ExecutedHistory::record()` |
//! | Every snapshot is reverted exactly once | `executor.rs` - `SnapshotGuard` |
//! | Previews run one at a time | `scheduler.rs` - `EventLoop::run()` |
//! | Stale queued transactions are never promoted | `domain/pool.rs` - `PreviewPool::promote()` |
//!
//! ## Outbound Dependencies
//!
//! | Collaborator | Trait | Purpose |
//! |--------------|-------|---------|
//! | State facade | `ChainState`, `StateView` | Head, nonces, balances, snapshots |
//! | Execution | `ExecutionPrimitive` | Apply one transaction |
//! | Signatures | `SenderRecovery` | Recover the sender |
//! | Delivery | `PreviewSink` | Publish preview outcomes |
//!
//! ## Ordering
//!
//! Transactions of one batch are previewed in batch order. Transactions
//! promoted by a head are previewed in admission order; there is no other
//! ordering across senders.
//!
//! ## Usage Example
//!
//! ```ignore
//! use qc_18_tx_preview::prelude::*;
//!
//! let service = PreviewService::spawn(ctx, PreviewConfig::from_env())?;
//! service.start().await?;
//!
//! let results = service.submit(vec![tx]).await?;
//! service.notify_head(new_head).await?;
//!
//! service.close().await?;
//! ```

// Crate-level lints
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_possible_truncation)]

// =============================================================================
// MODULES
// =============================================================================

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod ports;
pub mod scheduler;
pub mod service;

// =============================================================================
// PRELUDE
// =============================================================================

/// Convenient re-exports for common usage.
pub mod prelude {
    // Domain entities
    pub use crate::domain::entities::{
        AdmissionOutcome, CallTrace, CallType, ChainConfig, PoolSummary, PreviewOutcome,
        PreviewStats, Receipt, TxStatus,
    };
    pub use crate::domain::entities::{
        Address, BlockHeader, EcdsaSignature, Hash, Log, SignedTransaction, U256,
    };

    // Errors
    pub use crate::domain::errors::{AdmissionError, ExecutionError, StateError};
    pub use crate::error::{PreviewError, Result};

    // Ports
    pub use crate::ports::inbound::{AdmissionResult, TxPreviewApi};
    pub use crate::ports::outbound::{
        ChainState, ExecutionPrimitive, PreviewSink, SenderRecovery, StateView, SystemTimeSource,
        TimeSource,
    };

    // Adapters
    pub use crate::adapters::{
        BroadcastSink, EcdsaSenderRecovery, InMemoryChain, TracingSink, TransferPrimitive,
    };

    // Service
    pub use crate::config::PreviewConfig;
    pub use crate::service::{PreviewContext, PreviewService};
}

// =============================================================================
// CRATE INFO
// =============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Subsystem ID.
pub const SUBSYSTEM_ID: u8 = 18;

/// Subsystem name.
pub const SUBSYSTEM_NAME: &str = "Transaction Preview";
