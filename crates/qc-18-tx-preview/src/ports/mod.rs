//! # Ports Layer (Middle Hexagon)
//!
//! Trait definitions for the transaction preview subsystem.
//!
//! - **Driving Ports (Inbound)**: `TxPreviewApi`
//! - **Driven Ports (Outbound)**: `ChainState`, `StateView`,
//!   `ExecutionPrimitive`, `SenderRecovery`, `PreviewSink`, `TimeSource`

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
