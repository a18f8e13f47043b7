//! # Core Domain Entities
//!
//! Defines the chain entities the transaction preview subsystem reads and
//! produces.
//!
//! ## Clusters
//!
//! - **Chain**: `BlockHeader`, `SignedTransaction`, `EcdsaSignature`
//! - **Execution Output**: `Log`

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

// Re-export U256 from primitive-types for use across all subsystems
pub use primitive_types::U256;

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// A 32-byte hash (Keccak-256).
pub type Hash = [u8; 32];

/// A 20-byte Ethereum-style address.
pub type Address = [u8; 20];

/// Computes the Keccak-256 digest of `data`.
#[must_use]
pub fn keccak256(data: &[u8]) -> Hash {
    Keccak256::digest(data).into()
}

/// Renders the first four bytes of a hash or address for log output.
#[must_use]
pub fn short_hex(bytes: &[u8]) -> String {
    let end = bytes.len().min(4);
    format!("0x{}..", hex::encode(&bytes[..end]))
}

fn u256_be(value: &U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

/// The header of a block as seen by the transaction preview subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Block height in the chain.
    pub height: u64,
    /// Hash of the parent block (creates the chain linkage).
    pub parent_hash: Hash,
    /// Root hash of the state trie after applying this block.
    pub state_root: Hash,
    /// Unix timestamp (seconds) when the block was proposed.
    pub timestamp: u64,
    /// Gas ceiling of this block.
    pub gas_limit: u64,
    /// Beneficiary of the block fees.
    pub coinbase: Address,
}

impl BlockHeader {
    /// Computes the block hash over every header field.
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.parent_hash);
        hasher.update(self.state_root);
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.gas_limit.to_be_bytes());
        hasher.update(self.coinbase);
        hasher.finalize().into()
    }
}

/// Recoverable secp256k1 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EcdsaSignature {
    /// R component.
    pub r: [u8; 32],
    /// S component.
    pub s: [u8; 32],
    /// Recovery ID (0, 1, 27, or 28).
    pub v: u8,
}

/// A signed transaction as submitted by clients.
///
/// The sender is not carried on the wire; it is recovered from `signature`
/// over [`SignedTransaction::signing_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Recipient address (`None` for contract creation).
    pub to: Option<Address>,
    /// Transaction value in base units.
    pub value: U256,
    /// Sender's nonce.
    pub nonce: u64,
    /// Gas price in base units.
    pub gas_price: U256,
    /// Gas limit for this transaction.
    pub gas_limit: u64,
    /// Call data or init code.
    pub data: Vec<u8>,
    /// Signature over the signing hash.
    pub signature: EcdsaSignature,
}

impl SignedTransaction {
    /// Hash the sender signs: every unsigned field plus the chain id.
    #[must_use]
    pub fn signing_hash(&self, chain_id: u64) -> Hash {
        let mut hasher = Keccak256::new();
        self.absorb_unsigned(&mut hasher);
        hasher.update(chain_id.to_be_bytes());
        hasher.finalize().into()
    }

    /// Transaction identity: hash of the full signed content.
    #[must_use]
    pub fn hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        self.absorb_unsigned(&mut hasher);
        hasher.update(self.signature.r);
        hasher.update(self.signature.s);
        hasher.update([self.signature.v]);
        hasher.finalize().into()
    }

    fn absorb_unsigned(&self, hasher: &mut Keccak256) {
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(u256_be(&self.gas_price));
        hasher.update(self.gas_limit.to_be_bytes());
        match &self.to {
            Some(to) => {
                hasher.update([1u8]);
                hasher.update(to);
            }
            None => hasher.update([0u8]),
        }
        hasher.update(u256_be(&self.value));
        hasher.update((self.data.len() as u64).to_be_bytes());
        hasher.update(&self.data);
    }

    /// Returns true if this transaction deploys a contract.
    #[must_use]
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// Returns the maximum the sender can be charged: `value + gas_price * gas_limit`.
    ///
    /// `None` when the product or sum does not fit in 256 bits.
    #[must_use]
    pub fn cost(&self) -> Option<U256> {
        self.gas_price
            .checked_mul(U256::from(self.gas_limit))
            .and_then(|gas| gas.checked_add(self.value))
    }

    /// Encoded size in bytes (bincode wire format).
    #[must_use]
    pub fn encoded_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(u64::MAX)
    }
}

// =============================================================================
// CLUSTER B: EXECUTION OUTPUT
// =============================================================================

/// An event log emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Contract that emitted the log.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<Hash>,
    /// Unindexed payload.
    pub data: Vec<u8>,
}
