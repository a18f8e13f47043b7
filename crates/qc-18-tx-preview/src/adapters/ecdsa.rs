//! secp256k1 sender recovery.
//!
//! Signatures cover [`SignedTransaction::signing_hash`] for the configured
//! chain id. The sender is the last 20 bytes of the Keccak-256 hash of the
//! recovered uncompressed public key.

use crate::domain::{keccak256, Address, EcdsaSignature, SignatureError, SignedTransaction};
use crate::ports::SenderRecovery;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// Recovers senders of transactions signed for one chain.
#[derive(Debug, Clone, Copy)]
pub struct EcdsaSenderRecovery {
    chain_id: u64,
}

impl EcdsaSenderRecovery {
    /// Creates a recoverer bound to `chain_id`.
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }
}

impl SenderRecovery for EcdsaSenderRecovery {
    fn recover_sender(&self, tx: &SignedTransaction) -> Result<Address, SignatureError> {
        let prehash = tx.signing_hash(self.chain_id);
        recover_address(&prehash, &tx.signature)
    }
}

/// Valid v values: 0, 1, 27, 28
fn parse_recovery_id(v: u8) -> Result<RecoveryId, SignatureError> {
    let id = match v {
        0 | 27 => 0,
        1 | 28 => 1,
        _ => return Err(SignatureError::InvalidRecoveryId(v)),
    };

    RecoveryId::try_from(id).map_err(|_| SignatureError::InvalidRecoveryId(v))
}

fn recover_address(prehash: &[u8; 32], signature: &EcdsaSignature) -> Result<Address, SignatureError> {
    let recovery_id = parse_recovery_id(signature.v)?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(&signature.r);
    sig_bytes[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&sig_bytes).map_err(|_| SignatureError::InvalidFormat)?;

    let key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(address_from_key(&key))
}

fn address_from_key(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed prefix
    let hash = keccak256(&encoded.as_bytes()[1..]);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// Address controlled by `key`.
pub fn address_of(key: &SigningKey) -> Address {
    address_from_key(key.verifying_key())
}

/// Signs `tx` in place for `chain_id`.
pub fn sign_transaction(
    tx: &mut SignedTransaction,
    key: &SigningKey,
    chain_id: u64,
) -> Result<(), SignatureError> {
    let prehash = tx.signing_hash(chain_id);
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|_| SignatureError::InvalidFormat)?;

    let bytes = sig.to_bytes();
    tx.signature.r.copy_from_slice(&bytes[..32]);
    tx.signature.s.copy_from_slice(&bytes[32..]);
    tx.signature.v = recovery_id.to_byte();
    Ok(())
}
