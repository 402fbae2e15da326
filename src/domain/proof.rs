//! Proof values and shape validation.
//!
//! A [`Proof`] can only be obtained through [`validate_proof`], so every proof
//! handed to the ledger has already passed the shape checks.

use alloy::primitives::Bytes;
use thiserror::Error;

/// Canonical prefix of hex-encoded proofs returned by the oracle.
pub const HEX_PREFIX: &str = "0x";

/// Validated proof bytes, ready to be passed to the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof(Bytes);

impl Proof {
    /// Raw proof bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of decoded bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a validated proof.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Reasons a fetched proof is rejected before use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proof is empty")]
    Empty,

    #[error("proof does not start with {HEX_PREFIX}")]
    MissingHexPrefix,

    #[error("proof is not valid hex: {0}")]
    InvalidHex(String),

    #[error("proof decodes to zero bytes")]
    EmptyPayload,
}

/// Check the shape of a hex-encoded proof and decode it.
pub fn validate_proof(text: &str) -> Result<Proof, ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }

    let digits = text
        .strip_prefix(HEX_PREFIX)
        .ok_or(ValidationError::MissingHexPrefix)?;

    let bytes = hex::decode(digits).map_err(|e| ValidationError::InvalidHex(e.to_string()))?;
    if bytes.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }

    Ok(Proof(Bytes::from(bytes)))
}
