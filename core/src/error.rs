//! Error types for SIBYL

use crate::types::{Address, BlockHash, RequestId, Timestamp};
use thiserror::Error;

/// Main error type for SIBYL
///
/// Every variant rejects the whole pending operation; nothing is retried.
#[derive(Error, Debug)]
pub enum SibylError {
    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // ============ Request Errors ============
    #[error("Duplicate request {0}")]
    DuplicateRequest(RequestId),

    #[error("Below minimum bounty: {field} minimum {minimum}, provided {provided}")]
    BelowMinimumBounty {
        field: &'static str,
        minimum: u128,
        provided: u128,
    },

    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Request {0} already answered")]
    RequestAlreadyAnswered(RequestId),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // ============ Consensus Errors ============
    #[error("Signers not sorted at position {index}")]
    SignersNotSorted { index: usize },

    #[error("Signature mismatch at position {index}: expected {expected}, recovered {recovered}")]
    SignatureMismatch {
        index: usize,
        expected: Address,
        recovered: Address,
    },

    #[error("Malformed signature set: {0}")]
    MalformedSignatures(String),

    #[error("Quorum not met: signed stake {signed} of {total}, required {required_pct}%")]
    QuorumNotMet {
        signed: u128,
        total: u128,
        required_pct: u8,
    },

    #[error("Stale previous block: expected {expected}, got {got}")]
    StalePrevious { expected: BlockHash, got: BlockHash },

    #[error("Not a diviner: {0}")]
    NotADiviner(Address),

    #[error("Answer callback failed: {0}")]
    CallbackFailed(String),

    // ============ Stake / Balance Errors ============
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Cooldown active until {until}")]
    CooldownActive { until: Timestamp },

    // ============ Voting Custody Errors ============
    #[error("Voting custody error: {0}")]
    CustodyError(String),

    // ============ Storage Errors ============
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization failed: {0}")]
    SerializationError(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SibylError {
    /// Shorthand for the balance check shared by stake, escrow and withdrawal paths
    pub fn insufficient(required: u128, available: u128) -> Self {
        SibylError::InsufficientBalance {
            required,
            available,
        }
    }
}

impl From<std::io::Error> for SibylError {
    fn from(err: std::io::Error) -> Self {
        SibylError::StorageError(err.to_string())
    }
}

impl From<bincode::Error> for SibylError {
    fn from(err: bincode::Error) -> Self {
        SibylError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for SibylError {
    fn from(err: serde_json::Error) -> Self {
        SibylError::SerializationError(err.to_string())
    }
}
