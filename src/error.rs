//! Error types for the verification auction

use thiserror::Error;

/// Failures reported by a signing device or signature collaborator.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("key id {0} out of range (device holds 128 key slots, 0-127)")]
    InvalidKeyId(u8),

    #[error("device returned an all-zero response to {command}")]
    ZeroResponse { command: &'static str },

    #[error("malformed response to {command}: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },

    #[error("device did not answer {command} in time")]
    Timeout { command: &'static str },

    #[error("unknown signing key {0}")]
    UnknownKey(u8),

    #[error("device io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AuctionError {
    /// Malformed or out-of-range registration parameters.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Reward computed outside a block's active window. Indicates a logic bug.
    #[error("domain error: {0}")]
    Domain(String),

    #[error("no verifiers registered")]
    NoVerifiers,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking worker panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AuctionError>;
