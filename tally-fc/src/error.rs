//! Error types for tally-fc

use tally_common::api::PacketKind;
use tally_common::codec::CodecError;
use tally_common::Fingerprint;
use thiserror::Error;

/// Failure of a single fetch against the query server
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not authorized to view statistics")]
    Unauthorized,

    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Response carries no {0} packet")]
    MissingPacket(PacketKind),

    #[error("Invalid base64 packet: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Malformed packet: {0}")]
    Codec(#[from] CodecError),

    #[error("Packet belongs to filter {received}, expected {expected}")]
    HashMismatch {
        expected: Fingerprint,
        received: Fingerprint,
    },

    #[error("No filter has been applied yet")]
    NoActiveFilter,
}

/// Main error type for tally-fc setup and persistence
#[derive(Debug, Error)]
pub enum Error {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] tally_common::Error),
}

/// Convenience Result type using tally-fc Error
pub type Result<T> = std::result::Result<T, Error>;
