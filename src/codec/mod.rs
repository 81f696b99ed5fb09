pub mod delta;
pub mod lz4;
pub mod snapshot;
mod wire;

pub use delta::{decode_delta, encode_delta, DeltaFlags, DELTA_MAGIC, DELTA_VERSION};
pub use snapshot::{decode_snapshot, encode_snapshot, SnapshotFlags, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

use thiserror::Error;

/// Errors surfaced by the chunk record codecs.
///
/// `Corrupted` covers magic mismatches, unsupported versions, truncated
/// records, CRC failures and undecodable bodies; callers treat such files
/// as absent and regenerate. `SizeMismatch` means the record was written
/// with a different chunk edge size (the world config changed) and is also
/// treated as absent.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupted record: {0}")]
    Corrupted(&'static str),

    #[error("chunk size mismatch: stored {stored}, current {current}")]
    SizeMismatch { stored: i32, current: i32 },
}

pub type CodecResult<T> = Result<T, CodecError>;
