//! Error types for the MIDAS decoder
//!
//! Only two conditions are fatal to a run: an I/O failure on a required
//! file and an exceeded desync-anomaly budget. Everything else (unmapped
//! addresses, malformed channel-map lines, frame-check mismatches) is
//! reported through `tracing` and recovered locally. Running out of input
//! while scanning for a block marker is normal termination, not an error.

use thiserror::Error;

/// Decoder errors
#[derive(Error, Debug)]
pub enum MidasError {
    /// I/O error (cannot open or read a required file) - fatal
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended in the middle of a block - the block is abandoned and
    /// the caller may resynchronize on the next block marker
    #[error("stream truncated in block {block} while reading {context}")]
    StreamTruncated { block: u64, context: &'static str },

    /// Too many decode anomalies in one block - fatal, the stream is
    /// considered desynchronized beyond recovery
    #[error("desynchronized stream in block {block}: {anomalies} anomalies exceed the budget")]
    Desync { block: u64, anomalies: u32 },

    /// Output sink failure - fatal
    #[error("sink error: {0}")]
    Sink(String),
}

impl MidasError {
    /// Create a sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// True for errors that abandon the current block but permit
    /// resynchronization on the next one.
    pub fn is_block_recoverable(&self) -> bool {
        matches!(self, Self::StreamTruncated { .. })
    }
}

/// Result type alias using MidasError
pub type MidasResult<T> = Result<T, MidasError>;
