//! Error types for the scheduler API codec.

use thiserror::Error;

/// Errors that can occur when encoding or decoding scheduler API messages.
#[derive(Debug, Error)]
pub enum MesosError {
    /// A RecordIO length prefix was not a decimal number.
    #[error("invalid record length prefix: {0:?}")]
    Framing(String),

    /// A record exceeded the maximum accepted size.
    #[error("record of {len} bytes exceeds limit of {limit} bytes")]
    RecordTooLarge { len: usize, limit: usize },

    /// A record or response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl MesosError {
    /// Returns true if the stream framing can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MesosError::Framing(_) | MesosError::RecordTooLarge { .. }
        )
    }
}
