//! Error types for the wire protocol.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Errors raised while turning inbound payloads into records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The supplied timestamp matched neither accepted layout.
    #[error("invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        /// The raw timestamp text.
        value: String,
        /// Underlying chrono parse failure.
        #[source]
        source: chrono::ParseError,
    },
}

impl ProtocolError {
    /// Static error code for metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
        }
    }
}
