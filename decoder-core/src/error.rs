//! Error kinds for the decoder, per the error-handling design: `InputError`,
//! `DataError`, and `InternalInvariant` are fatal and carry a fixed process
//! exit code; `SearchFallback` is not an error at all (see `decoder::DecodeOutcome`).

use thiserror::Error;

/// Fatal failure modes of the decoder and its surrounding tooling.
#[derive(Debug, Error)]
pub enum DecoderError {
    /// Malformed input files or a missing required CLI flag.
    #[error("input error: {0}")]
    Input(String),

    /// Missing `<unk>` in the language model, or fewer translation scores
    /// than configured feature weights.
    #[error("data error: {0}")]
    Data(String),

    /// A detected inconsistency that should be structurally impossible:
    /// an uncovered span with no future-cost entry, an expansion that does
    /// not increase coverage, a double release of a hypothesis handle.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl DecoderError {
    /// Process exit code reported by the CLI driver on failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DecoderError::Input(_) => 2,
            DecoderError::Data(_) => 3,
            DecoderError::Internal(_) => 6,
        }
    }
}

pub type Result<T> = std::result::Result<T, DecoderError>;
