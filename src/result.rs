//! Result and error types.
//!
//! Every fallible operation in the crate returns [`Result`]. The first
//! non-ok result short-circuits the enclosing pass via `?`. User-visible
//! language violations carry a source location; everything else describes a
//! caller contract breach or an internal invariant failure and aborts the
//! compilation without recovery.

use crate::source::SourceLocation;
use thiserror::Error;

/// A compilation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A caller violated a function's contract.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// An internal invariant does not hold. Always a bug in the compiler.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// Allocation failure reported by a container.
    #[error("out of memory")]
    OutOfMemory,

    /// An index is outside the bounds of a bitset, graph or entity table.
    #[error("out of bounds")]
    OutOfBounds,

    /// A requested key is absent.
    #[error("not found")]
    NotFound,

    /// A key being inserted is already present.
    #[error("already exists")]
    AlreadyExists,

    /// Sentinel returned by iterators that ran off the end. Not a failure.
    #[error("iterator end")]
    IteratorEnd,

    /// The divisor of a bit-precise integer division was zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The user program violates a language rule.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// The user program violates a language rule at a known location.
    #[error("{location}: {message}")]
    Source {
        /// Where the offending construct appears.
        location: SourceLocation,
        /// Description of the violated rule.
        message: String,
    },

    /// A `_Static_assert` condition evaluated to zero.
    #[error("{location}: static assertion failed: {message}")]
    StaticAssert {
        /// Location of the assertion.
        location: SourceLocation,
        /// The assertion's string literal, verbatim.
        message: String,
    },
}

impl Error {
    /// Construct a located analysis error.
    pub fn at(location: SourceLocation, message: impl Into<String>) -> Self {
        Error::Source {
            location,
            message: message.into(),
        }
    }
}

/// A convenient alias for a `Result` whose error is `Error`.
pub type Result<T> = core::result::Result<T, Error>;
