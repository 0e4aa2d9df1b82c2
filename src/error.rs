//! Failure taxonomy shared by the parser and the generator.

use std::io;

use thiserror::Error;

use crate::parse::Token;

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while reading or writing a stream.
///
/// Offsets count bytes from the start of the stream, magic included, and mark
/// where the failure was detected. After any error the originating machine is
/// in an undefined state and must be reset before reuse.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream ended in the middle of a value.
    #[error("unexpected end of stream at offset {offset}")]
    UnexpectedEof { offset: usize },

    /// The stream does not start with the 4.8 version header.
    #[error("bad magic header: expected [04, 08], found {found:02x?}")]
    MagicMismatch { found: [u8; 2] },

    /// An unrecognized type tag byte.
    #[error("unknown type tag {byte:#04x} at offset {offset}")]
    UnknownType { byte: u8, offset: usize },

    /// A symbol link referenced an id the symbol table does not hold yet.
    #[error("symbol link {id} out of range (table holds {table_len}) at offset {offset}")]
    SymbolLinkOutOfRange {
        id: usize,
        table_len: usize,
        offset: usize,
    },

    /// An object link referenced an id the link table does not hold yet.
    #[error("object link {id} out of range (table holds {table_len}) at offset {offset}")]
    ObjectLinkOutOfRange {
        id: usize,
        table_len: usize,
        offset: usize,
    },

    /// A value was written past the declared size of the open container.
    #[error("write past the declared size of the open container at offset {offset}")]
    Overflow { offset: usize },

    /// A value was written after the top-level value was already complete.
    #[error("write on a finished stream at offset {offset}")]
    Finished { offset: usize },

    /// A container was closed before all its declared values were written.
    #[error("container closed early: {written} of {declared} values written at offset {offset}")]
    PrematureClose {
        declared: usize,
        written: usize,
        offset: usize,
    },

    /// A close call that does not match the kind of the open container.
    #[error("close call does not match the open container at offset {offset}")]
    ContextMismatch { offset: usize },

    /// The stream held a different token than the caller asked for.
    #[error("read token {got}, expected {want}")]
    ExpectedToken { got: Token, want: Token },

    /// The underlying byte source or sink failed.
    #[error("i/o failure at offset {offset}")]
    Io {
        offset: usize,
        #[source]
        source: io::Error,
    },
}
