//! Error types for term buffer serialization and the ETF codec.

use thiserror::Error;

/// Errors that can occur while reducing, encoding or decoding terms.
#[derive(Error, Debug)]
pub enum TermError {
    #[error("Stack underflow at slot {slot}: needed {needed} terms, {available} available")]
    StackUnderflow {
        slot: usize,
        needed: usize,
        available: usize,
    },

    #[error("Term buffer reduced to {0} terms, expected exactly one")]
    Unbalanced(usize),

    #[error("Dangling {pool} pool reference: index {index} (pool holds {len})")]
    DanglingRef {
        pool: &'static str,
        index: u32,
        len: usize,
    },

    #[error("Sparse tuple of arity {arity} lists invalid null position {position}")]
    InvalidNullPosition { arity: u32, position: u32 },

    #[error("Truncated term: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unsupported external term format version: {0}")]
    BadVersion(u8),

    #[error("Unknown term tag: {0}")]
    UnknownTag(u8),

    #[error("Invalid UTF-8 in atom: {0}")]
    InvalidAtom(#[from] std::string::FromUtf8Error),

    #[error("Integer does not fit in 64 bits ({0} magnitude bytes)")]
    IntegerOverflow(usize),

    #[error("Trailing bytes after term: {0}")]
    TrailingBytes(usize),

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
