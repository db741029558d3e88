//! Error types of the patcher.

use std::io;
use thiserror::Error;

/// Errors that can occur while applying a patch.
#[derive(Debug, Error)]
pub enum Error {
    /// The call itself is malformed, e.g. a required buffer is missing.
    #[error("invalid arguments: {0}")]
    Argument(&'static str),

    /// The patch is not a well-formed BSDIFF40 patch.
    #[error("corrupt patch: {0}")]
    CorruptPatch(#[from] Corruption),

    /// An encoded offset does not fit the supported 32-bit signed range.
    #[error("offset exceeds 32-bit limit (high word 0x{high:08x})")]
    OffsetRange {
        /// The rejected high 32-bit word.
        high: u32,
    },

    /// The declared target size is larger than the configured limit.
    #[error("declared target size {declared} exceeds limit {limit}")]
    SizeLimit {
        /// Target size declared by the patch header.
        declared: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Writing the target failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the call itself was malformed.
    pub fn is_argument(&self) -> bool {
        matches!(self, Error::Argument(_))
    }

    /// Whether the patch itself is malformed.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptPatch(_))
    }

    /// Whether an offset was out of the supported range.
    pub fn is_offset_range(&self) -> bool {
        matches!(self, Error::OffsetRange { .. })
    }
}

/// The precise way in which a patch is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    /// The patch cannot hold the fixed header.
    #[error("patch of {len} bytes is shorter than the header")]
    TooShort {
        /// Length of the patch.
        len: usize,
    },

    /// The patch does not start with `BSDIFF40`.
    #[error("bad magic")]
    BadMagic,

    /// A header length decoded negative.
    #[error("negative {field} in header: {value}")]
    NegativeHeaderField {
        /// Name of the header field.
        field: &'static str,
        /// Decoded value.
        value: i64,
    },

    /// The control and diff sections run past the end of the patch.
    #[error("sections end at {end} but patch has {len} bytes")]
    SectionsOverrun {
        /// End of the diff section.
        end: u64,
        /// Length of the patch.
        len: usize,
    },

    /// Fewer than 24 bytes remain for a needed control block.
    #[error("truncated control block at {offset}")]
    TruncatedControl {
        /// Offset of the block in the control section.
        offset: usize,
    },

    /// A control block carries a negative add or copy length.
    #[error("negative length in control block at {offset}")]
    NegativeControlLength {
        /// Offset of the block in the control section.
        offset: usize,
    },

    /// A control block would write past the declared target size.
    #[error("writing {count} bytes at {pos} overruns target size {size}")]
    TargetOverrun {
        /// Target cursor.
        pos: usize,
        /// Bytes to be written.
        count: usize,
        /// Declared target size.
        size: usize,
    },

    /// The diff section ran out of bytes.
    #[error("diff section exhausted at {pos}, {count} bytes wanted")]
    DiffExhausted {
        /// Diff cursor.
        pos: usize,
        /// Bytes wanted.
        count: usize,
    },

    /// The extra section ran out of bytes.
    #[error("extra section exhausted at {pos}, {count} bytes wanted")]
    ExtraExhausted {
        /// Extra cursor.
        pos: usize,
        /// Bytes wanted.
        count: usize,
    },

    /// Fewer than 8 bytes are left for an encoded offset.
    #[error("truncated offset at {offset}, view has {len} bytes")]
    TruncatedOffset {
        /// Offset into the view.
        offset: usize,
        /// Length of the view.
        len: usize,
    },
}

/// Result type of the patcher.
pub type Result<T> = std::result::Result<T, Error>;
