//! Error taxonomy
//!
//! Every fallible operation in the crate returns [`Result`]. Component
//! parsers report the first offending byte offset and a short reason;
//! the composite store only surfaces [`Error::Missing`] once every
//! component has been consulted.

use crate::objects::ObjectId;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// Object id not found in any component store.
    #[error("object {0} not found")]
    Missing(ObjectId),

    /// No object matches an abbreviated id.
    #[error("no object with prefix {0}")]
    MissingPrefix(String),

    /// More than one object matches an abbreviated id.
    #[error("object prefix {0} is ambiguous")]
    AmbiguousPrefix(String),

    #[error(transparent)]
    Object(#[from] ObjectFormatError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller-requested abort via a cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

/// A loose or pack object failed structural parse or hash verification.
#[derive(Debug, Error)]
pub enum ObjectFormatError {
    #[error("malformed object id: {0}")]
    BadId(String),

    #[error("unknown object kind {0:?}")]
    UnknownKind(String),

    #[error("malformed {kind} object at byte {offset}: {reason}")]
    Malformed {
        kind: &'static str,
        offset: usize,
        reason: String,
    },

    #[error("object {expected} hashes to {actual}")]
    HashMismatch {
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("bad loose object header: {0}")]
    BadLooseHeader(String),

    #[error("object {id} is a {actual}, expected {expected}")]
    UnexpectedKind {
        id: ObjectId,
        expected: &'static str,
        actual: &'static str,
    },
}

impl ObjectFormatError {
    /// Shorthand for the common structural-parse failure.
    pub(crate) fn malformed(
        kind: &'static str,
        offset: usize,
        reason: impl Into<String>,
    ) -> Self {
        ObjectFormatError::Malformed {
            kind,
            offset,
            reason: reason.into(),
        }
    }
}

/// Pack file or pack index invalid.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("bad pack magic {found:?}")]
    BadMagic { found: [u8; 4] },

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("pack object count {pack} does not match index count {index}")]
    CountMismatch { pack: u32, index: u32 },

    #[error("pack truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("inflate failed at byte {offset}: {reason}")]
    Inflate { offset: usize, reason: String },

    #[error("unknown pack entry kind {code} at byte {offset}")]
    UnknownEntryKind { code: u8, offset: usize },

    #[error("no entry at pack offset {0}")]
    BadOffset(u64),

    #[error("ref-delta base {0} not present in any store")]
    MissingBase(ObjectId),

    #[error("pack trailer mismatch: computed {computed}, stored {stored}")]
    TrailerMismatch {
        computed: ObjectId,
        stored: ObjectId,
    },

    #[error("bad pack index magic")]
    BadIndexMagic,

    #[error("unsupported pack index version {0}")]
    UnsupportedIndexVersion(u32),

    #[error("pack index truncated")]
    IndexTruncated,

    #[error("pack index checksum mismatch")]
    IndexChecksumMismatch,

    #[error("object at offset {offset} hashes to {actual}, index says {expected}")]
    ObjectMismatch {
        offset: u64,
        expected: ObjectId,
        actual: ObjectId,
    },
}

/// Delta stream invalid or inapplicable to its base.
#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("reserved delta opcode 0x00 at byte {offset}")]
    ReservedOpcode { offset: usize },

    #[error("delta truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("delta copy out of bounds: offset {offset} + len {len} > base {base_len}")]
    CopyOutOfBounds {
        offset: usize,
        len: usize,
        base_len: usize,
    },

    #[error("base is {actual} bytes, delta header says {expected}")]
    BaseSizeMismatch { expected: u64, actual: u64 },

    #[error("result is {actual} bytes, delta header says {expected}")]
    ResultSizeMismatch { expected: u64, actual: u64 },

    #[error("delta chain exceeds depth {0}")]
    DepthExceeded(usize),
}

/// Reference file malformed or symbolic chain broken.
#[derive(Debug, Error)]
pub enum RefError {
    #[error("malformed ref {name}: {reason}")]
    Malformed { name: String, reason: String },

    #[error("invalid ref name {0:?}")]
    BadName(String),

    #[error("symbolic ref chain exceeds depth {0}")]
    DepthExceeded(usize),

    #[error("malformed packed-refs line {line}: {reason}")]
    MalformedPacked { line: usize, reason: String },
}
