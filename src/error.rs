use std::path::PathBuf;

use thiserror::Error;

use crate::quadkey::QuadKey;

/// Convenience alias for all fallible operations of this crate.
pub type QuadResult<T> = Result<T, QuadError>;

/// Errors raised by store, search and build operations.
#[derive(Debug, Error)]
pub enum QuadError {
    /// Underlying file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stylesheet could not be read or parsed.
    #[error("cannot read stylesheet {path}: {reason}")]
    Stylesheet { path: PathBuf, reason: String },

    /// A store key was registered twice.
    #[error("store key {0:?} is already registered")]
    DuplicateStore(String),

    /// An operation referenced a store key that was never registered.
    #[error("no store registered under key {0:?}")]
    UnknownStore(String),

    /// A level of detail outside the supported `1..=16` range.
    #[error("level of detail {0} is outside the supported range 1..=16")]
    LodOutOfRange(u8),

    /// Tile coordinates do not exist at the given level of detail.
    #[error("tile ({x}, {y}) does not exist at level of detail {lod}")]
    TileOutOfRange { lod: u8, x: i32, y: i32 },

    /// A quad key literal could not be parsed.
    #[error("invalid quad key literal {0:?}")]
    InvalidQuadKey(String),

    /// An element record carries an unknown kind byte.
    #[error("unrecognized element kind byte {0:#04x}")]
    CorruptRecord(u8),

    /// A mesh cache file carries an unknown record type byte.
    #[error("unrecognized cache record type {0:#04x}")]
    CorruptCache(u8),

    /// A length does not fit the fixed-width field of the on-disk format.
    #[error("{0} does not fit the on-disk record format")]
    RecordOverflow(&'static str),

    /// A bitmap referenced an element order that is not stored.
    #[error("no element stored at order {order} of tile {quad_key}")]
    MissingOrder { quad_key: QuadKey, order: u32 },

    /// A string id that was never interned.
    #[error("no string interned with id {0}")]
    UnknownStringId(u32),

    /// Cache lookup for a key that is not present.
    #[error("key is not present in cache")]
    CacheMiss,

    /// The store does not support erasing by bounding box.
    #[error("store does not support erase by bounding box")]
    UnsupportedErase,
}
