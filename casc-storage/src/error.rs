//! Error types for CASC storage operations.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("not enough memory")]
    NotEnoughMemory,

    #[error("bad format: {0}")]
    BadFormat(&'static str),

    #[error("file corrupt: {0}")]
    FileCorrupt(&'static str),

    #[error("file not found")]
    FileNotFound,

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("invalid handle")]
    InvalidHandle,

    #[error("insufficient buffer: {0} bytes needed")]
    InsufficientBuffer(usize),

    #[error("cancelled by progress callback")]
    Cancelled,

    #[error("not supported")]
    NotSupported,

    #[error("encryption key {0:016x} not found")]
    KeyNotFound(u64),

    /// Internal: a root handler wants the dispatcher to retry with the
    /// build's ROOT key. Never surfaced to callers.
    #[error("root manifest requests reparse")]
    ReparseRoot,
}

impl From<tact_formats::Error> for CascError {
    fn from(e: tact_formats::Error) -> Self {
        use tact_formats::Error as E;
        match e {
            E::IOError(io) => CascError::Io(io),
            E::BadMagic => CascError::BadFormat("bad magic"),
            E::UnsupportedVersion(_) => CascError::BadFormat("unsupported version"),
            E::BadKeyLength(_) => CascError::BadFormat("bad key length"),
            E::Truncated { .. } => CascError::BadFormat("truncated data"),
            E::PageKeyMismatch { .. } => CascError::FileCorrupt("page key mismatch"),
            E::ConfigSyntax => CascError::BadFormat("config syntax"),
            E::ConfigTypeMismatch => CascError::BadFormat("config value type"),
            E::MissingField(_) => CascError::BadFormat("missing descriptor field"),
        }
    }
}

pub type Result<T> = std::result::Result<T, CascError>;
