//! Error types for the DAF runtime
//!
//! One unifying `DafError` plus the codec-specific `CodecError`, which is
//! folded in via `#[from]` so transport code can bubble either with `?`.

use crate::config::ConfigError;

// ----------------------------------------------------------------------------
// Codec Errors
// ----------------------------------------------------------------------------

/// Errors raised while encoding or decoding wire frames
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("unknown message kind tag: {0:#04x}")]
    InvalidKind(u8),

    #[error("unknown value tag: {0:#04x}")]
    InvalidValueTag(u8),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("string field of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    #[error("too many values in message: {0}")]
    TooManyValues(usize),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Main error type unifying all DAF failure modes
#[derive(Debug, thiserror::Error)]
pub enum DafError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("no owning node known for queue: {0}")]
    QueueOwnerUnknown(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("no route for reply to task: {0}")]
    TaskNotRouted(String),

    #[error("rendezvous abandoned before a message arrived")]
    WaiterAbandoned,

    #[error("receive already pending on port {0}")]
    ReceivePending(String),

    #[error("no receive pending on port {0}")]
    DanglingReply(String),

    #[error("no task registered under kind: {0}")]
    UnknownTaskKind(String),

    #[error("task already running: {0}")]
    TaskAlreadyRunning(String),

    #[error("application error: {0}")]
    Application(String),

    #[error("node already started")]
    AlreadyStarted,

    #[error("admin protocol error: {0}")]
    Admin(String),
}

/// Result type used throughout the DAF crates
pub type Result<T> = std::result::Result<T, DafError>;
