//! Error types for the update engine.
//!
//! Each component has its own sum type; the state machine composes
//! them into [`UpdateError`] at its boundary. Severity is carried in
//! the type: everything here is terminal for the current attempt
//! except [`crate::ports::SaveError::Stall`], which never surfaces as
//! an `UpdateError`.

use core::fmt;

use crate::ports::SaveError;

/// Descriptor parse failures (§ descriptor module).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Body is not a well-formed update command.
    BadJson,
    /// URL/path field missing or empty.
    MissingUrl,
    /// Size field missing or zero.
    MissingSize,
    /// Image kind token not recognized.
    BadKind,
    /// Version field missing.
    MissingVersion,
    /// A string field exceeds its fixed capacity.
    TooLong,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BadJson => write!(f, "malformed update command"),
            ParseError::MissingUrl => write!(f, "url missing or empty"),
            ParseError::MissingSize => write!(f, "size missing or zero"),
            ParseError::BadKind => write!(f, "unknown image kind"),
            ParseError::MissingVersion => write!(f, "version missing"),
            ParseError::TooLong => write!(f, "field exceeds fixed capacity"),
        }
    }
}

/// LAN header authentication failures. Each gate maps to one variant;
/// no field is trusted before its gate passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Base64 decode failed or decoded length is not the header size.
    HeaderSize,
    /// Public-key verification failed.
    SignatureInvalid,
    /// Embedded CRC does not match the verified plaintext.
    ChecksumInvalid,
    /// Verified plaintext is not the expected fixed-schema record.
    BadRecord,
    /// Header was signed for a different device serial.
    DsnMismatch,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::HeaderSize => write!(f, "header size mismatch"),
            AuthError::SignatureInvalid => write!(f, "header signature invalid"),
            AuthError::ChecksumInvalid => write!(f, "header checksum invalid"),
            AuthError::BadRecord => write!(f, "header record malformed"),
            AuthError::DsnMismatch => write!(f, "header bound to another device"),
        }
    }
}

/// Transfer and decrypt/verify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Chunk retry budget exhausted with no forward progress.
    GetFailed,
    /// End-of-image padding is malformed.
    BadPadding,
    /// Final digest does not match the expected image digest.
    ImageCorrupt,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::GetFailed => write!(f, "image fetch failed"),
            TransferError::BadPadding => write!(f, "image padding invalid"),
            TransferError::ImageCorrupt => write!(f, "image digest mismatch"),
        }
    }
}

/// Top-level error latched by the update state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// An update attempt is already active.
    Busy,
    /// The engine is not in the right phase for this call.
    WrongPhase,
    Parse(ParseError),
    Auth(AuthError),
    Transfer(TransferError),
    /// Driver refused the update after the notify retry budget.
    NotifyFailed,
    /// Terminal flash-write failure.
    SaveFailed,
    /// Attempt canceled by the surrounding agent.
    Canceled,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::Busy => write!(f, "update already in progress"),
            UpdateError::WrongPhase => write!(f, "call not valid in current phase"),
            UpdateError::Parse(e) => write!(f, "parse: {}", e),
            UpdateError::Auth(e) => write!(f, "auth: {}", e),
            UpdateError::Transfer(e) => write!(f, "transfer: {}", e),
            UpdateError::NotifyFailed => write!(f, "driver notify failed"),
            UpdateError::SaveFailed => write!(f, "flash write failed"),
            UpdateError::Canceled => write!(f, "update canceled"),
        }
    }
}

impl From<ParseError> for UpdateError {
    fn from(e: ParseError) -> Self {
        UpdateError::Parse(e)
    }
}

impl From<AuthError> for UpdateError {
    fn from(e: AuthError) -> Self {
        UpdateError::Auth(e)
    }
}

impl From<TransferError> for UpdateError {
    fn from(e: TransferError) -> Self {
        UpdateError::Transfer(e)
    }
}

impl From<SaveError> for UpdateError {
    fn from(_: SaveError) -> Self {
        // Stall is handled before conversion; anything that reaches
        // this point is terminal.
        UpdateError::SaveFailed
    }
}
