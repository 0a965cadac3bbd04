//! Terminal status reporting.
//!
//! The state machine latches exactly one status code per attempt
//! (first cause wins) and the reporter encodes it as the
//! `{"ota-status": ...}` wire message. The same encoding serves
//! out-of-band residual codes that are not tied to an in-progress
//! transfer.

use serde::Serialize;

use crate::descriptor::ImageKind;
use crate::error::{AuthError, ParseError, TransferError, UpdateError};

/// Report code meaning "no report pending".
pub const STATUS_NONE: u8 = 0;
/// Report code for a completed, verified update.
pub const STATUS_SUCCESS: u8 = 1;

/// Wire status code for a terminal error. Codes are grouped by
/// component and kept stable: parse 0x1x, auth 0x2x, transfer 0x3x,
/// driver 0x4x.
pub fn status_code(err: &UpdateError) -> u8 {
    match err {
        UpdateError::Parse(ParseError::MissingUrl) => 0x11,
        UpdateError::Parse(ParseError::MissingSize) => 0x12,
        UpdateError::Parse(ParseError::BadKind) => 0x13,
        UpdateError::Parse(ParseError::MissingVersion) => 0x14,
        UpdateError::Parse(ParseError::TooLong) => 0x15,
        UpdateError::Parse(ParseError::BadJson) => 0x16,
        UpdateError::Auth(AuthError::HeaderSize) => 0x21,
        UpdateError::Auth(AuthError::SignatureInvalid) => 0x22,
        UpdateError::Auth(AuthError::ChecksumInvalid) => 0x23,
        UpdateError::Auth(AuthError::BadRecord) => 0x24,
        UpdateError::Auth(AuthError::DsnMismatch) => 0x25,
        UpdateError::Transfer(TransferError::GetFailed) => 0x31,
        UpdateError::Transfer(TransferError::BadPadding) => 0x32,
        UpdateError::Transfer(TransferError::ImageCorrupt) => 0x33,
        UpdateError::NotifyFailed => 0x41,
        UpdateError::SaveFailed => 0x42,
        UpdateError::Canceled => 0x50,
        UpdateError::Busy | UpdateError::WrongPhase => 0x51,
    }
}

/// One pending terminal status. At most one report exists at a time;
/// a later status while one is pending is dropped so the first,
/// earlier cause is preserved.
#[derive(Debug, Clone, Copy)]
pub struct StatusReport {
    code: u8,
    kind: ImageKind,
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            code: STATUS_NONE,
            kind: ImageKind::Module,
        }
    }
}

impl StatusReport {
    /// Latch a status. Returns whether the code was accepted.
    pub fn latch(&mut self, code: u8, kind: ImageKind) -> bool {
        if self.code != STATUS_NONE {
            return false;
        }
        self.code = code;
        self.kind = kind;
        true
    }

    pub fn pending(&self) -> bool {
        self.code != STATUS_NONE
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn clear(&mut self) {
        *self = StatusReport::default();
    }

    /// Encode the report as the outbound status message.
    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        encode_status(self.code, self.kind, buf)
    }
}

#[derive(Serialize)]
struct StatusWire {
    #[serde(rename = "ota-status")]
    ota_status: StatusBody,
}

#[derive(Serialize)]
struct StatusBody {
    status: u8,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Encode one `ota-status` message. Also used for out-of-band residual
/// codes from a previous attempt.
pub fn encode_status(code: u8, kind: ImageKind, buf: &mut [u8]) -> Option<usize> {
    let msg = StatusWire {
        ota_status: StatusBody {
            status: code,
            kind: kind.as_str(),
        },
    };
    serde_json_core::to_slice(&msg, buf).ok()
}
