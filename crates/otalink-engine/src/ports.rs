//! Capability traits consumed by the update engine.
//!
//! The engine never talks to a socket, a flash chip, or a crypto
//! peripheral directly. Each of those collaborators is owned by the
//! surrounding agent and reaches the engine through one of the traits
//! below, so the whole update flow can be exercised against in-memory
//! fakes.

use crate::descriptor::{ServerEndpoint, UpdateDescriptor};

/// Request/response transport used for image download and status upload.
///
/// The engine holds at most one outstanding request at a time. A fetch
/// is one bounded round-trip: the implementation issues a ranged read
/// and copies the response body into `buf`, returning the number of
/// bytes delivered. Returning fewer bytes than `count` is allowed; the
/// engine simply re-requests from its current offset.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Fetch `count` bytes of the image starting at `offset`.
    async fn fetch_range(
        &mut self,
        server: &ServerEndpoint,
        offset: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result<usize, Self::Error>;

    /// Deliver one encoded status message to the issuer.
    async fn send_status(
        &mut self,
        server: &ServerEndpoint,
        path: &str,
        body: &[u8],
    ) -> Result<(), Self::Error>;
}

/// Recoverable/terminal outcome of a flash write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveError {
    /// The driver's own resource is full; retry the same write later.
    Stall,
    /// The write failed for good.
    Failed,
}

/// Outcome of informing the external driver about a pending update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The driver cannot accept the update right now; retry later.
    Busy,
    /// The driver rejected the update.
    Rejected,
}

/// Flash-write driver boundary.
///
/// `save` persists verified image bytes at the given offset;
/// `SaveError::Stall` is the only recoverable signal and pauses the
/// fetch loop without losing progress. `notify` may itself call back
/// into the agent (e.g. to start the transfer), so the engine invokes
/// it after its own mutable borrow has ended.
pub trait FlashDriver {
    fn save(&mut self, offset: u32, bytes: &[u8]) -> Result<(), SaveError>;
    fn save_done(&mut self, success: bool);
    fn notify(&mut self, descriptor: &UpdateDescriptor) -> Result<(), NotifyError>;
    fn status_clear(&mut self);
}

/// Block-cipher context with CBC chaining.
///
/// One context lives for the whole transfer: chaining state carries
/// across calls, which is why the engine never re-initializes it per
/// chunk and never feeds the same byte range twice.
pub trait BlockDecryptor {
    fn init(key: &[u8], iv: &[u8]) -> Self;
    fn block_size(&self) -> usize;
    /// Decrypt `data` in place. `data.len()` is always a multiple of
    /// the block size.
    fn decrypt_blocks(&mut self, data: &mut [u8]);
}

/// Incremental hash over the (padded) plaintext image.
pub trait ImageDigest {
    fn init() -> Self;
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> [u8; DIGEST_LEN];
}

/// Digest width used for image verification and IV derivation.
pub const DIGEST_LEN: usize = 32;

/// Public-key verification of a signed LAN update header.
///
/// `verify` checks the signature and recovers the signed plaintext
/// into `out`, returning its length. Failure must not leak any part of
/// the recovered plaintext.
pub trait HeaderVerifier {
    fn verify(&self, signature: &[u8], out: &mut [u8]) -> Result<usize, VerifyFailure>;
}

/// Opaque signature-verification failure reported by the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyFailure;
