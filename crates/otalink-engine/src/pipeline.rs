//! Streaming decrypt/verify pipeline for LAN updates.
//!
//! Transport chunks arrive at arbitrary sizes; cipher blocks do not.
//! The session reassembles ciphertext across chunk boundaries,
//! decrypts whole blocks with one long-lived CBC context, removes the
//! end-of-image padding, and feeds every decrypted byte into a running
//! hash that is checked against the signed digest at end-of-image.
//!
//! Block boundaries are a pure function of total bytes seen, so the
//! same byte range must never be fed twice; the fetch scheduler's
//! offset tracking guarantees that.

use heapless::Vec;
use zeroize::Zeroize;

use crate::auth::LanHeader;
use crate::error::TransferError;
use crate::fetch::MAX_FETCH;
use crate::ports::{BlockDecryptor, DIGEST_LEN, ImageDigest};

/// Largest cipher block the session can carry across chunk boundaries.
pub const MAX_BLOCK: usize = 16;

const WORK_CAPACITY: usize = MAX_FETCH + MAX_BLOCK;

/// One LAN update's crypto state: cipher context, hash context and the
/// not-yet-block-aligned ciphertext remainder. Created when the LAN
/// header passes authentication; zeroized on drop regardless of how
/// the attempt ends.
pub struct CryptoSession<D: BlockDecryptor, G: ImageDigest> {
    cipher: D,
    hasher: Option<G>,
    expected_digest: [u8; DIGEST_LEN],
    total_length: u32,
    /// Ciphertext bytes already decrypted (not counting `pending`).
    decrypted: u32,
    pending: [u8; MAX_BLOCK],
    pending_len: usize,
    padding_trim: u32,
    work: Vec<u8, WORK_CAPACITY>,
}

impl<D: BlockDecryptor, G: ImageDigest> CryptoSession<D, G> {
    /// Key a fresh session from an authenticated header. The IV is
    /// derived from the device serial, binding the cipher stream to
    /// this device.
    pub fn create(header: &LanHeader, dsn: &str, total_length: u32) -> Self {
        let mut iv_digest = G::init();
        iv_digest.update(dsn.as_bytes());
        let mut iv = iv_digest.finalize();

        let cipher = D::init(&header.key, &iv);
        iv.zeroize();

        Self {
            cipher,
            hasher: Some(G::init()),
            expected_digest: header.expected_digest,
            total_length,
            decrypted: 0,
            pending: [0u8; MAX_BLOCK],
            pending_len: 0,
            padding_trim: 0,
            work: Vec::new(),
        }
    }

    /// Padding length discovered on the final chunk (0 until then).
    pub fn padding_trim(&self) -> u32 {
        self.padding_trim
    }

    /// True once every ciphertext byte has been decrypted and the
    /// final digest matched the signed one.
    pub fn verified(&self) -> bool {
        self.hasher.is_none() && self.pending_len == 0 && self.decrypted == self.total_length
    }

    /// Decrypt one transport chunk and return the plaintext to hand to
    /// the flash driver. The returned slice is already truncated by
    /// the end-of-image padding when this chunk is the final one.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<&[u8], TransferError> {
        self.work.clear();
        if self
            .work
            .extend_from_slice(&self.pending[..self.pending_len])
            .is_err()
            || self.work.extend_from_slice(chunk).is_err()
        {
            return Err(TransferError::GetFailed);
        }

        let block = self.cipher.block_size();
        let usable = self.work.len() / block * block;

        // The sub-block remainder is carried into the next call.
        self.pending_len = self.work.len() - usable;
        self.pending[..self.pending_len].copy_from_slice(&self.work[usable..]);
        self.work.truncate(usable);

        if usable == 0 {
            return Ok(&[]);
        }

        self.cipher.decrypt_blocks(&mut self.work[..usable]);

        let final_chunk = self.decrypted + usable as u32 >= self.total_length;
        if final_chunk {
            let pad = usize::from(self.work[usable - 1]);
            if pad == 0 || pad > block || pad > usable {
                return Err(TransferError::BadPadding);
            }
            if self.work[usable - pad..].iter().any(|&b| b != self.work[usable - 1]) {
                return Err(TransferError::BadPadding);
            }
            self.padding_trim = pad as u32;
        }

        // The signed digest covers the padded plaintext, so hash the
        // full decrypted range before truncation.
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&self.work[..usable]);
        }
        self.decrypted += usable as u32;

        if final_chunk {
            let digest = match self.hasher.take() {
                Some(hasher) => hasher.finalize(),
                None => return Err(TransferError::ImageCorrupt),
            };
            if digest != self.expected_digest {
                return Err(TransferError::ImageCorrupt);
            }
        }

        Ok(&self.work[..usable - self.padding_trim as usize])
    }
}

impl<D: BlockDecryptor, G: ImageDigest> Drop for CryptoSession<D, G> {
    fn drop(&mut self) {
        // The cipher context is responsible for zeroizing its own key
        // schedule; everything the session itself holds is wiped here.
        self.expected_digest.zeroize();
        self.pending.zeroize();
        self.work.as_mut_slice().zeroize();
    }
}
