//! Shared in-memory fakes and image builders for the engine tests.

#![allow(dead_code)]

use std::cell::RefCell;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use crc::{CRC_16_XMODEM, Crc};
use sha2::{Digest, Sha256};

use otalink_engine::descriptor::ServerEndpoint;
use otalink_engine::ports::{
    FlashDriver, HeaderVerifier, NotifyError, SaveError, Transport, VerifyFailure,
};

pub const BLOCK: usize = 16;

// -----------------------------------------------------------------------------
// Transport fake: serves one image out of memory, range by range
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeTransportError;

#[derive(Default)]
pub struct FakeTransport {
    /// Image bytes served by ranged fetches.
    pub image: Vec<u8>,
    /// Metadata body served until `image_host` is requested (remote
    /// resolution tests).
    pub location_body: Option<Vec<u8>>,
    /// Host that serves actual image bytes; `None` serves from any.
    pub image_host: Option<String>,
    /// Fail this many fetches before serving normally.
    pub fail_fetches: usize,
    /// Per-fetch caps on the bytes served, consumed in order; short
    /// reads are allowed by the transport contract.
    pub read_caps: Vec<usize>,
    /// Fail this many status sends before accepting.
    pub fail_status: usize,
    pub fetches: Vec<(u32, u32)>,
    pub status_bodies: Vec<Vec<u8>>,
}

impl FakeTransport {
    pub fn serving(image: &[u8]) -> Self {
        Self {
            image: image.to_vec(),
            ..Self::default()
        }
    }
}

impl Transport for FakeTransport {
    type Error = FakeTransportError;

    async fn fetch_range(
        &mut self,
        server: &ServerEndpoint,
        offset: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result<usize, Self::Error> {
        self.fetches.push((offset, count));
        if self.fail_fetches > 0 {
            self.fail_fetches -= 1;
            return Err(FakeTransportError);
        }
        if let Some(host) = &self.image_host {
            if server.host.as_str() != host {
                let body = self.location_body.clone().ok_or(FakeTransportError)?;
                buf[..body.len()].copy_from_slice(&body);
                return Ok(body.len());
            }
        }
        let start = offset as usize;
        if start >= self.image.len() {
            return Ok(0);
        }
        let cap = if self.read_caps.is_empty() {
            buf.len()
        } else {
            self.read_caps.remove(0)
        };
        let end = (start + count as usize).min(self.image.len());
        let n = (end - start).min(buf.len()).min(cap);
        buf[..n].copy_from_slice(&self.image[start..start + n]);
        Ok(n)
    }

    async fn send_status(
        &mut self,
        _server: &ServerEndpoint,
        _path: &str,
        body: &[u8],
    ) -> Result<(), Self::Error> {
        if self.fail_status > 0 {
            self.fail_status -= 1;
            return Err(FakeTransportError);
        }
        self.status_bodies.push(body.to_vec());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Flash fake: records writes and lifecycle calls
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct FlashLog {
    pub saves: Vec<(u32, Vec<u8>)>,
    pub done: Vec<bool>,
    pub notified: usize,
    pub status_cleared: usize,
}

#[derive(Default)]
pub struct FakeFlash {
    pub log: RefCell<FlashLog>,
    /// Inject one `Stall` on the save with this index (0-based).
    pub stall_on_save: Option<usize>,
    /// Fail every save terminally.
    pub fail_saves: bool,
    /// Answer the first `notify` calls with `Busy`.
    pub notify_busy: usize,
    pub notify_reject: bool,
    pub saves_seen: RefCell<usize>,
}

impl FakeFlash {
    pub fn written(&self) -> Vec<u8> {
        let log = self.log.borrow();
        let mut out = Vec::new();
        for (offset, bytes) in &log.saves {
            let offset = *offset as usize;
            if out.len() < offset + bytes.len() {
                out.resize(offset + bytes.len(), 0);
            }
            out[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        out
    }
}

impl FlashDriver for &FakeFlash {
    fn save(&mut self, offset: u32, bytes: &[u8]) -> Result<(), SaveError> {
        let index = *self.saves_seen.borrow();
        *self.saves_seen.borrow_mut() += 1;
        if self.fail_saves {
            return Err(SaveError::Failed);
        }
        if self.stall_on_save == Some(index) {
            return Err(SaveError::Stall);
        }
        self.log
            .borrow_mut()
            .saves
            .push((offset, bytes.to_vec()));
        Ok(())
    }

    fn save_done(&mut self, success: bool) {
        self.log.borrow_mut().done.push(success);
    }

    fn notify(
        &mut self,
        _descriptor: &otalink_engine::UpdateDescriptor,
    ) -> Result<(), NotifyError> {
        if self.notify_reject {
            return Err(NotifyError::Rejected);
        }
        if self.log.borrow().notified < self.notify_busy {
            self.log.borrow_mut().notified += 1;
            return Err(NotifyError::Busy);
        }
        self.log.borrow_mut().notified += 1;
        Ok(())
    }

    fn status_clear(&mut self) {
        self.log.borrow_mut().status_cleared += 1;
    }
}

// -----------------------------------------------------------------------------
// Header verifier fake: one known signature maps to one plaintext
// -----------------------------------------------------------------------------

pub struct FixedVerifier {
    pub signature: Vec<u8>,
    pub plaintext: Vec<u8>,
}

impl HeaderVerifier for FixedVerifier {
    fn verify(&self, signature: &[u8], out: &mut [u8]) -> Result<usize, VerifyFailure> {
        if signature != self.signature.as_slice() || self.plaintext.len() > out.len() {
            return Err(VerifyFailure);
        }
        out[..self.plaintext.len()].copy_from_slice(&self.plaintext);
        Ok(self.plaintext.len())
    }
}

// -----------------------------------------------------------------------------
// LAN image and header builders
// -----------------------------------------------------------------------------

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// PKCS#7-pad and AES-128-CBC-encrypt an image the way the build
/// tooling does, with the IV derived from the device serial.
pub fn encrypt_image(plain: &[u8], key: &[u8; 16], dsn: &str) -> Vec<u8> {
    let pad = BLOCK - plain.len() % BLOCK;
    let mut padded = plain.to_vec();
    padded.extend(std::iter::repeat(pad as u8).take(pad));
    encrypt_padded(&padded, key, dsn)
}

/// CBC-encrypt an already block-aligned buffer (for crafting images
/// with deliberately broken padding).
pub fn encrypt_padded(padded: &[u8], key: &[u8; 16], dsn: &str) -> Vec<u8> {
    use aes::Aes128;
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    assert_eq!(padded.len() % BLOCK, 0);
    let mut out = padded.to_vec();
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut chain = dsn_iv(dsn);
    for block in out.chunks_exact_mut(BLOCK) {
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        chain.copy_from_slice(block);
    }
    out
}

/// IV the engine derives for a LAN session: leading bytes of
/// SHA-256 over the device serial.
pub fn dsn_iv(dsn: &str) -> [u8; BLOCK] {
    let digest = Sha256::digest(dsn.as_bytes());
    let mut iv = [0u8; BLOCK];
    iv.copy_from_slice(&digest[..BLOCK]);
    iv
}

/// Digest the signed header carries: SHA-256 over the padded
/// plaintext.
pub fn padded_digest(plain: &[u8]) -> [u8; 32] {
    let pad = BLOCK - plain.len() % BLOCK;
    let mut padded = plain.to_vec();
    padded.extend(std::iter::repeat(pad as u8).take(pad));
    Sha256::digest(&padded).into()
}

/// Build the signed plaintext blob `record || crc16(le)` where the
/// checksum covers record, NUL terminator and the CRC field itself.
/// JSON whitespace is adjusted until the self-referential checksum has
/// a solution.
pub fn signed_blob(dsn: &str, ver: &str, key: &[u8; 16], digest: &[u8; 32]) -> Vec<u8> {
    for salt in 0..64usize {
        let record = format!(
            "{{\"dsn\":\"{}\",{}\"ver\":\"{}\",\"key\":\"{}\",\"sign\":\"{}\"}}",
            dsn,
            " ".repeat(salt),
            ver,
            hex::encode(key),
            hex::encode(digest),
        );
        let payload = record.as_bytes();
        for candidate in 0..=u16::MAX {
            let le = candidate.to_le_bytes();
            let mut buf = payload.to_vec();
            buf.push(0);
            buf.extend_from_slice(&le);
            if CRC16.checksum(&buf) == candidate {
                let mut blob = payload.to_vec();
                blob.extend_from_slice(&le);
                return blob;
            }
        }
    }
    unreachable!("no self-consistent checksum found");
}

/// A base64 header plus the verifier that accepts it.
pub fn lan_header(blob: &[u8]) -> (String, FixedVerifier) {
    let signature = vec![0xA5u8; 256];
    let head = BASE64.encode(&signature);
    let verifier = FixedVerifier {
        signature,
        plaintext: blob.to_vec(),
    };
    (head, verifier)
}

pub fn endpoint(host: &str, port: u16, path: &str) -> ServerEndpoint {
    ServerEndpoint {
        host: host.try_into().unwrap(),
        port,
        tls: false,
        path: path.try_into().unwrap(),
    }
}
