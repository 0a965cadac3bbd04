//! LAN update header authentication.
//!
//! Peer-initiated updates carry a base64 header: an RSA-sized signed
//! blob that, once verified against the device's own public key,
//! yields the image cipher key and expected digest. Unpacking is a
//! sequential fail-closed pipeline; no field is trusted before its
//! preceding gate passes, and partial state is zeroized on any
//! failure.

use crc::{CRC_16_XMODEM, Crc};
use heapless::String;
use serde::Deserialize;
use zeroize::{Zeroize, Zeroizing};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::descriptor::MAX_VERSION_LEN;
use crate::error::AuthError;
use crate::ports::{DIGEST_LEN, HeaderVerifier};

/// Size of the decoded header: one RSA-2048 signature.
pub const LAN_HEADER_LEN: usize = 256;
/// Upper bound on the signed plaintext recovered from the header.
pub const LAN_SIGNED_MAX: usize = 256;
/// AES key length carried by the header (hex-encoded on the wire).
pub const LAN_KEY_LEN: usize = 16;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Authenticated contents of a LAN update header.
#[derive(Debug)]
pub struct LanHeader {
    pub version: String<MAX_VERSION_LEN>,
    pub key: [u8; LAN_KEY_LEN],
    pub expected_digest: [u8; DIGEST_LEN],
}

impl Drop for LanHeader {
    fn drop(&mut self) {
        self.key.zeroize();
        self.expected_digest.zeroize();
    }
}

/// Fixed-schema record embedded in the signed plaintext.
#[derive(Deserialize)]
struct RecordWire<'a> {
    #[serde(borrow)]
    dsn: Option<&'a str>,
    #[serde(borrow)]
    ver: Option<&'a str>,
    #[serde(borrow)]
    key: Option<&'a str>,
    #[serde(borrow)]
    sign: Option<&'a str>,
}

/// Validate and unpack a signed LAN update header.
///
/// Gates, in order: base64 size, public-key verification, CRC-16 over
/// `payload + NUL + CRC field` (the exact byte range of the original
/// protocol), record tokenization with fixed hex widths, and the
/// device-serial binding that defends against replaying another
/// device's signed header.
pub fn unpack_header<V: HeaderVerifier>(
    head_b64: &str,
    dsn: &str,
    verifier: &V,
) -> Result<LanHeader, AuthError> {
    // Gate 1: decode to a fixed-size buffer; anything but the exact
    // header size is rejected.
    let mut sig = Zeroizing::new([0u8; LAN_HEADER_LEN + 4]);
    let n = BASE64
        .decode_slice(head_b64.as_bytes(), sig.as_mut())
        .map_err(|_| AuthError::HeaderSize)?;
    if n != LAN_HEADER_LEN {
        return Err(AuthError::HeaderSize);
    }

    // Gate 2: recover the signed plaintext. Failure short-circuits
    // before any checksum work.
    let mut plain = Zeroizing::new([0u8; LAN_SIGNED_MAX + 3]);
    let recovered = verifier
        .verify(&sig[..LAN_HEADER_LEN], &mut plain[..LAN_SIGNED_MAX])
        .map_err(|_| AuthError::SignatureInvalid)?;
    if recovered < 3 || recovered > LAN_SIGNED_MAX {
        return Err(AuthError::SignatureInvalid);
    }

    // Gate 3: the blob is `payload || crc16(le)`. The checksum was
    // produced over payload, a NUL terminator, and the CRC field
    // itself; reproduce that exact byte range rather than a cleaner
    // equivalent.
    let payload_len = recovered - 2;
    let embedded = u16::from_le_bytes([plain[payload_len], plain[payload_len + 1]]);
    plain[payload_len + 2] = plain[payload_len + 1];
    plain[payload_len + 1] = plain[payload_len];
    plain[payload_len] = 0;
    let computed = CRC16.checksum(&plain[..payload_len + 3]);
    if computed != embedded {
        return Err(AuthError::ChecksumInvalid);
    }

    // Gate 4: tokenize the verified record.
    let (record, _) = serde_json_core::from_slice::<RecordWire<'_>>(&plain[..payload_len])
        .map_err(|_| AuthError::BadRecord)?;
    let (Some(rec_dsn), Some(rec_ver), Some(key_hex), Some(sign_hex)) =
        (record.dsn, record.ver, record.key, record.sign)
    else {
        return Err(AuthError::BadRecord);
    };
    if key_hex.len() != LAN_KEY_LEN * 2 || sign_hex.len() != DIGEST_LEN * 2 {
        return Err(AuthError::BadRecord);
    }

    let mut key = [0u8; LAN_KEY_LEN];
    let mut expected_digest = [0u8; DIGEST_LEN];
    if hex::decode_to_slice(key_hex, &mut key).is_err()
        || hex::decode_to_slice(sign_hex, &mut expected_digest).is_err()
    {
        key.zeroize();
        return Err(AuthError::BadRecord);
    }

    // Gate 5: the header must be bound to this exact device.
    if rec_dsn != dsn {
        key.zeroize();
        expected_digest.zeroize();
        return Err(AuthError::DsnMismatch);
    }

    let mut version = String::new();
    if version.push_str(rec_ver).is_err() {
        key.zeroize();
        expected_digest.zeroize();
        return Err(AuthError::BadRecord);
    }

    Ok(LanHeader {
        version,
        key,
        expected_digest,
    })
}
