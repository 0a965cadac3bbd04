//! RSA signed-header verification with plaintext recovery.
//!
//! LAN update headers are RSA signatures over a short record; the
//! verifier applies the raw public-key operation and strips PKCS#1
//! v1.5 type-1 padding to recover the signed plaintext.

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};

use otalink_engine::ports::{HeaderVerifier, VerifyFailure};

/// Device public key wrapped for signed-header verification.
pub struct RsaVerifier {
    n: BigUint,
    e: BigUint,
    /// Modulus size in bytes; signatures must match it exactly.
    k: usize,
}

impl RsaVerifier {
    pub fn new(key: &RsaPublicKey) -> Self {
        Self::from_parts(key.n().clone(), key.e().clone())
    }

    /// Build from raw big-endian modulus bytes and a public exponent.
    pub fn from_components(modulus_be: &[u8], exponent: u32) -> Self {
        Self::from_parts(
            BigUint::from_bytes_be(modulus_be),
            BigUint::from(u64::from(exponent)),
        )
    }

    fn from_parts(n: BigUint, e: BigUint) -> Self {
        let k = (n.bits() + 7) / 8;
        Self { n, e, k }
    }
}

impl HeaderVerifier for RsaVerifier {
    fn verify(&self, signature: &[u8], out: &mut [u8]) -> Result<usize, VerifyFailure> {
        if signature.len() != self.k {
            return Err(VerifyFailure);
        }
        let c = BigUint::from_bytes_be(signature);
        if c >= self.n {
            return Err(VerifyFailure);
        }

        let m = c.modpow(&self.e, &self.n);
        let raw = m.to_bytes_be();
        if raw.len() > self.k {
            return Err(VerifyFailure);
        }

        // Left-pad to the modulus size, then strip the EM = 0x00 0x01
        // PS(0xFF..) 0x00 payload framing.
        let mut em = vec![0u8; self.k];
        em[self.k - raw.len()..].copy_from_slice(&raw);
        let payload = unpad_type1(&em).ok_or(VerifyFailure)?;
        if payload.is_empty() || payload.len() > out.len() {
            return Err(VerifyFailure);
        }
        out[..payload.len()].copy_from_slice(payload);
        Ok(payload.len())
    }
}

/// Strip PKCS#1 v1.5 type-1 padding. The padding string must be at
/// least 8 bytes of 0xFF followed by a zero separator.
fn unpad_type1(em: &[u8]) -> Option<&[u8]> {
    if em.len() < 11 || em[0] != 0x00 || em[1] != 0x01 {
        return None;
    }
    let sep = em[2..].iter().position(|&b| b != 0xFF)? + 2;
    if sep < 10 || em[sep] != 0x00 {
        return None;
    }
    Some(&em[sep + 1..])
}
