//! Reference implementations of the `otalink-engine` crypto
//! capabilities, backed by the RustCrypto stack: AES-128-CBC block
//! decryption, SHA-256 image digests, and RSA signed-header
//! verification with plaintext recovery.
//!
//! The engine itself never depends on these; embedded deployments are
//! expected to wire hardware-accelerated equivalents behind the same
//! traits.

pub mod cbc;
pub mod digest;
pub mod verify;

pub use cbc::AesCbcDecryptor;
pub use digest::Sha256Digest;
pub use verify::RsaVerifier;
