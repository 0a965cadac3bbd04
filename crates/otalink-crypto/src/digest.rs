//! SHA-256 image digest.

use sha2::{Digest, Sha256};

use otalink_engine::ports::{DIGEST_LEN, ImageDigest};

/// Incremental SHA-256 context.
pub struct Sha256Digest(Sha256);

impl ImageDigest for Sha256Digest {
    fn init() -> Self {
        Self(Sha256::new())
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self) -> [u8; DIGEST_LEN] {
        self.0.finalize().into()
    }
}
