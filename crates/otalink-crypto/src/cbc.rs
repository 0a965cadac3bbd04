//! AES-128-CBC block decryption with chaining state carried across
//! calls, so one context can decrypt a whole image that arrives in
//! arbitrarily sized pieces.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use zeroize::Zeroize;

use otalink_engine::ports::BlockDecryptor;

const BLOCK: usize = 16;

/// One long-lived AES-128-CBC decryption context.
pub struct AesCbcDecryptor {
    cipher: Aes128,
    /// Previous ciphertext block (initially the IV).
    chain: [u8; BLOCK],
}

impl BlockDecryptor for AesCbcDecryptor {
    /// `key` and `iv` must each carry at least 16 bytes; only the
    /// first 16 are used.
    fn init(key: &[u8], iv: &[u8]) -> Self {
        let mut k = [0u8; BLOCK];
        let mut chain = [0u8; BLOCK];
        for (dst, src) in k.iter_mut().zip(key) {
            *dst = *src;
        }
        for (dst, src) in chain.iter_mut().zip(iv) {
            *dst = *src;
        }
        let cipher = Aes128::new(GenericArray::from_slice(&k));
        k.zeroize();
        Self { cipher, chain }
    }

    fn block_size(&self) -> usize {
        BLOCK
    }

    fn decrypt_blocks(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK, 0);
        for block in data.chunks_exact_mut(BLOCK) {
            let mut ct = [0u8; BLOCK];
            ct.copy_from_slice(block);

            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(block));
            for (b, c) in block.iter_mut().zip(self.chain.iter()) {
                *b ^= c;
            }
            self.chain = ct;
        }
    }
}

impl Drop for AesCbcDecryptor {
    fn drop(&mut self) {
        // The Aes128 key schedule wipes itself on drop (`zeroize`
        // feature); only the chaining state is ours to clear.
        self.chain.zeroize();
    }
}
