//! Integration tests for the streaming decrypt/verify pipeline, run
//! against the real AES-CBC and SHA-256 implementations.

mod common;

use sha2::{Digest, Sha256};

use common::{BLOCK, encrypt_image, encrypt_padded};
use otalink_crypto::{AesCbcDecryptor, Sha256Digest};
use otalink_engine::TransferError;
use otalink_engine::auth::LanHeader;
use otalink_engine::pipeline::CryptoSession;

const DSN: &str = "OL98-0042-TEST";
const KEY: [u8; 16] = *b"sixteen byte key";

type Session = CryptoSession<AesCbcDecryptor, Sha256Digest>;

fn session_for(ciphertext: &[u8]) -> Session {
    let header = LanHeader {
        version: "1.0".try_into().unwrap(),
        key: KEY,
        expected_digest: Sha256::digest(ciphertext_plain(ciphertext)).into(),
    };
    CryptoSession::create(&header, DSN, ciphertext.len() as u32)
}

/// Decrypt a whole ciphertext out-of-band to get the padded plaintext
/// the signed digest covers.
fn ciphertext_plain(ciphertext: &[u8]) -> Vec<u8> {
    use aes::Aes128;
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockDecrypt, KeyInit};

    let cipher = Aes128::new(GenericArray::from_slice(&KEY));
    let mut out = ciphertext.to_vec();
    let mut chain = common::dsn_iv(DSN);
    for block in out.chunks_exact_mut(BLOCK) {
        let saved: [u8; BLOCK] = block.try_into().unwrap();
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, c) in block.iter_mut().zip(chain.iter()) {
            *b ^= c;
        }
        chain = saved;
    }
    out
}

fn sample_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

// -----------------------------------------------------------------------------
// Test 1: Chunk-boundary independence
// -----------------------------------------------------------------------------

#[test]
fn plaintext_is_independent_of_chunk_splits() {
    let plain = sample_image(1000);
    let ciphertext = encrypt_image(&plain, &KEY, DSN);

    // One pass in a single feed.
    let mut whole = session_for(&ciphertext);
    let single = whole.feed(&ciphertext).unwrap().to_vec();
    assert_eq!(single, plain);
    assert!(whole.verified());

    // Same bytes over awkward split sizes, including sub-block ones.
    let mut split = session_for(&ciphertext);
    let mut out = Vec::new();
    let mut offset = 0;
    for len in [7usize, 13, 1024, 3].iter().cycle() {
        if offset >= ciphertext.len() {
            break;
        }
        let end = (offset + len).min(ciphertext.len());
        out.extend_from_slice(split.feed(&ciphertext[offset..end]).unwrap());
        offset = end;
    }
    assert_eq!(out, plain);
    assert!(split.verified());
    assert_eq!(split.padding_trim(), (BLOCK - 1000 % BLOCK) as u32);
}

#[test]
fn sub_block_feeds_return_empty_until_a_block_completes() {
    let plain = sample_image(100);
    let ciphertext = encrypt_image(&plain, &KEY, DSN);

    let mut session = session_for(&ciphertext);
    assert!(session.feed(&ciphertext[..7]).unwrap().is_empty());
    assert!(session.feed(&ciphertext[7..15]).unwrap().is_empty());
    // 17 bytes seen; one whole block comes out.
    let first = session.feed(&ciphertext[15..17]).unwrap().to_vec();
    assert_eq!(first, plain[..BLOCK]);
    assert!(!session.verified());
}

// -----------------------------------------------------------------------------
// Test 2: Padding validation
// -----------------------------------------------------------------------------

#[test]
fn wrong_filler_bytes_are_rejected() {
    // Last byte claims 5 bytes of padding but the filler is not 0x05.
    let mut padded = sample_image(2 * BLOCK - 5);
    padded.extend_from_slice(&[1, 2, 3, 4, 5]);
    let ciphertext = encrypt_padded(&padded, &KEY, DSN);

    let mut session = session_for(&ciphertext);
    let err = session.feed(&ciphertext).unwrap_err();
    assert_eq!(err, TransferError::BadPadding);
}

#[test]
fn zero_padding_byte_is_rejected() {
    let mut padded = sample_image(BLOCK - 1);
    padded.push(0);
    let ciphertext = encrypt_padded(&padded, &KEY, DSN);

    let mut session = session_for(&ciphertext);
    assert_eq!(session.feed(&ciphertext).unwrap_err(), TransferError::BadPadding);
}

#[test]
fn oversized_padding_byte_is_rejected() {
    let mut padded = sample_image(BLOCK - 1);
    padded.push(17);
    let ciphertext = encrypt_padded(&padded, &KEY, DSN);

    let mut session = session_for(&ciphertext);
    assert_eq!(session.feed(&ciphertext).unwrap_err(), TransferError::BadPadding);
}

#[test]
fn full_block_of_padding_is_accepted() {
    // A plaintext that is already block-aligned gains one full padding
    // block.
    let plain = sample_image(2 * BLOCK);
    let ciphertext = encrypt_image(&plain, &KEY, DSN);
    assert_eq!(ciphertext.len(), 3 * BLOCK);

    let mut session = session_for(&ciphertext);
    let out = session.feed(&ciphertext).unwrap().to_vec();
    assert_eq!(out, plain);
    assert_eq!(session.padding_trim(), BLOCK as u32);
    assert!(session.verified());
}

// -----------------------------------------------------------------------------
// Test 3: Digest verification
// -----------------------------------------------------------------------------

#[test]
fn digest_mismatch_is_image_corrupt() {
    let plain = sample_image(200);
    let ciphertext = encrypt_image(&plain, &KEY, DSN);

    let header = LanHeader {
        version: "1.0".try_into().unwrap(),
        key: KEY,
        expected_digest: [0xEE; 32],
    };
    let mut session: Session = CryptoSession::create(&header, DSN, ciphertext.len() as u32);
    let err = session.feed(&ciphertext).unwrap_err();
    assert_eq!(err, TransferError::ImageCorrupt);
    assert!(!session.verified());
}

#[test]
fn not_verified_until_all_bytes_seen() {
    let plain = sample_image(200);
    let ciphertext = encrypt_image(&plain, &KEY, DSN);

    let mut session = session_for(&ciphertext);
    session.feed(&ciphertext[..BLOCK]).unwrap();
    assert!(!session.verified());
    session.feed(&ciphertext[BLOCK..]).unwrap();
    assert!(session.verified());
}

// -----------------------------------------------------------------------------
// Test 4: IV binding to the device serial
// -----------------------------------------------------------------------------

#[test]
fn wrong_device_serial_garbles_the_stream() {
    let plain = sample_image(64);
    let ciphertext = encrypt_image(&plain, &KEY, DSN);

    let header = LanHeader {
        version: "1.0".try_into().unwrap(),
        key: KEY,
        expected_digest: Sha256::digest(ciphertext_plain(&ciphertext)).into(),
    };
    let mut session: Session =
        CryptoSession::create(&header, "OL98-9999-OTHER", ciphertext.len() as u32);

    // A wrong IV garbles the first block. That surfaces as either a
    // padding or digest failure at end-of-image, never as success.
    let first = session.feed(&ciphertext[..BLOCK]).unwrap().to_vec();
    assert_ne!(first, plain[..BLOCK]);
    assert!(session.feed(&ciphertext[BLOCK..]).is_err());
}
