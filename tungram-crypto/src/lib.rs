// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Sealing of tunnel batches with GOST R 34.12-2015 ("Kuznyechik") in CBC
//! mode, and gzip compression of their contents.
//!
//! Everything that travels on the carrier is a *blob*:
//!
//! ```text
//! blob := iv[16] ‖ ciphertext
//! ciphertext := Kuznyechik-CBC(key, PKCS7(batch))
//! ```
//!
//! The key is static and pre-shared; a fresh random IV is drawn per blob.
//! Failures on the open side are recoverable by construction: a blob that
//! does not decrypt is dropped by the caller and the tunnel carries on.

pub mod cbc;
pub mod gzip;

use getrandom::getrandom;
use std::fmt;

/// Kuznyechik block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Kuznyechik key size in bytes.
pub const KEY_SIZE: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The blob is too small, or its ciphertext is not block-aligned.
    BadLength,

    /// The PKCS#7 padding was invalid after decryption.
    /// Almost always a wrong key or a truncated blob.
    BadPadding,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::BadLength => write!(f, "blob length is not a valid ciphertext"),
            Error::BadPadding => write!(f, "bad padding after decryption (wrong key?)"),
        }
    }
}

/// The pre-shared 256-bit tunnel key. Both peers must hold the same value.
#[derive(Clone)]
pub struct TunnelKey([u8; KEY_SIZE]);

impl TunnelKey {
    /// Builds a key from exactly [`KEY_SIZE`] bytes; anything else is `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut key = [0u8; KEY_SIZE];
        if bytes.len() != KEY_SIZE {
            return None;
        }
        key.copy_from_slice(bytes);
        Some(Self(key))
    }
}

impl fmt::Debug for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The key must never end up in logs.
        write!(f, "TunnelKey(..)")
    }
}

/// Seal a plaintext batch: PKCS#7-pad, encrypt under a fresh random IV and
/// return `iv ‖ ciphertext`.
pub fn seal(key: &TunnelKey, plain: &[u8]) -> Vec<u8> {
    let padding = BLOCK_SIZE - plain.len() % BLOCK_SIZE;

    let mut blob = Vec::with_capacity(BLOCK_SIZE + plain.len() + padding);
    blob.resize(BLOCK_SIZE, 0);
    getrandom(&mut blob[..BLOCK_SIZE]).expect("failed to generate a random iv");

    blob.extend_from_slice(plain);
    blob.resize(BLOCK_SIZE + plain.len() + padding, padding as u8);

    let (iv, body) = blob.split_at_mut(BLOCK_SIZE);
    let iv = <&[u8; BLOCK_SIZE]>::try_from(&*iv).unwrap();
    cbc::cbc_encrypt(body, &key.0, iv);
    blob
}

/// Open a sealed blob: split off the IV, decrypt, strip the PKCS#7 padding.
pub fn open(key: &TunnelKey, blob: &[u8]) -> Result<Vec<u8>, Error> {
    if blob.len() < BLOCK_SIZE {
        return Err(Error::BadLength);
    }

    let (iv, ciphertext) = blob.split_at(BLOCK_SIZE);
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::BadLength);
    }

    let iv = <&[u8; BLOCK_SIZE]>::try_from(iv).unwrap();
    let mut plain = ciphertext.to_vec();
    cbc::cbc_decrypt(&mut plain, &key.0, iv);

    let padding = *plain.last().unwrap() as usize;
    if padding == 0 || padding > BLOCK_SIZE || padding > plain.len() {
        return Err(Error::BadPadding);
    }
    if !plain[plain.len() - padding..].iter().all(|&b| b == padding as u8) {
        return Err(Error::BadPadding);
    }

    plain.truncate(plain.len() - padding);
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> TunnelKey {
        TunnelKey::from_bytes(b"U&U?OglmE4P;0.32_Ktliw>uP]%PL:&d").unwrap()
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(TunnelKey::from_bytes(b"short").is_none());
        assert!(TunnelKey::from_bytes(&[0u8; 33]).is_none());
        assert!(TunnelKey::from_bytes(&[0u8; 32]).is_some());
    }

    #[test]
    fn seal_open_round_trip() {
        let key = test_key();
        for len in [0usize, 1, 15, 16, 17, 31, 32, 1500] {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let blob = seal(&key, &plain);
            assert_eq!(blob.len() % BLOCK_SIZE, 0);
            assert_eq!(open(&key, &blob).unwrap(), plain);
        }
    }

    #[test]
    fn seal_of_single_record_batch_has_expected_shape() {
        // A 20-byte IPv4 header framed as one record is 22 bytes of
        // plaintext, which pads out to two cipher blocks.
        let key = test_key();
        let mut packet = vec![0x45, 0x00, 0x00, 0x1c];
        packet.resize(20, 0);

        let mut batch = vec![0x00, 0x14];
        batch.extend_from_slice(&packet);

        let blob = seal(&key, &batch);
        assert_eq!(blob.len(), 16 + 32);
        assert_eq!(open(&key, &blob).unwrap(), batch);
    }

    #[test]
    fn ivs_are_fresh_per_seal() {
        let key = test_key();
        let a = seal(&key, b"same plaintext");
        let b = seal(&key, b"same plaintext");
        assert_ne!(a[..BLOCK_SIZE], b[..BLOCK_SIZE]);
        assert_ne!(a[BLOCK_SIZE..], b[BLOCK_SIZE..]);
    }

    #[test]
    fn flipped_ciphertext_bit_is_bad_padding() {
        // 18 bytes pad out to two blocks with 14 bytes of 0x0e padding.
        // Flipping a bit in the last byte of the first ciphertext block
        // flips, through the CBC chain, the final padding byte of the
        // second plaintext block, so the pad check must reject the blob.
        let key = test_key();
        let mut blob = seal(&key, b"payload under test");
        assert_eq!(blob.len(), 16 + 32);
        blob[31] ^= 0x01;
        assert_eq!(open(&key, &blob), Err(Error::BadPadding));
    }

    #[test]
    fn wrong_key_never_recovers_the_plaintext() {
        let plain = b"payload under test".to_vec();
        let blob = seal(&test_key(), &plain);
        let other = TunnelKey::from_bytes(&[7u8; 32]).unwrap();
        assert_ne!(open(&other, &blob).ok(), Some(plain));
    }

    #[test]
    fn short_or_misaligned_blobs_are_bad_length() {
        let key = test_key();
        assert_eq!(open(&key, b""), Err(Error::BadLength));
        assert_eq!(open(&key, &[0u8; 15]), Err(Error::BadLength));
        assert_eq!(open(&key, &[0u8; 16]), Err(Error::BadLength));
        assert_eq!(open(&key, &[0u8; 17]), Err(Error::BadLength));
        assert_eq!(open(&key, &[0u8; 31]), Err(Error::BadLength));
    }
}
