// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The shared blob pipeline: what happens between a batch buffer and the
//! opaque document that travels on the carrier.

use std::fmt;
use tungram_crypto::{gzip, open, seal, TunnelKey};

/// Seals and opens carrier blobs. Compression is a static, out-of-band
/// agreement: both peers must configure the same value.
#[derive(Clone)]
pub struct BlobCodec {
    key: TunnelKey,
    compression: bool,
}

#[derive(Debug)]
pub enum BlobError {
    /// The blob did not decrypt (bad length or padding).
    Crypto(tungram_crypto::Error),
    /// The decrypted payload was not a gzip stream.
    Decompress,
}

impl std::error::Error for BlobError {}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::Crypto(err) => write!(f, "blob did not open: {err}"),
            BlobError::Decompress => write!(f, "blob did not decompress"),
        }
    }
}

impl BlobCodec {
    pub fn new(key: TunnelKey, compression: bool) -> Self {
        Self { key, compression }
    }

    /// Batch buffer to carrier blob.
    pub fn seal(&self, batch: &[u8]) -> Vec<u8> {
        if self.compression {
            seal(&self.key, &gzip::compress(batch))
        } else {
            seal(&self.key, batch)
        }
    }

    /// Carrier blob back to batch buffer. A failure here drops exactly this
    /// blob; the session is unaffected.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, BlobError> {
        let plain = open(&self.key, blob).map_err(BlobError::Crypto)?;
        if self.compression {
            gzip::decompress(&plain).map_err(|_| BlobError::Decompress)
        } else {
            Ok(plain)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tungram_wire::batch;

    fn key() -> TunnelKey {
        TunnelKey::from_bytes(b"U&U?OglmE4P;0.32_Ktliw>uP]%PL:&d").unwrap()
    }

    fn sample_batch() -> Vec<u8> {
        let mut buffer = Vec::new();
        batch::push_record(&mut buffer, &[0x45; 60]);
        batch::push_record(&mut buffer, &[0x46; 1400]);
        buffer
    }

    #[test]
    fn round_trip_without_compression() {
        let codec = BlobCodec::new(key(), false);
        let blob = codec.seal(&sample_batch());
        assert_eq!(codec.open(&blob).unwrap(), sample_batch());
    }

    #[test]
    fn round_trip_with_compression() {
        let codec = BlobCodec::new(key(), true);
        let blob = codec.seal(&sample_batch());
        assert!(blob.len() < sample_batch().len());
        assert_eq!(codec.open(&blob).unwrap(), sample_batch());
    }

    #[test]
    fn compressing_sender_against_plain_receiver_yields_no_records() {
        let sender = BlobCodec::new(key(), true);
        let receiver = BlobCodec::new(key(), false);

        // The receiver "successfully" opens the blob but sees a gzip stream
        // where a batch should be; record parsing must come up empty rather
        // than crash.
        let opened = receiver.open(&sender.seal(&sample_batch())).unwrap();
        assert_eq!(batch::records(&opened).count(), 0);
    }

    #[test]
    fn plain_sender_against_compressing_receiver_is_dropped() {
        let sender = BlobCodec::new(key(), false);
        let receiver = BlobCodec::new(key(), true);
        assert!(matches!(
            receiver.open(&sender.seal(&sample_batch())),
            Err(BlobError::Decompress)
        ));
    }

    #[test]
    fn tampered_blob_is_dropped() {
        let codec = BlobCodec::new(key(), false);
        let mut blob = codec.seal(&sample_batch());
        // Flip a bit in the next-to-last ciphertext block: the CBC chain
        // carries it into the final plaintext block and breaks the padding.
        let i = blob.len() - 17;
        blob[i] ^= 0x10;
        assert!(matches!(codec.open(&blob), Err(BlobError::Crypto(_))));
    }
}
