// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Stateless gzip compression of batch buffers.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Compress the input with gzip at the default level.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .expect("writing to an in-memory buffer cannot fail");
    encoder
        .finish()
        .expect("finishing an in-memory gzip stream cannot fail")
}

/// Decompress a gzip stream.
///
/// Corrupt input (or input that was never compressed, such as a batch from a
/// peer with compression disabled) is a recoverable error; the caller drops
/// the enclosing batch.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn round_trip_empty() {
        assert_eq!(decompress(&compress(b"")).unwrap(), b"");
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decompress(b"\x00\x14not a gzip stream").is_err());
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let compressed = compress(b"some payload that will be cut short");
        assert!(decompress(&compressed[..compressed.len() / 2]).is_err());
    }
}
