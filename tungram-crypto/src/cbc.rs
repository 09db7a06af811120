// Copyright 2025 - developers of the `tungram` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use kuznyechik::cipher::generic_array::GenericArray;
use kuznyechik::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use kuznyechik::Kuznyechik;

/// Encrypt the input plaintext in-place using Kuznyechik in CBC mode.
///
/// Panics if the buffer is not padded to the 16-byte block size.
pub fn cbc_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 16]) {
    assert!(buffer.len() % 16 == 0);

    let key = GenericArray::from_slice(key);
    let cipher = Kuznyechik::new(key);

    let mut chain = *iv;
    for block in buffer.chunks_mut(16) {
        // block = block XOR chain
        block
            .iter_mut()
            .zip(chain.as_ref())
            .for_each(|(x, c)| *x ^= c);

        // block = encrypt(block)
        let block = GenericArray::from_mut_slice(block);
        cipher.encrypt_block(block);

        // the ciphertext becomes the next chaining value
        chain.copy_from_slice(block);
    }
}

/// Decrypt the input ciphertext in-place using Kuznyechik in CBC mode.
///
/// Panics if the buffer is not padded to the 16-byte block size.
pub fn cbc_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 16]) {
    assert!(buffer.len() % 16 == 0);

    let key = GenericArray::from_slice(key);
    let cipher = Kuznyechik::new(key);

    let mut chain = *iv;
    let mut ciphertext_block = [0u8; 16];
    for block in buffer.chunks_mut(16) {
        ciphertext_block.copy_from_slice(block);

        // block = decrypt(block)
        let block = GenericArray::from_mut_slice(block);
        cipher.decrypt_block(block);

        // block = block XOR chain
        block
            .iter_mut()
            .zip(chain.as_ref())
            .for_each(|(x, c)| *x ^= c);

        chain = ciphertext_block;
    }
}
