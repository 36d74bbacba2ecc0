//! The `chacha20-poly1305@openssh.com` AEAD construction (OpenSSH
//! `PROTOCOL.chacha20poly1305`), hand-built from `chacha20` and `poly1305`.
//! Two independent ChaCha20 instances share one 64-byte key: the
//! first 32 bytes (`K1`) encrypt only the 4-byte packet length, the second
//! 32 bytes (`K2`) encrypt the payload and seed the Poly1305 key for each
//! packet.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20Legacy;
use poly1305::universal_hash::{KeyInit, UniversalHash};
use poly1305::Poly1305;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 64;
pub const TAG_LEN: usize = 16;
pub const LENGTH_LEN: usize = 4;

#[derive(ZeroizeOnDrop)]
pub struct ChaPolyKey {
    k1: [u8; 32],
    k2: [u8; 32],
}

impl ChaPolyKey {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let mut k1 = [0u8; 32];
        let mut k2 = [0u8; 32];
        k1.copy_from_slice(&key[..32]);
        k2.copy_from_slice(&key[32..]);
        ChaPolyKey { k1, k2 }
    }

    fn nonce(seq: u32) -> [u8; 8] {
        let mut n = [0u8; 8];
        n[4..].copy_from_slice(&seq.to_be_bytes());
        n
    }

    /// Encrypts just the 4-byte length field in place, using `K1` with the
    /// block counter at zero (the length is never more than one block).
    pub fn encrypt_length(&self, seq: u32, length: &mut [u8; LENGTH_LEN]) {
        let mut cipher = ChaCha20Legacy::new((&self.k1).into(), (&Self::nonce(seq)).into());
        cipher.apply_keystream(length);
    }

    pub fn decrypt_length(&self, seq: u32, length: &mut [u8; LENGTH_LEN]) {
        // ChaCha20 is its own inverse.
        self.encrypt_length(seq, length)
    }

    /// Encrypts `payload` in place with `K2` (block counter starting at 1;
    /// block 0's keystream instead seeds the Poly1305 key) and returns the
    /// tag computed over `length_ciphertext || payload_ciphertext`.
    pub fn encrypt(
        &self,
        seq: u32,
        length_ciphertext: &[u8; LENGTH_LEN],
        payload: &mut [u8],
    ) -> [u8; TAG_LEN] {
        let nonce = Self::nonce(seq);
        let mut cipher = ChaCha20Legacy::new((&self.k2).into(), (&nonce).into());
        let mut poly_key = [0u8; 32];
        cipher.apply_keystream(&mut poly_key);
        cipher.seek(64u64);
        cipher.apply_keystream(payload);

        let tag = Self::tag(&poly_key, length_ciphertext, payload);
        poly_key.zeroize();
        tag
    }

    /// Verifies the tag and decrypts `payload` in place. Returns
    /// `Error::BadDecrypt` without touching `payload` if the tag is wrong.
    pub fn decrypt(
        &self,
        seq: u32,
        length_ciphertext: &[u8; LENGTH_LEN],
        payload: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<()> {
        let nonce = Self::nonce(seq);
        let mut cipher = ChaCha20Legacy::new((&self.k2).into(), (&nonce).into());
        let mut poly_key = [0u8; 32];
        cipher.apply_keystream(&mut poly_key);

        let expect = Self::tag(&poly_key, length_ciphertext, payload);
        use subtle::ConstantTimeEq;
        if expect.ct_eq(tag).unwrap_u8() != 1 {
            poly_key.zeroize();
            return Err(Error::BadDecrypt);
        }

        cipher.seek(64u64);
        cipher.apply_keystream(payload);
        poly_key.zeroize();
        Ok(())
    }

    /// The tag is a plain Poly1305 MAC over the concatenation of the two
    /// ciphertexts, unlike the IETF AEAD construction: no padding and no
    /// trailing lengths block.
    fn tag(poly_key: &[u8; 32], length_ciphertext: &[u8; LENGTH_LEN], payload_ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let mut msg = Vec::with_capacity(LENGTH_LEN + payload_ciphertext.len());
        msg.extend_from_slice(length_ciphertext);
        msg.extend_from_slice(payload_ciphertext);
        let mac = Poly1305::new(poly_key.into());
        mac.compute_unpadded(&msg).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = ChaPolyKey::new(&[7u8; 64]);
        let mut length = 42u32.to_be_bytes();
        let orig_length = length;
        key.encrypt_length(0, &mut length);
        let mut payload = b"hello chapoly".to_vec();
        let tag = key.encrypt(0, &length, &mut payload);

        let mut dec_length = length;
        key.decrypt_length(0, &mut dec_length);
        assert_eq!(dec_length, orig_length);

        let mut dec_payload = payload.clone();
        key.decrypt(0, &length, &mut dec_payload, &tag).unwrap();
        assert_eq!(dec_payload, b"hello chapoly");
    }

    #[test]
    fn tampered_tag_rejected() {
        let key = ChaPolyKey::new(&[3u8; 64]);
        let length = 5u32.to_be_bytes();
        let mut payload = b"abcde".to_vec();
        let mut tag = key.encrypt(0, &length, &mut payload);
        tag[0] ^= 0xff;
        let mut dec_payload = payload.clone();
        assert!(key.decrypt(0, &length, &mut dec_payload, &tag).is_err());
    }
}
