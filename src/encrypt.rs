//! Per-direction cipher and MAC state: deriving the six RFC4253 §7.2 keys
//! from a completed key exchange, and encrypting/decrypting packets once
//! `NEWKEYS` has taken effect. Built on `aes`/`ctr`/`hmac` plus the
//! hand-rolled [`crate::chapoly`] AEAD construction.

use core::fmt;
use core::num::Wrapping;

use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::chapoly::{self, ChaPolyKey};
use crate::error::{Error, Result, TrapBug};
use crate::kex::{Algos, KexOutput, SessId};
use crate::sshnames::*;

type Aes256Ctr = Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    ChaPoly,
    Aes256Ctr,
}

impl Cipher {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_CHAPOLY => Ok(Cipher::ChaPoly),
            SSH_NAME_AES256_CTR => Ok(Cipher::Aes256Ctr),
            _ => Err(Error::bug()),
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Cipher::ChaPoly => chapoly::KEY_LEN,
            Cipher::Aes256Ctr => 32,
        }
    }

    pub fn iv_len(&self) -> usize {
        match self {
            // The chapoly construction derives its nonce from the packet
            // sequence number, no separate IV.
            Cipher::ChaPoly => 0,
            Cipher::Aes256Ctr => 16,
        }
    }

    pub fn mac_len(&self) -> usize {
        match self {
            Cipher::ChaPoly => chapoly::TAG_LEN,
            Cipher::Aes256Ctr => 32, // filled in by the negotiated Integ
        }
    }

    /// `Some` for AEAD ciphers that carry their own integrity check and so
    /// skip MAC algorithm negotiation entirely (RFC4253 doesn't model
    /// AEAD, so this is the same trick OpenSSH uses).
    pub fn integ(&self) -> Option<Integ> {
        match self {
            Cipher::ChaPoly => Some(Integ::ChaPoly),
            Cipher::Aes256Ctr => None,
        }
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Cipher::ChaPoly => SSH_NAME_CHAPOLY,
            Cipher::Aes256Ctr => SSH_NAME_AES256_CTR,
        };
        f.write_str(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integ {
    /// Built into the AEAD cipher; no separate key.
    ChaPoly,
    HmacSha256,
}

impl Integ {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_HMAC_SHA256 => Ok(Integ::HmacSha256),
            _ => Err(Error::bug()),
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Integ::ChaPoly => 0,
            Integ::HmacSha256 => 32,
        }
    }

    pub fn mac_len(&self) -> usize {
        match self {
            Integ::ChaPoly => chapoly::TAG_LEN,
            Integ::HmacSha256 => 32,
        }
    }
}

impl fmt::Display for Integ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Integ::ChaPoly => "(built into cipher)",
            Integ::HmacSha256 => SSH_NAME_HMAC_SHA256,
        };
        f.write_str(n)
    }
}

/// A derived MAC key, or nothing for an AEAD cipher that doesn't need one.
pub enum IntegKey {
    None,
    HmacSha256([u8; 32]),
}

impl Drop for IntegKey {
    fn drop(&mut self) {
        if let IntegKey::HmacSha256(k) = self {
            k.zeroize();
        }
    }
}

/// One direction's cipher state: the key material plus any running stream
/// position (AES-CTR keeps counting across the whole connection; the
/// chapoly construction instead derives a fresh nonce per packet from the
/// sequence number and carries no running state).
pub enum DirCipher {
    ChaPoly(ChaPolyKey),
    Aes256Ctr(Box<Aes256Ctr>),
}

pub struct Keys {
    pub enc: DirCipher,
    pub dec: DirCipher,
    pub integ_enc: IntegKey,
    pub integ_dec: IntegKey,
}

impl Keys {
    /// Derives transmit/receive keys for both directions from a completed
    /// key exchange's output, per RFC4253 §7.2's six lettered keys.
    pub fn derive(output: &KexOutput, sess_id: &SessId, algos: &Algos) -> Result<Self> {
        let (cipher_tx, cipher_rx, integ_tx, integ_rx) = if algos.is_client {
            (algos.cipher_enc, algos.cipher_dec, algos.integ_enc, algos.integ_dec)
        } else {
            (algos.cipher_dec, algos.cipher_enc, algos.integ_dec, algos.integ_enc)
        };

        // Letters are assigned by wire role (client-to-server / server-to-
        // client), independent of which side we're computing for.
        let (iv_tx_letter, iv_rx_letter, key_tx_letter, key_rx_letter, mac_tx_letter, mac_rx_letter) =
            if algos.is_client {
                ('A', 'B', 'C', 'D', 'E', 'F')
            } else {
                ('B', 'A', 'D', 'C', 'F', 'E')
            };

        let mut iv_buf = [0u8; 64];
        let iv_tx = output.compute_key(iv_tx_letter, cipher_tx.iv_len(), &mut iv_buf, sess_id)?;
        let mut key_buf = [0u8; 64];
        let key_tx_bytes = output.compute_key(key_tx_letter, cipher_tx.key_len(), &mut key_buf, sess_id)?;
        let enc = build_dir_cipher(cipher_tx, key_tx_bytes, iv_tx)?;

        let mut iv_buf2 = [0u8; 64];
        let iv_rx = output.compute_key(iv_rx_letter, cipher_rx.iv_len(), &mut iv_buf2, sess_id)?;
        let mut key_buf2 = [0u8; 64];
        let key_rx_bytes = output.compute_key(key_rx_letter, cipher_rx.key_len(), &mut key_buf2, sess_id)?;
        let dec = build_dir_cipher(cipher_rx, key_rx_bytes, iv_rx)?;

        let mut mac_buf = [0u8; 64];
        let integ_enc = build_integ_key(integ_tx, mac_tx_letter, &mut mac_buf, output, sess_id)?;
        let mut mac_buf2 = [0u8; 64];
        let integ_dec = build_integ_key(integ_rx, mac_rx_letter, &mut mac_buf2, output, sess_id)?;

        Ok(Keys { enc, dec, integ_enc, integ_dec })
    }
}

fn build_dir_cipher(cipher: Cipher, key: &[u8], iv: &[u8]) -> Result<DirCipher> {
    match cipher {
        Cipher::ChaPoly => {
            let key: [u8; chapoly::KEY_LEN] = key.try_into().trap()?;
            Ok(DirCipher::ChaPoly(ChaPolyKey::new(&key)))
        }
        Cipher::Aes256Ctr => {
            let c = Aes256Ctr::new(key.into(), iv.into());
            Ok(DirCipher::Aes256Ctr(Box::new(c)))
        }
    }
}

fn build_integ_key(
    integ: Integ,
    letter: char,
    buf: &mut [u8; 64],
    output: &KexOutput,
    sess_id: &SessId,
) -> Result<IntegKey> {
    match integ {
        Integ::ChaPoly => Ok(IntegKey::None),
        Integ::HmacSha256 => {
            let k = output.compute_key(letter, integ.key_len(), buf, sess_id)?;
            let k: [u8; 32] = k.try_into().trap()?;
            Ok(IntegKey::HmacSha256(k))
        }
    }
}

/// Running per-direction packet sequence numbers and the active cipher
/// material, swapped wholesale on every `NEWKEYS`/rekey.
pub struct KeyState {
    keys: Option<Keys>,
    seq_encrypt: Wrapping<u32>,
    seq_decrypt: Wrapping<u32>,
}

impl KeyState {
    pub fn new_cleartext() -> Self {
        KeyState { keys: None, seq_encrypt: Wrapping(0), seq_decrypt: Wrapping(0) }
    }

    pub fn rekey(&mut self, keys: Keys) {
        self.keys = Some(keys);
        // Sequence numbers are NOT reset on a normal rekey (RFC4253 §7);
        // crate::config::Config::strict_kex governs the one case where
        // they are (the first key exchange of the connection).
    }

    pub fn reset_seqs(&mut self) {
        self.seq_encrypt = Wrapping(0);
        self.seq_decrypt = Wrapping(0);
    }

    pub fn seq_encrypt(&self) -> u32 {
        self.seq_encrypt.0
    }

    pub fn seq_decrypt(&self) -> u32 {
        self.seq_decrypt.0
    }

    pub fn mac_len(&self) -> usize {
        match &self.keys {
            None => 0,
            Some(k) => match &k.integ_dec {
                IntegKey::None => chapoly::TAG_LEN,
                IntegKey::HmacSha256(_) => 32,
            },
        }
    }

    pub fn is_aead(&self) -> bool {
        matches!(self.keys.as_ref().map(|k| &k.enc), Some(DirCipher::ChaPoly(_)) | None)
    }

    /// Decrypts the 4-byte packet length field in place (using whatever
    /// running cipher state the receive direction has) and returns its
    /// plaintext value. For a cleartext connection this is a no-op.
    pub fn decrypt_len(&mut self, length: &mut [u8; 4]) -> Result<u32> {
        if let Some(keys) = &mut self.keys {
            match &mut keys.dec {
                DirCipher::ChaPoly(k) => k.decrypt_length(self.seq_decrypt.0, length),
                DirCipher::Aes256Ctr(c) => c.apply_keystream(length),
            }
        }
        Ok(u32::from_be_bytes(*length))
    }

    /// Decrypts the remainder of a packet (everything after the length
    /// field) in place and verifies its MAC/tag. `length` must be the
    /// already-decrypted plaintext length bytes.
    pub fn decrypt(&mut self, length: &[u8; 4], rest: &mut [u8], tag: &[u8]) -> Result<()> {
        let Some(keys) = &mut self.keys else {
            if !tag.is_empty() {
                return Err(Error::bug());
            }
            return Ok(());
        };
        match (&mut keys.dec, &keys.integ_dec) {
            (DirCipher::ChaPoly(k), _) => {
                let tag: [u8; chapoly::TAG_LEN] = tag.try_into().map_err(|_| Error::BadDecrypt)?;
                k.decrypt(self.seq_decrypt.0, length, rest, &tag)?;
            }
            (DirCipher::Aes256Ctr(c), IntegKey::HmacSha256(mac_key)) => {
                let mut mac = HmacSha256::new_from_slice(mac_key).trap()?;
                mac.update(&self.seq_decrypt.0.to_be_bytes());
                mac.update(length);
                c.apply_keystream(rest);
                mac.update(rest);
                mac.verify_slice(tag).map_err(|_| Error::BadDecrypt)?;
            }
            (DirCipher::Aes256Ctr(_), IntegKey::None) => return Err(Error::bug()),
        }
        self.seq_decrypt += Wrapping(1);
        Ok(())
    }

    /// Encrypts a full plaintext packet (`length` is the 4-byte length
    /// prefix, `rest` is padding-length byte + payload + padding) in place
    /// and returns the MAC/tag to append after it.
    pub fn encrypt(&mut self, length: &mut [u8; 4], rest: &mut [u8]) -> Result<Vec<u8>> {
        let Some(keys) = &mut self.keys else {
            self.seq_encrypt += Wrapping(1);
            return Ok(Vec::new());
        };
        let tag = match (&mut keys.enc, &keys.integ_enc) {
            (DirCipher::ChaPoly(k), _) => {
                k.encrypt_length(self.seq_encrypt.0, length);
                k.encrypt(self.seq_encrypt.0, length, rest).to_vec()
            }
            (DirCipher::Aes256Ctr(c), IntegKey::HmacSha256(mac_key)) => {
                let mut mac = HmacSha256::new_from_slice(mac_key).trap()?;
                mac.update(&self.seq_encrypt.0.to_be_bytes());
                mac.update(length);
                mac.update(rest);
                let tag = mac.finalize().into_bytes().to_vec();
                c.apply_keystream(length);
                c.apply_keystream(rest);
                tag
            }
            (DirCipher::Aes256Ctr(_), IntegKey::None) => return Err(Error::bug()),
        };
        self.seq_encrypt += Wrapping(1);
        Ok(tag)
    }

    /// Cipher block size the padding calculation must round up to; 8
    /// before any cipher is active, matching RFC4253 §6.
    pub fn block_size_encrypt(&self) -> usize {
        match self.keys.as_ref().map(|k| &k.enc) {
            None => 8,
            Some(DirCipher::ChaPoly(_)) => 8,
            Some(DirCipher::Aes256Ctr(_)) => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleartext_roundtrip() {
        let mut ks = KeyState::new_cleartext();
        let mut length = 5u32.to_be_bytes();
        let mut rest = b"abcde".to_vec();
        let tag = ks.encrypt(&mut length, &mut rest).unwrap();
        assert!(tag.is_empty());

        let mut ks2 = KeyState::new_cleartext();
        let mut len2 = length;
        let l = ks2.decrypt_len(&mut len2).unwrap();
        assert_eq!(l, 5);
        ks2.decrypt(&len2, &mut rest, &tag).unwrap();
        assert_eq!(rest, b"abcde");
    }
}
