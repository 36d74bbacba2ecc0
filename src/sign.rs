//! Host/client key signing and verification.
//!
//! Built on `ed25519-dalek` and the `rsa` crate rather than `ring`, matching
//! the rest of the cryptographic stack used elsewhere in this crate.

use core::mem::discriminant;

use ed25519_dalek::Signer as _;
use log::{trace, warn};
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use sha2::Sha256;

use crate::error::{Error, Result, TrapBug};
use crate::packets::{Ed25519PubKey, Ed25519Sig, PubKey, RSA256Sig, RSAPubKey, Signature};
use crate::sshnames::{SSH_NAME_ED25519, SSH_NAME_RSA_SHA256};
use crate::sshwire::BinString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigType {
    Ed25519,
    RSA256,
}

impl SigType {
    /// `name` must be a value already known to be valid (checked during
    /// negotiation).
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_ED25519 => Ok(SigType::Ed25519),
            SSH_NAME_RSA_SHA256 => Ok(SigType::RSA256),
            _ => Err(Error::bug()),
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            SigType::Ed25519 => SSH_NAME_ED25519,
            SigType::RSA256 => SSH_NAME_RSA_SHA256,
        }
    }

    pub fn verify(&self, pubkey: &PubKey, message: &[u8], sig: &Signature) -> Result<()> {
        let sig_type = sig.sig_type()?;
        // Caught again by SignatureMismatch below, but that error is meant
        // for a key/signature type mismatch rather than a negotiation bug.
        if discriminant(&sig_type) != discriminant(self) {
            warn!(
                "received {} signature, expected {}",
                sig.algorithm_name().unwrap_or("?"),
                self.algorithm_name()
            );
            return Err(Error::BadSignature);
        }

        match (self, pubkey, sig) {
            (SigType::Ed25519, PubKey::Ed25519(k), Signature::Ed25519(s)) => {
                let key_bytes: [u8; 32] = k.key.0.try_into().map_err(|_| Error::BadSignature)?;
                let verifying = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                    .map_err(|_| Error::BadSignature)?;
                let sig_bytes: [u8; 64] = s.sig.0.try_into().map_err(|_| Error::BadSignature)?;
                let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
                verifying.verify_strict(message, &sig).map_err(|_| Error::BadSignature)
            }
            (SigType::RSA256, PubKey::RSA(k), Signature::RSA256(s)) => {
                let n = rsa::BigUint::from_bytes_be(k.n.0);
                let e = rsa::BigUint::from_bytes_be(k.e.0);
                let key = rsa::RsaPublicKey::new(n, e).map_err(|_| Error::BadSignature)?;
                let verifying = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key);
                let sig = rsa::pkcs1v15::Signature::try_from(s.sig.0)
                    .map_err(|_| Error::BadSignature)?;
                verifying.verify(message, &sig).map_err(|_| Error::BadSignature)
            }
            _ => Err(Error::SignatureMismatch {
                key: pubkey.algorithm_name().unwrap_or("unknown"),
                sig: sig.algorithm_name().unwrap_or("unknown"),
            }),
        }
    }
}

/// An owned signature, produced by signing locally rather than parsed off
/// the wire. Converts into the borrowed [`Signature`] wire type for
/// encoding.
#[derive(Debug, Clone)]
pub enum OwnedSig {
    Ed25519([u8; 64]),
    RSA256(Vec<u8>),
}

impl<'a> From<&'a OwnedSig> for Signature<'a> {
    fn from(s: &'a OwnedSig) -> Self {
        match s {
            OwnedSig::Ed25519(b) => Signature::Ed25519(Ed25519Sig { sig: BinString(b) }),
            OwnedSig::RSA256(b) => Signature::RSA256(RSA256Sig { sig: BinString(b) }),
        }
    }
}

/// A host or client signing key. May hold the private key material
/// locally; a future `Behaviour` hook could instead delegate to an agent.
pub enum SignKey {
    Ed25519(ed25519_dalek::SigningKey),
    /// `n`/`e` are cached alongside the private key (rather than
    /// recomputed from it on each call) so [`SignKey::pubkey`] can hand
    /// back a [`PubKey`] borrowing straight from `self`.
    RSA256 { key: Box<rsa::RsaPrivateKey>, n: Vec<u8>, e: Vec<u8> },
}

impl SignKey {
    pub fn pubkey(&self) -> PubKey {
        match self {
            SignKey::Ed25519(k) => {
                PubKey::Ed25519(Ed25519PubKey { key: BinString(k.verifying_key().as_bytes()) })
            }
            SignKey::RSA256 { n, e, .. } => {
                PubKey::RSA(RSAPubKey { e: BinString(e), n: BinString(n) })
            }
        }
    }

    pub fn from_openssh(k: impl AsRef<[u8]>) -> Result<Self> {
        let k = ssh_key::PrivateKey::from_openssh(k).map_err(|e| {
            trace!("bad key: {e:?}");
            Error::msg("invalid OpenSSH private key")
        })?;
        (&k).try_into()
    }

    pub fn sign(&self, msg: &[u8]) -> Result<OwnedSig> {
        match self {
            SignKey::Ed25519(k) => {
                let sig = k.sign(msg);
                Ok(OwnedSig::Ed25519(sig.to_bytes()))
            }
            SignKey::RSA256 { key, .. } => {
                let signing = RsaSigningKey::<Sha256>::new((**key).clone());
                let sig = signing.sign(msg);
                Ok(OwnedSig::RSA256(sig.to_vec()))
            }
        }
    }
}

impl TryFrom<&ssh_key::PrivateKey> for SignKey {
    type Error = Error;
    fn try_from(k: &ssh_key::PrivateKey) -> Result<Self> {
        match k.key_data() {
            ssh_key::private::KeypairData::Ed25519(k) => {
                let signing = ed25519_dalek::SigningKey::from_bytes(&k.private.to_bytes());
                Ok(SignKey::Ed25519(signing))
            }
            ssh_key::private::KeypairData::Rsa(k) => {
                let n_bytes = k.public.n.as_bytes().to_vec();
                let e_bytes = k.public.e.as_bytes().to_vec();
                let n = rsa::BigUint::from_bytes_be(&n_bytes);
                let e = rsa::BigUint::from_bytes_be(&e_bytes);
                let d = rsa::BigUint::from_bytes_be(k.private.d.as_bytes());
                let p = rsa::BigUint::from_bytes_be(k.private.p.as_bytes());
                let q = rsa::BigUint::from_bytes_be(k.private.q.as_bytes());
                let key = rsa::RsaPrivateKey::from_components(n, e, d, vec![p, q]).trap()?;
                Ok(SignKey::RSA256 { key: Box::new(key), n: n_bytes, e: e_bytes })
            }
            _ => Err(Error::msg("unsupported private key format")),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::OsRng;

    pub(crate) fn make_ed25519_signkey() -> SignKey {
        let mut csprng = OsRng;
        SignKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    #[test]
    fn sign_verify_roundtrip() {
        let key = make_ed25519_signkey();
        let msg = b"hello transport";
        let owned = key.sign(msg).unwrap();
        let sig: Signature = (&owned).into();
        let pubkey = key.pubkey();
        SigType::Ed25519.verify(&pubkey, msg, &sig).unwrap();
    }
}
