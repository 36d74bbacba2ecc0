//! Algorithm negotiation and key exchange: the `Kex` state machine walks
//! `Idle -> KexInit -> KexDH -> NewKeys -> Idle` once per handshake (and
//! again on every rekey), computing the RFC4253 §8 exchange hash and the
//! derived key material along the way. Synchronous throughout (the
//! `Behaviour` calls it makes don't need an async runtime); negotiates
//! curve25519, ECDH-P256, and diffie-hellman-group14-sha256.

use core::fmt;

use digest::Digest;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::Sha256;

use crate::encrypt::{Cipher, Integ, Keys};
use crate::error::{Error, Result, TrapBug};
use crate::ident;
use crate::namelist::{LocalNames, NameList};
use crate::packets::{self, Packet};
use crate::random;
use crate::sign::{SigType, SignKey};
use crate::sshnames::*;
use crate::sshwire::{hash_mpint, hash_ser_length, BinString, Blob};
use crate::traffic::TrafSend;

/// Output of `Sha256`, used directly as the persistent session identifier
/// (RFC4253 §7.2: "the session identifier ... is the exchange hash `H` of
/// the first key exchange").
pub type SessId = Vec<u8>;

const OPTIONS_KEX: &[&str] = &[
    SSH_NAME_CURVE25519,
    SSH_NAME_CURVE25519_LIBSSH,
    SSH_NAME_ECDH_NISTP256,
    SSH_NAME_DH_GROUP14_SHA256,
];

/// Kex method names that are markers, not real algorithms: if one of these
/// is what negotiation actually picked, there was no real match.
const MARKER_ONLY_KEXS: &[&str] = &[
    SSH_NAME_EXT_INFO_C,
    SSH_NAME_EXT_INFO_S,
    SSH_NAME_KEXGUESS2,
    SSH_NAME_STRICT_KEX_C,
    SSH_NAME_STRICT_KEX_S,
];

const OPTIONS_HOSTSIG: &[&str] = &[SSH_NAME_ED25519, SSH_NAME_RSA_SHA256];
const OPTIONS_CIPHER: &[&str] = &[SSH_NAME_CHAPOLY, SSH_NAME_AES256_CTR];
const OPTIONS_MAC: &[&str] = &[SSH_NAME_HMAC_SHA256];
const OPTIONS_COMP: &[&str] = &[SSH_NAME_NONE];

pub struct AlgoConfig {
    kexs: LocalNames,
    hostsig: LocalNames,
    ciphers: LocalNames,
    macs: LocalNames,
    comps: LocalNames,
    /// Whether we advertise (and honor) the `kex-strict-*-v00@openssh.com`
    /// sequence-number-reset extension, gated
    /// by [`crate::config::Config::strict_kex`].
    strict_kex: bool,
}

impl AlgoConfig {
    pub fn new(is_client: bool) -> Self {
        Self::new_with_strict_kex(is_client, cfg!(feature = "strict-kex"))
    }

    pub fn new_with_strict_kex(is_client: bool, strict_kex: bool) -> Self {
        let mut kexs: LocalNames = OPTIONS_KEX.try_into().expect("static list fits");
        if is_client {
            kexs.push(SSH_NAME_EXT_INFO_C).expect("static list fits");
        }
        kexs.push(SSH_NAME_KEXGUESS2).expect("static list fits");
        if strict_kex {
            let marker = if is_client { SSH_NAME_STRICT_KEX_C } else { SSH_NAME_STRICT_KEX_S };
            kexs.push(marker).expect("static list fits");
        }

        AlgoConfig {
            kexs,
            hostsig: OPTIONS_HOSTSIG.try_into().expect("static list fits"),
            ciphers: OPTIONS_CIPHER.try_into().expect("static list fits"),
            macs: OPTIONS_MAC.try_into().expect("static list fits"),
            comps: OPTIONS_COMP.try_into().expect("static list fits"),
            strict_kex,
        }
    }

    /// Builds a config from explicit preference lists (used by
    /// [`crate::config::Config::algo_config`]); the marker pseudo-algorithms
    /// (`ext-info-*`, `kexguess2@matt.ucc.asn.au`, `kex-strict-*`) are
    /// appended automatically and should not be included in `kexs`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_names(
        is_client: bool,
        mut kexs: LocalNames,
        hostsig: LocalNames,
        ciphers: LocalNames,
        macs: LocalNames,
        comps: LocalNames,
        strict_kex: bool,
    ) -> Self {
        if is_client {
            kexs.push(SSH_NAME_EXT_INFO_C).expect("fits");
        }
        kexs.push(SSH_NAME_KEXGUESS2).expect("fits");
        if strict_kex {
            let marker = if is_client { SSH_NAME_STRICT_KEX_C } else { SSH_NAME_STRICT_KEX_S };
            kexs.push(marker).expect("fits");
        }
        AlgoConfig { kexs, hostsig, ciphers, macs, comps, strict_kex }
    }

    pub fn default_kex() -> LocalNames {
        OPTIONS_KEX.try_into().expect("static list fits")
    }

    pub fn default_hostsig() -> LocalNames {
        OPTIONS_HOSTSIG.try_into().expect("static list fits")
    }

    pub fn default_ciphers() -> LocalNames {
        OPTIONS_CIPHER.try_into().expect("static list fits")
    }

    pub fn default_macs() -> LocalNames {
        OPTIONS_MAC.try_into().expect("static list fits")
    }

    pub fn default_comp() -> LocalNames {
        OPTIONS_COMP.try_into().expect("static list fits")
    }
}

type KexCookie = [u8; 16];

/// The transport's key exchange sub-state. Transitions: `Idle` on first
/// `send_kexinit`/`handle_kexinit` moves to `KexInit`; receiving the peer's
/// `KexInit` moves to `KexDH`; receiving `KexDHInit`/`KexDHReply` moves to
/// `NewKeys`; receiving the peer's `NewKeys` moves back to `Idle`.
#[derive(Debug)]
pub enum Kex {
    Idle,
    KexInit { our_cookie: KexCookie },
    KexDH { algos: Algos, kex_hash: KexHash },
    NewKeys { output: KexOutput, algos: Algos },
    /// Transient value left behind by `take()`; never observed outside a
    /// single method call.
    Taken,
}

impl Default for Kex {
    fn default() -> Self {
        Kex::Idle
    }
}

#[derive(Debug)]
pub struct KexHash {
    hash_ctx: Sha256,
    /// Whether `e`/`f` (the ephemeral exchange values) are mpint-encoded
    /// (diffie-hellman) or plain strings (curve25519, ECDH): RFC4253 §8
    /// vs RFC5656 §4.
    ef_as_mpint: bool,
}

impl KexHash {
    fn new(
        algos: &Algos,
        algo_conf: &AlgoConfig,
        our_cookie: &KexCookie,
        remote_version: &[u8],
        remote_kexinit: &Packet,
    ) -> Result<Self> {
        // RFC4253 §8: H = HASH(V_C || V_S || I_C || I_S || K_S || e || f || K)
        let mut kh = KexHash { hash_ctx: Sha256::new(), ef_as_mpint: algos.kex.hashes_ef_as_mpint() };
        let own_kexinit = Kex::make_kexinit(our_cookie, algo_conf);
        if algos.is_client {
            kh.hash_slice(ident::OUR_VERSION);
            kh.hash_slice(remote_version);
            hash_ser_length(&mut kh.hash_ctx, &own_kexinit)?;
            hash_ser_length(&mut kh.hash_ctx, remote_kexinit)?;
        } else {
            kh.hash_slice(remote_version);
            kh.hash_slice(ident::OUR_VERSION);
            hash_ser_length(&mut kh.hash_ctx, remote_kexinit)?;
            hash_ser_length(&mut kh.hash_ctx, &own_kexinit)?;
        }
        Ok(kh)
    }

    /// Fills in everything but `K`, which isn't known until the exchange
    /// value has been combined with our own secret.
    fn prefinish(&mut self, host_key: &packets::PubKey, e: &[u8], f: &[u8]) -> Result<()> {
        hash_ser_length(&mut self.hash_ctx, host_key)?;
        if self.ef_as_mpint {
            hash_mpint(&mut self.hash_ctx, e);
            hash_mpint(&mut self.hash_ctx, f);
        } else {
            self.hash_slice(e);
            self.hash_slice(f);
        }
        Ok(())
    }

    fn finish(mut self, k: &[u8]) -> SessId {
        hash_mpint(&mut self.hash_ctx, k);
        self.hash_ctx.finalize().to_vec()
    }

    fn hash_slice(&mut self, v: &[u8]) {
        self.hash_ctx.update((v.len() as u32).to_be_bytes());
        self.hash_ctx.update(v);
    }
}

/// Algorithms settled on for this handshake, kept around until `NEWKEYS`
/// takes them into use.
#[derive(Debug)]
pub struct Algos {
    pub kex: SharedSecret,
    pub hostsig: SigType,
    pub cipher_enc: Cipher,
    pub cipher_dec: Cipher,
    pub integ_enc: Integ,
    pub integ_dec: Integ,

    /// Set if the peer's guessed first-follows packet must be discarded
    /// (RFC4253 §7: the guess was wrong).
    pub discard_next: bool,
    pub is_client: bool,
    pub send_ext_info: bool,
    /// Both sides advertised `kex-strict-*-v00@openssh.com` in this
    /// KexInit exchange. Only meaningful for the very first key exchange
    /// of a session (OpenSSH's `kex-strict` is defined in terms of "the
    /// initial key exchange"); [`Kex::handle_newkeys`] only acts on it
    /// when no session id has been established yet.
    pub strict_kex: bool,
}

impl fmt::Display for Algos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (cc, cs, mc, ms) = if self.is_client {
            (&self.cipher_enc, &self.cipher_dec, &self.integ_enc, &self.integ_dec)
        } else {
            (&self.cipher_dec, &self.cipher_enc, &self.integ_dec, &self.integ_enc)
        };
        write!(
            f,
            "negotiated: kex={} hostkey={} cipher(c->s)={} cipher(s->c)={} mac(c->s)={} mac(s->c)={}",
            self.kex,
            self.hostsig.algorithm_name(),
            cc,
            cs,
            mc,
            ms
        )
    }
}

impl Kex {
    pub fn new() -> Self {
        Kex::Idle
    }

    fn take(&mut self) -> Self {
        debug_assert!(!matches!(self, Kex::Taken));
        core::mem::replace(self, Kex::Taken)
    }

    /// Sends our `KexInit`. Must be called from `Idle`.
    pub fn send_kexinit(&mut self, conf: &AlgoConfig, s: &mut TrafSend) -> Result<()> {
        if !matches!(self, Kex::Idle) {
            return Err(Error::bug());
        }
        let mut our_cookie = [0u8; 16];
        random::fill_random(&mut our_cookie)?;
        s.send(Kex::make_kexinit(&our_cookie, conf))?;
        *self = Kex::KexInit { our_cookie };
        Ok(())
    }

    /// `remote_version` is the peer's identification line (without the
    /// trailing CRLF), needed for the exchange hash. Taken as raw bytes
    /// rather than `&RemoteVersion` so the caller can copy it out of
    /// `Traffic` before borrowing the same `Traffic` mutably to build `s`.
    pub fn handle_kexinit(
        &mut self,
        remote_kexinit: packets::KexInit,
        is_client: bool,
        algo_conf: &AlgoConfig,
        remote_version: &[u8],
        s: &mut TrafSend,
    ) -> Result<()> {
        if let Kex::Idle = self {
            self.send_kexinit(algo_conf, s)?;
        }
        let our_cookie = if let Kex::KexInit { ref our_cookie } = self {
            *our_cookie
        } else {
            return Err(Error::PacketWrong);
        };

        let algos = Self::algo_negotiation(is_client, &remote_kexinit, algo_conf)?;
        log::debug!("{algos}");
        if is_client {
            let p = algos.kex.make_kexdhinit()?;
            s.send(p)?;
        }
        let remote_packet: Packet = remote_kexinit.into();
        let kex_hash = KexHash::new(&algos, algo_conf, &our_cookie, remote_version, &remote_packet)?;
        *self = Kex::KexDH { algos, kex_hash };
        Ok(())
    }

    fn make_kexinit<'a>(cookie: &'a KexCookie, conf: &'a AlgoConfig) -> Packet<'a> {
        packets::KexInit {
            cookie: *cookie,
            kex: (&conf.kexs).into(),
            hostsig: (&conf.hostsig).into(),
            cipher_c2s: (&conf.ciphers).into(),
            cipher_s2c: (&conf.ciphers).into(),
            mac_c2s: (&conf.macs).into(),
            mac_s2c: (&conf.macs).into(),
            comp_c2s: (&conf.comps).into(),
            comp_s2c: (&conf.comps).into(),
            lang_c2s: NameList::empty(),
            lang_s2c: NameList::empty(),
            first_follows: false,
            reserved: 0,
        }
        .into()
    }

    /// Server side: a `KexDHInit` arrived.
    pub fn handle_kexdhinit(
        &mut self,
        p: &packets::KexDHInit,
        s: &mut TrafSend,
        hostkeys: &[SignKey],
    ) -> Result<()> {
        if let Kex::KexDH { algos, .. } = self {
            if algos.is_client {
                return Err(Error::bug());
            }
            if algos.discard_next {
                algos.discard_next = false;
                return Ok(());
            }
        }
        if let Kex::KexDH { mut algos, kex_hash } = self.take() {
            let output = SharedSecret::handle_kexdhinit(&mut algos, kex_hash, p, s, hostkeys)?;
            *self = Kex::NewKeys { output, algos };
            s.send(packets::NewKeys {})?;
            Ok(())
        } else {
            Err(Error::PacketWrong)
        }
    }

    /// Client side: a `KexDHReply` arrived. `valid_hostkey` asks the host
    /// application to confirm the server's key (trust-on-first-use,
    /// known_hosts lookup, whatever policy it implements).
    pub fn handle_kexdhreply(
        &mut self,
        p: &packets::KexDHReply,
        s: &mut TrafSend,
        valid_hostkey: impl FnOnce(&packets::PubKey) -> bool,
    ) -> Result<()> {
        if let Kex::KexDH { algos, .. } = self {
            if !algos.is_client {
                return Err(Error::bug());
            }
            if algos.discard_next {
                algos.discard_next = false;
                return Ok(());
            }
        }
        if let Kex::KexDH { mut algos, kex_hash } = self.take() {
            let output = SharedSecret::handle_kexdhreply(&mut algos, kex_hash, p, valid_hostkey)?;
            *self = Kex::NewKeys { output, algos };
            s.send(packets::NewKeys {})?;
            Ok(())
        } else {
            Err(Error::PacketWrong)
        }
    }

    /// Whether RFC8308 `SSH_MSG_EXT_INFO` should be sent alongside our
    /// `NEWKEYS` (server only, and only when the client advertised
    /// `ext-info-c`). Valid once [`Kex::handle_kexdhinit`] has moved this
    /// handshake to `NewKeys`; `false` otherwise.
    pub fn send_ext_info(&self) -> bool {
        matches!(self, Kex::NewKeys { algos, .. } if algos.send_ext_info)
    }

    pub fn handle_newkeys(&mut self, sess_id: &mut Option<SessId>, s: &mut TrafSend) -> Result<()> {
        if let Kex::NewKeys { output, algos } = self.take() {
            let is_first_kex = sess_id.is_none();
            let sess_id = sess_id.get_or_insert_with(|| output.h.clone());
            let keys = Keys::derive(&output, sess_id, &algos)?;
            s.rekey(keys);
            if algos.strict_kex && is_first_kex {
                // kex-strict resets both sequence numbers to 0 at the
                // first NEWKEYS, closing the terrapin-style
                // sequence-number-injection gap. Only applies to the
                // initial handshake.
                s.reset_seqs();
            }
            *self = Kex::Idle;
            Ok(())
        } else {
            Err(Error::PacketWrong)
        }
    }

    fn algo_negotiation(is_client: bool, p: &packets::KexInit, conf: &AlgoConfig) -> Result<Algos> {
        let kexguess2 = p.kex.has_algo(SSH_NAME_KEXGUESS2)?;

        let kex_method =
            p.kex.first_match(is_client, &conf.kexs)?.ok_or(Error::AlgoNoMatch { algo: "kex" })?;
        if MARKER_ONLY_KEXS.contains(&kex_method) {
            return Err(Error::AlgoNoMatch { algo: "kex" });
        }
        let kex = SharedSecret::from_name(kex_method)?;
        let goodguess_kex =
            if kexguess2 { p.kex.first() == kex_method } else { p.kex.first() == conf.kexs.first() };

        let send_ext_info = if is_client { false } else { p.kex.has_algo(SSH_NAME_EXT_INFO_C)? };

        let peer_strict_marker = if is_client { SSH_NAME_STRICT_KEX_S } else { SSH_NAME_STRICT_KEX_C };
        let strict_kex = conf.strict_kex && p.kex.has_algo(peer_strict_marker)?;

        let hostsig_method = p
            .hostsig
            .first_match(is_client, &conf.hostsig)?
            .ok_or(Error::AlgoNoMatch { algo: "hostkey" })?;
        let hostsig = SigType::from_name(hostsig_method)?;
        let goodguess_hostkey = if kexguess2 {
            p.hostsig.first() == hostsig_method
        } else {
            p.hostsig.first() == conf.hostsig.first()
        };

        let c2s = (&p.cipher_c2s, &p.mac_c2s, &p.comp_c2s);
        let s2c = (&p.cipher_s2c, &p.mac_s2c, &p.comp_s2c);
        let ((cipher_tx, mac_tx, comp_tx), (cipher_rx, mac_rx, comp_rx)) =
            if is_client { (c2s, s2c) } else { (s2c, c2s) };

        let n = cipher_tx.first_match(is_client, &conf.ciphers)?.ok_or(Error::AlgoNoMatch { algo: "encryption" })?;
        let cipher_enc = Cipher::from_name(n)?;
        let n = cipher_rx.first_match(is_client, &conf.ciphers)?.ok_or(Error::AlgoNoMatch { algo: "encryption" })?;
        let cipher_dec = Cipher::from_name(n)?;

        let integ_enc = if let Some(integ) = cipher_enc.integ() {
            integ
        } else {
            let n = mac_tx.first_match(is_client, &conf.macs)?.ok_or(Error::AlgoNoMatch { algo: "mac" })?;
            Integ::from_name(n)?
        };
        let integ_dec = if let Some(integ) = cipher_dec.integ() {
            integ
        } else {
            let n = mac_rx.first_match(is_client, &conf.macs)?.ok_or(Error::AlgoNoMatch { algo: "mac" })?;
            Integ::from_name(n)?
        };

        comp_tx.first_match(is_client, &conf.comps)?.ok_or(Error::AlgoNoMatch { algo: "compression" })?;
        comp_rx.first_match(is_client, &conf.comps)?.ok_or(Error::AlgoNoMatch { algo: "compression" })?;

        let discard_next = p.first_follows && !(goodguess_kex && goodguess_hostkey);

        Ok(Algos {
            kex,
            hostsig,
            cipher_enc,
            cipher_dec,
            integ_enc,
            integ_dec,
            discard_next,
            is_client,
            send_ext_info,
            strict_kex,
        })
    }
}

/// The ephemeral key-agreement method in use for one handshake.
///
/// Each variant's ephemeral secret zeroizes itself on drop internally
/// (`x25519_dalek`/`p256`'s secret types both do); `KexDhGroup14`'s raw
/// `BigUint` exponent doesn't implement `Zeroize`, so this enum can't
/// derive it uniformly.
#[derive(Debug)]
pub enum SharedSecret {
    Curve25519(KexCurve25519),
    EcdhP256(KexEcdhP256),
    DhGroup14(KexDhGroup14),
}

impl fmt::Display for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            SharedSecret::Curve25519(_) => SSH_NAME_CURVE25519,
            SharedSecret::EcdhP256(_) => SSH_NAME_ECDH_NISTP256,
            SharedSecret::DhGroup14(_) => SSH_NAME_DH_GROUP14_SHA256,
        };
        f.write_str(n)
    }
}

impl SharedSecret {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            SSH_NAME_CURVE25519 | SSH_NAME_CURVE25519_LIBSSH => {
                Ok(SharedSecret::Curve25519(KexCurve25519::new()?))
            }
            SSH_NAME_ECDH_NISTP256 => Ok(SharedSecret::EcdhP256(KexEcdhP256::new()?)),
            SSH_NAME_DH_GROUP14_SHA256 => Ok(SharedSecret::DhGroup14(KexDhGroup14::new()?)),
            _ => Err(Error::bug()),
        }
    }

    /// curve25519/ECDH exchange values are hashed as opaque strings
    /// (RFC5656 §4); classic DH's are mpints (RFC4253 §8).
    fn hashes_ef_as_mpint(&self) -> bool {
        matches!(self, SharedSecret::DhGroup14(_))
    }

    fn make_kexdhinit(&self) -> Result<Packet> {
        let q_c = BinString(self.pubkey());
        Ok(packets::KexDHInit { q_c }.into())
    }

    fn handle_kexdhreply(
        algos: &mut Algos,
        mut kex_hash: KexHash,
        p: &packets::KexDHReply,
        valid_hostkey: impl FnOnce(&packets::PubKey) -> bool,
    ) -> Result<KexOutput> {
        kex_hash.prefinish(&p.k_s.0, algos.kex.pubkey(), p.q_s.0)?;
        let kex_out = match &mut algos.kex {
            SharedSecret::Curve25519(k) => k.secret(p.q_s.0, kex_hash)?,
            SharedSecret::EcdhP256(k) => k.secret(p.q_s.0, kex_hash)?,
            SharedSecret::DhGroup14(k) => k.secret(p.q_s.0, kex_hash)?,
        };

        let h = kex_out.h.as_slice();
        algos.hostsig.verify(&p.k_s.0, h, &p.sig.0)?;
        log::debug!("host key signature is valid");
        if valid_hostkey(&p.k_s.0) {
            Ok(kex_out)
        } else {
            Err(Error::BehaviourError { msg: "host key rejected" })
        }
    }

    fn handle_kexdhinit(
        algos: &mut Algos,
        mut kex_hash: KexHash,
        p: &packets::KexDHInit,
        s: &mut TrafSend,
        hostkeys: &[SignKey],
    ) -> Result<KexOutput> {
        let hostkey = hostkeys
            .iter()
            .find(|k| {
                packets::Signature::sig_name_for_pubkey(&k.pubkey())
                    .map(|n| n == algos.hostsig.algorithm_name())
                    .unwrap_or(false)
            })
            .trap()?;

        let kex_pub = algos.kex.pubkey().to_vec();
        kex_hash.prefinish(&hostkey.pubkey(), p.q_c.0, &kex_pub)?;
        let kex_out = match &mut algos.kex {
            SharedSecret::Curve25519(k) => k.secret(p.q_c.0, kex_hash)?,
            SharedSecret::EcdhP256(k) => k.secret(p.q_c.0, kex_hash)?,
            SharedSecret::DhGroup14(k) => k.secret(p.q_c.0, kex_hash)?,
        };

        Self::send_kexdhreply(&kex_out, &kex_pub, hostkey, s)?;
        Ok(kex_out)
    }

    fn send_kexdhreply(ko: &KexOutput, kex_pub: &[u8], hostkey: &SignKey, s: &mut TrafSend) -> Result<()> {
        let q_s = BinString(kex_pub);
        let k_s = Blob(hostkey.pubkey());
        let sig = hostkey.sign(ko.h.as_slice())?;
        let sig: packets::Signature = (&sig).into();
        let sig = Blob(sig);
        s.send(packets::KexDHReply { k_s, q_s, sig })
    }

    fn pubkey(&self) -> &[u8] {
        match self {
            SharedSecret::Curve25519(k) => k.pubkey(),
            SharedSecret::EcdhP256(k) => k.pubkey(),
            SharedSecret::DhGroup14(k) => k.pubkey(),
        }
    }
}

/// Holds `H` and a partially-hashed digest (`HASH(K || H`) so that
/// `compute_key` doesn't need to redo the expensive prefix work for each of
/// the six derived keys.
pub struct KexOutput {
    h: SessId,
    partial_hash: Sha256,
}

impl fmt::Debug for KexOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexOutput").finish_non_exhaustive()
    }
}

impl KexOutput {
    fn new(k: &[u8], kex_hash: KexHash) -> Self {
        let h = kex_hash.finish(k);
        let mut partial_hash = Sha256::new();
        hash_mpint(&mut partial_hash, k);
        partial_hash.update(&h);
        KexOutput { h, partial_hash }
    }

    #[cfg(test)]
    pub fn new_test(k: &[u8], h: &SessId) -> Self {
        let mut partial_hash = Sha256::new();
        hash_mpint(&mut partial_hash, k);
        partial_hash.update(h);
        KexOutput { h: h.clone(), partial_hash }
    }

    /// RFC4253 §7.2: `K1 = HASH(K || H || "A" || session_id)`, `K2 =
    /// HASH(K || H || K1)`, concatenated until there's `len` bytes.
    pub fn compute_key<'a>(&self, letter: char, len: usize, out: &'a mut [u8], sess_id: &SessId) -> Result<&'a [u8]> {
        if len > out.len() {
            return Err(Error::bug());
        }
        let hsz = <Sha256 as Digest>::output_size();
        let mut w = [0u8; 32];
        debug_assert!(2 * hsz >= len || len == 0);

        let l = len.min(hsz);
        let (k1, rest) = out.split_at_mut(l);

        let mut hash_ctx = self.partial_hash.clone();
        hash_ctx.update([letter as u8]);
        hash_ctx.update(sess_id.as_slice());
        w.copy_from_slice(&hash_ctx.finalize());
        k1.copy_from_slice(&w[..k1.len()]);

        if !rest.is_empty() {
            let k2_len = len - l;
            let k2 = &mut rest[..k2_len];
            let mut hash_ctx = self.partial_hash.clone();
            hash_ctx.update(&*k1);
            w.copy_from_slice(&hash_ctx.finalize());
            k2.copy_from_slice(&w[..k2.len()]);
        }
        Ok(&out[..len])
    }
}

pub struct KexCurve25519 {
    /// Zeroizes itself on drop.
    ours: Option<x25519_dalek::EphemeralSecret>,
    pubkey: [u8; 32],
}

impl fmt::Debug for KexCurve25519 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexCurve25519").field("ours", &self.ours.is_some()).finish()
    }
}

impl KexCurve25519 {
    fn new() -> Result<Self> {
        let ours = x25519_dalek::EphemeralSecret::random_from_rng(rand_core::OsRng);
        let pubkey = x25519_dalek::PublicKey::from(&ours);
        Ok(KexCurve25519 { ours: Some(ours), pubkey: pubkey.to_bytes() })
    }

    fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    fn secret(&mut self, theirs: &[u8], kex_hash: KexHash) -> Result<KexOutput> {
        let ours = self.ours.take().trap()?;
        let theirs: [u8; 32] = theirs.try_into().map_err(|_| Error::BadKex { msg: "bad curve25519 point" })?;
        let shared = ours.diffie_hellman(&x25519_dalek::PublicKey::from(theirs));
        Ok(KexOutput::new(shared.as_bytes(), kex_hash))
    }
}

pub struct KexEcdhP256 {
    /// Zeroizes itself on drop.
    ours: Option<p256::ecdh::EphemeralSecret>,
    pubkey: [u8; 65],
}

impl fmt::Debug for KexEcdhP256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexEcdhP256").field("ours", &self.ours.is_some()).finish()
    }
}

impl KexEcdhP256 {
    fn new() -> Result<Self> {
        let ours = p256::ecdh::EphemeralSecret::random(&mut rand_core::OsRng);
        let pubkey = ours.public_key().to_encoded_point(false);
        let mut buf = [0u8; 65];
        buf.copy_from_slice(pubkey.as_bytes());
        Ok(KexEcdhP256 { ours: Some(ours), pubkey: buf })
    }

    fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    fn secret(&mut self, theirs: &[u8], kex_hash: KexHash) -> Result<KexOutput> {
        let ours = self.ours.take().trap()?;
        let their_pk = p256::PublicKey::from_sec1_bytes(theirs)
            .map_err(|_| Error::BadKex { msg: "bad ECDH point" })?;
        let shared = ours.diffie_hellman(&their_pk);
        Ok(KexOutput::new(shared.raw_secret_bytes().as_slice(), kex_hash))
    }
}

/// RFC3526 group 14: a 2048-bit MODP group, generator 2.
const DH_GROUP14_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA",
    "8FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966",
    "D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E77",
    "2C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF6955817",
    "183995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

fn dh_group14_prime() -> num_bigint_dig::BigUint {
    num_bigint_dig::BigUint::parse_bytes(DH_GROUP14_PRIME_HEX.as_bytes(), 16)
        .expect("static DH group14 prime parses")
}

pub struct KexDhGroup14 {
    // TODO: num-bigint-dig's BigUint doesn't implement Zeroize, so the
    // private exponent outlives its use uncleared. Worth revisiting if a
    // constant-time/zeroizing bignum type is pulled in for other reasons.
    ours: Option<num_bigint_dig::BigUint>,
    pubkey: Vec<u8>,
}

impl fmt::Debug for KexDhGroup14 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexDhGroup14").field("ours", &self.ours.is_some()).finish()
    }
}

impl KexDhGroup14 {
    fn new() -> Result<Self> {
        use num_bigint_dig::BigUint;
        let p = dh_group14_prime();
        // A private exponent as wide as the group; more than enough
        // entropy for a single handshake's ephemeral value.
        let mut secret_bytes = [0u8; 256];
        random::fill_random(&mut secret_bytes)?;
        let x = BigUint::from_bytes_be(&secret_bytes) % (&p - BigUint::from(2u8)) + BigUint::from(1u8);
        let g = BigUint::from(2u8);
        let e = g.modpow(&x, &p);
        Ok(KexDhGroup14 { ours: Some(x), pubkey: e.to_bytes_be() })
    }

    fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    fn secret(&mut self, theirs: &[u8], kex_hash: KexHash) -> Result<KexOutput> {
        use num_bigint_dig::BigUint;
        let x = self.ours.take().trap()?;
        let p = dh_group14_prime();
        let f = BigUint::from_bytes_be(theirs);
        if f <= BigUint::from(1u8) || f >= &p - BigUint::from(1u8) {
            return Err(Error::BadKex { msg: "out of range DH value" });
        }
        let k = f.modpow(&x, &p);
        Ok(KexOutput::new(&k.to_bytes_be(), kex_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_key_matches_known_vector() {
        // Two independent KexOutputs built from the same K/H must derive
        // identical key material for the same letter.
        let sess_id: SessId = vec![1, 2, 3, 4];
        let k = [9u8; 32];
        let out1 = KexOutput::new_test(&k, &sess_id);
        let out2 = KexOutput::new_test(&k, &sess_id);
        let mut buf1 = [0u8; 64];
        let mut buf2 = [0u8; 64];
        let a = out1.compute_key('A', 32, &mut buf1, &sess_id).unwrap().to_vec();
        let b = out2.compute_key('A', 32, &mut buf2, &sess_id).unwrap().to_vec();
        assert_eq!(a, b);
    }

    #[test]
    fn compute_key_differs_per_letter() {
        let sess_id: SessId = vec![1, 2, 3, 4];
        let k = [5u8; 32];
        let out = KexOutput::new_test(&k, &sess_id);
        let mut buf_a = [0u8; 32];
        let mut buf_b = [0u8; 32];
        let a = out.compute_key('A', 32, &mut buf_a, &sess_id).unwrap().to_vec();
        let b = out.compute_key('B', 32, &mut buf_b, &sess_id).unwrap().to_vec();
        assert_ne!(a, b);
    }

    #[test]
    fn curve25519_agrees() {
        // KexCurve25519 wraps EphemeralSecret, which intentionally consumes
        // itself on use and so can't be exercised two-sided from outside;
        // check the underlying primitive's symmetry directly instead.
        let a = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let b = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
        let a_pub = x25519_dalek::PublicKey::from(&a);
        let b_pub = x25519_dalek::PublicKey::from(&b);
        assert_eq!(a.diffie_hellman(&b_pub).to_bytes(), b.diffie_hellman(&a_pub).to_bytes());
    }

    #[test]
    fn dh_group14_agrees() {
        let a = KexDhGroup14::new().unwrap();
        let b = KexDhGroup14::new().unwrap();

        let p = dh_group14_prime();
        let x = a.ours.as_ref().unwrap().clone();
        let y = b.ours.as_ref().unwrap().clone();
        let shared_from_a = num_bigint_dig::BigUint::from_bytes_be(&b.pubkey).modpow(&x, &p);
        let shared_from_b = num_bigint_dig::BigUint::from_bytes_be(&a.pubkey).modpow(&y, &p);
        assert_eq!(shared_from_a, shared_from_b);
    }
}
