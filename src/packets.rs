//! SSH protocol packets: every [`Packet`] variant and the structures
//! nested inside it, built on [`crate::sshwire`]'s zero-copy wire traits.
//! Framing (length/padding/MAC) is handled by [`crate::encrypt`] and
//! [`crate::traffic`]; this module only describes a packet's payload shape.

use core::fmt;

use log::{trace, warn};

use dusk_ssh_wire_derive::{SSHDecode, SSHEncode};

use crate::auth::AuthType;
use crate::error::{Error, Result};
use crate::namelist::NameList;
use crate::sign::SigType;
use crate::sshnames::*;
use crate::sshwire::{
    BinString, Blob, SSHDecode, SSHEncode, SSHSink, SSHSource, TextString, WireError, WireResult,
};

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexInit<'a> {
    pub cookie: [u8; 16],
    pub kex: NameList<'a>,
    /// RFC4253 calls this the host key algorithms list, but the values in
    /// it are signature algorithms, not key types.
    pub hostsig: NameList<'a>,
    pub cipher_c2s: NameList<'a>,
    pub cipher_s2c: NameList<'a>,
    pub mac_c2s: NameList<'a>,
    pub mac_s2c: NameList<'a>,
    pub comp_c2s: NameList<'a>,
    pub comp_s2c: NameList<'a>,
    pub lang_c2s: NameList<'a>,
    pub lang_s2c: NameList<'a>,
    pub first_follows: bool,
    pub reserved: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct NewKeys {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Ignore {}

/// Named to avoid clashing with [`fmt::Debug`].
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct DebugPacket<'a> {
    pub always_display: bool,
    pub message: TextString<'a>,
    pub lang: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Disconnect<'a> {
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: TextString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Unimplemented {
    pub seq: u32,
}

/// The client's ephemeral key-agreement value. One wire shape serves
/// curve25519, ECDH-P256 and DH-group14: each just contributes an opaque
/// `string` (a curve point or an mpint respectively); [`crate::kex`] knows
/// how to interpret the bytes for whichever algorithm was negotiated.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexDHInit<'a> {
    pub q_c: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexDHReply<'a> {
    pub k_s: Blob<PubKey<'a>>,
    pub q_s: BinString<'a>,
    pub sig: Blob<Signature<'a>>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ServiceRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ServiceAccept<'a> {
    pub name: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthRequest<'a> {
    pub username: TextString<'a>,
    pub service: &'a str,
    pub method: AuthMethod<'a>,
}

/// The method-specific part of a [`UserauthRequest`].
#[derive(Debug, SSHEncode, SSHDecode)]
#[sshwire(variant_prefix)]
pub enum AuthMethod<'a> {
    #[sshwire(variant = "password")]
    Password(MethodPassword<'a>),
    #[sshwire(variant = "publickey")]
    PubKey(MethodPubKey<'a>),
    #[sshwire(variant = "keyboard-interactive")]
    KbdInteractive(MethodKbdInt<'a>),
    #[sshwire(variant = "none")]
    NoneMethod(MethodNone),
    #[sshwire(unknown)]
    Unknown(crate::sshwire::Unknown<'a>),
}

/// The empty body of the `"none"` auth method (used only to probe which
/// methods the server will accept).
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct MethodNone {}

/// The method-specific part of a `"keyboard-interactive"` auth request
/// (RFC4256 §3.1). `submethods` is a comma-separated hint the server MAY
/// use to pick an authentication style; this implementation ignores it.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct MethodKbdInt<'a> {
    pub lang: TextString<'a>,
    pub submethods: TextString<'a>,
}

impl<'a> TryFrom<PubKey<'a>> for AuthMethod<'a> {
    type Error = Error;
    fn try_from(pubkey: PubKey<'a>) -> Result<Self> {
        let sig_algo = Signature::sig_name_for_pubkey(&pubkey)?;
        Ok(AuthMethod::PubKey(MethodPubKey { sig_algo, pubkey: Blob(pubkey), sig: None }))
    }
}

/// SSH_MSG_USERAUTH_PK_OK, SSH_MSG_USERAUTH_PASSWD_CHANGEREQ, or
/// SSH_MSG_USERAUTH_INFO_REQUEST: all three share message number 60,
/// disambiguated by which method the client's last request used.
/// Decoding needs [`ParseContext::cli_auth_type`] set by the caller; it
/// can't be inferred from the bytes alone.
#[derive(Debug, SSHEncode)]
pub enum Userauth60<'a> {
    PkOk(UserauthPkOk<'a>),
    PwChangeReq(UserauthPwChangeReq<'a>),
    InfoRequest(UserauthInfoRequest<'a>),
}

impl<'de: 'a, 'a> SSHDecode<'de> for Userauth60<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        match s.ctx().cli_auth_type {
            Some(AuthType::Password) => Ok(Self::PwChangeReq(SSHDecode::dec(s)?)),
            Some(AuthType::PubKey) => Ok(Self::PkOk(SSHDecode::dec(s)?)),
            Some(AuthType::KbdInteractive) => Ok(Self::InfoRequest(SSHDecode::dec(s)?)),
            _ => {
                trace!("wrong packet state for userauth60");
                Err(WireError::PacketWrong)
            }
        }
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthPkOk<'a> {
    pub algo: &'a str,
    pub key: Blob<PubKey<'a>>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthPwChangeReq<'a> {
    pub prompt: TextString<'a>,
    pub lang: TextString<'a>,
}

/// SSH_MSG_USERAUTH_INFO_REQUEST (RFC4256 §3.2): the server's challenge
/// for a `keyboard-interactive` attempt, a free-form instruction plus a
/// list of prompts each with its own echo flag.
#[derive(Debug)]
pub struct UserauthInfoRequest<'a> {
    pub name: TextString<'a>,
    pub instruction: TextString<'a>,
    pub lang: TextString<'a>,
    pub prompts: Vec<KbdPrompt<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct KbdPrompt<'a> {
    pub prompt: TextString<'a>,
    pub echo: bool,
}

impl SSHEncode for UserauthInfoRequest<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        self.name.enc(s)?;
        self.instruction.enc(s)?;
        self.lang.enc(s)?;
        (self.prompts.len() as u32).enc(s)?;
        for p in &self.prompts {
            p.prompt.enc(s)?;
            p.echo.enc(s)?;
        }
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for UserauthInfoRequest<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let name = SSHDecode::dec(s)?;
        let instruction = SSHDecode::dec(s)?;
        let lang = SSHDecode::dec(s)?;
        let count = u32::dec(s)?;
        let mut prompts = Vec::new();
        for _ in 0..count {
            let prompt = SSHDecode::dec(s)?;
            let echo = bool::dec(s)?;
            prompts.push(KbdPrompt { prompt, echo });
        }
        Ok(UserauthInfoRequest { name, instruction, lang, prompts })
    }
}

/// SSH_MSG_USERAUTH_INFO_RESPONSE (RFC4256 §3.4): the client's answers,
/// one per prompt in the preceding [`UserauthInfoRequest`], in order.
#[derive(Debug)]
pub struct UserauthInfoResponse<'a> {
    pub responses: Vec<TextString<'a>>,
}

impl SSHEncode for UserauthInfoResponse<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        (self.responses.len() as u32).enc(s)?;
        for r in &self.responses {
            r.enc(s)?;
        }
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for UserauthInfoResponse<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let count = u32::dec(s)?;
        let mut responses = Vec::new();
        for _ in 0..count {
            responses.push(SSHDecode::dec(s)?);
        }
        Ok(UserauthInfoResponse { responses })
    }
}

#[derive(SSHEncode, SSHDecode)]
pub struct MethodPassword<'a> {
    pub change: bool,
    pub password: TextString<'a>,
}

// Custom Debug: never print the password.
impl fmt::Debug for MethodPassword<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodPassword").field("change", &self.change).finish_non_exhaustive()
    }
}

/// `sig` is `None` during the initial probe request (the client asks
/// whether this key would be acceptable before it bothers signing
/// anything); the server replies with [`UserauthPkOk`] and the client
/// resends with `sig` populated.
#[derive(Debug)]
pub struct MethodPubKey<'a> {
    /// Signature algorithm name, not key-type name (e.g. `rsa-sha2-256`
    /// for an `ssh-rsa` key).
    pub sig_algo: &'a str,
    pub pubkey: Blob<PubKey<'a>>,
    pub sig: Option<Blob<Signature<'a>>>,
}

impl SSHEncode for MethodPubKey<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        let force_sig_bool = s.ctx().map_or(false, |c| c.method_pubkey_force_sig_bool);
        let has_sig = self.sig.is_some() || force_sig_bool;
        has_sig.enc(s)?;
        self.sig_algo.enc(s)?;
        self.pubkey.enc(s)?;
        self.sig.enc(s)?;
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for MethodPubKey<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let has_sig = bool::dec(s)?;
        let sig_algo = SSHDecode::dec(s)?;
        let pubkey = SSHDecode::dec(s)?;
        let sig = if has_sig { Some(SSHDecode::dec(s)?) } else { None };
        Ok(Self { sig_algo, pubkey, sig })
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthFailure<'a> {
    pub methods: NameList<'a>,
    pub partial: bool,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthSuccess {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthBanner<'a> {
    pub message: TextString<'a>,
    pub lang: TextString<'a>,
}

/// SSH_MSG_EXT_INFO (RFC8308): a list of `name`/`value` extension pairs
/// sent right after the first NEWKEYS, gated by the `ext-info-c`/
/// `ext-info-s` KEXINIT markers. Only `server-sig-algs` is meaningful to
/// this crate; other extensions are parsed past and discarded.
#[derive(Debug)]
pub struct ExtInfo<'a> {
    pub server_sig_algs: Option<NameList<'a>>,
}

impl SSHEncode for ExtInfo<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        let count = self.server_sig_algs.is_some() as u32;
        count.enc(s)?;
        if let Some(algs) = &self.server_sig_algs {
            SSH_EXT_SERVER_SIG_ALGS.enc(s)?;
            algs.enc(s)?;
        }
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for ExtInfo<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let count = u32::dec(s)?;
        let mut server_sig_algs = None;
        for _ in 0..count {
            let name: &'de str = SSHDecode::dec(s)?;
            if name == SSH_EXT_SERVER_SIG_ALGS {
                server_sig_algs = Some(NameList::dec(s)?);
            } else {
                let _: BinString = SSHDecode::dec(s)?;
            }
        }
        Ok(ExtInfo { server_sig_algs })
    }
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
#[sshwire(variant_prefix)]
pub enum PubKey<'a> {
    #[sshwire(variant = "ssh-ed25519")]
    Ed25519(Ed25519PubKey<'a>),
    #[sshwire(variant = "ssh-rsa")]
    RSA(RSAPubKey<'a>),
    #[sshwire(unknown)]
    Unknown(crate::sshwire::Unknown<'a>),
}

impl<'a> PubKey<'a> {
    /// The algorithm name this key presented. May not be one we support.
    pub fn algorithm_name(&self) -> core::result::Result<&'a str, &crate::sshwire::Unknown<'a>> {
        match self {
            PubKey::Ed25519(_) => Ok(SSH_NAME_ED25519),
            PubKey::RSA(_) => Ok(SSH_NAME_RSA),
            PubKey::Unknown(u) => Err(u),
        }
    }

    /// Compares against an OpenSSH-format public key line (as found in
    /// `authorized_keys`).
    pub fn matches_openssh(&self, k: &str) -> Result<bool> {
        let k = ssh_key::PublicKey::from_openssh(k).map_err(|_| Error::msg("unsupported OpenSSH key"))?;
        let m = match (k.key_data(), self) {
            (ssh_key::public::KeyData::Ed25519(kssh), PubKey::Ed25519(kself)) => {
                kssh.0 == kself.key.0
            }
            _ => false,
        };
        Ok(m)
    }
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct Ed25519PubKey<'a> {
    pub key: BinString<'a>,
}

#[derive(Debug, Clone, PartialEq, SSHEncode, SSHDecode)]
pub struct RSAPubKey<'a> {
    pub e: BinString<'a>,
    pub n: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
#[sshwire(variant_prefix)]
pub enum Signature<'a> {
    #[sshwire(variant = "ssh-ed25519")]
    Ed25519(Ed25519Sig<'a>),
    #[sshwire(variant = "rsa-sha2-256")]
    RSA256(RSA256Sig<'a>),
    #[sshwire(unknown)]
    Unknown(crate::sshwire::Unknown<'a>),
}

impl<'a> Signature<'a> {
    pub fn algorithm_name(&self) -> core::result::Result<&'a str, &crate::sshwire::Unknown<'a>> {
        match self {
            Signature::Ed25519(_) => Ok(SSH_NAME_ED25519),
            Signature::RSA256(_) => Ok(SSH_NAME_RSA_SHA256),
            Signature::Unknown(u) => Err(u),
        }
    }

    /// The signature algorithm name to use for a given public key. There's
    /// only one choice supported per key type (no legacy `ssh-rsa`/SHA-1
    /// signatures).
    pub fn sig_name_for_pubkey(pubkey: &PubKey) -> Result<&'static str> {
        match pubkey {
            PubKey::Ed25519(_) => Ok(SSH_NAME_ED25519),
            PubKey::RSA(_) => Ok(SSH_NAME_RSA_SHA256),
            PubKey::Unknown(u) => {
                warn!("unknown key type \"{u}\"");
                Err(Error::UnknownMethod { kind: "key" })
            }
        }
    }

    pub fn sig_type(&self) -> Result<SigType> {
        match self {
            Signature::Ed25519(_) => Ok(SigType::Ed25519),
            Signature::RSA256(_) => Ok(SigType::RSA256),
            Signature::Unknown(u) => {
                warn!("unknown signature type \"{u}\"");
                Err(Error::UnknownMethod { kind: "signature" })
            }
        }
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Ed25519Sig<'a> {
    pub sig: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct RSA256Sig<'a> {
    pub sig: BinString<'a>,
}

/// SSH_MSG_CHANNEL_OPEN. The channel-type tag (`ty`) isn't adjacent to its
/// payload on the wire -- `num`/`initial_window`/`max_packet` sit between
/// the tag string and the type-specific fields -- so [`ChannelOpenType`]
/// only derives its tag/payload halves and this struct stitches them
/// together by hand.
#[derive(Debug)]
pub struct ChannelOpen<'a> {
    pub num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
    pub ty: ChannelOpenType<'a>,
}

impl SSHEncode for ChannelOpen<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        self.ty.variant_name().enc(s)?;
        self.num.enc(s)?;
        self.initial_window.enc(s)?;
        self.max_packet.enc(s)?;
        self.ty.enc_payload(s)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for ChannelOpen<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let name: &'de str = SSHDecode::dec(s)?;
        let num = SSHDecode::dec(s)?;
        let initial_window = SSHDecode::dec(s)?;
        let max_packet = SSHDecode::dec(s)?;
        let ty = ChannelOpenType::dec_payload(name, s)?;
        Ok(Self { num, initial_window, max_packet, ty })
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
#[sshwire(external_tag)]
pub enum ChannelOpenType<'a> {
    #[sshwire(variant = "session")]
    Session(SessionOpen),
    #[sshwire(variant = "forwarded-tcpip")]
    ForwardedTcpip(ForwardedTcpip<'a>),
    #[sshwire(variant = "direct-tcpip")]
    DirectTcpip(DirectTcpip<'a>),
    #[sshwire(unknown)]
    Unknown(crate::sshwire::Unknown<'a>),
}

/// `"session"` channel opens carry no type-specific fields; this unit-like
/// payload keeps the external-tag derive's one-field-per-variant shape
/// uniform.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct SessionOpen {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpenConfirmation {
    pub num: u32,
    pub sender_num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpenFailure<'a> {
    pub num: u32,
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelWindowAdjust {
    pub num: u32,
    pub adjust: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelData<'a> {
    pub num: u32,
    pub data: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelDataExt<'a> {
    pub num: u32,
    pub code: u32,
    pub data: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelEof {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelClose {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelSuccess {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelFailure {
    pub num: u32,
}

/// SSH_MSG_CHANNEL_REQUEST, same external-tag shape as [`ChannelOpen`]:
/// `num` and `want_reply` sit between the request-type tag and its payload.
#[derive(Debug)]
pub struct ChannelRequest<'a> {
    pub num: u32,
    pub want_reply: bool,
    pub req: ChannelReqType<'a>,
}

impl SSHEncode for ChannelRequest<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        self.req.variant_name().enc(s)?;
        self.num.enc(s)?;
        self.want_reply.enc(s)?;
        self.req.enc_payload(s)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for ChannelRequest<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let name: &'de str = SSHDecode::dec(s)?;
        let num = SSHDecode::dec(s)?;
        let want_reply = SSHDecode::dec(s)?;
        let req = ChannelReqType::dec_payload(name, s)?;
        Ok(Self { num, want_reply, req })
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
#[sshwire(external_tag)]
pub enum ChannelReqType<'a> {
    #[sshwire(variant = "shell")]
    Shell(ShellReq),
    #[sshwire(variant = "exec")]
    Exec(Exec<'a>),
    #[sshwire(variant = "pty-req")]
    Pty(Pty<'a>),
    #[sshwire(variant = "subsystem")]
    Subsystem(Subsystem<'a>),
    #[sshwire(variant = "window-change")]
    WinChange(WinChange),
    #[sshwire(variant = "signal")]
    Signal(Signal<'a>),
    #[sshwire(variant = "exit-status")]
    ExitStatus(ExitStatus),
    #[sshwire(variant = "exit-signal")]
    ExitSignal(ExitSignal<'a>),
    #[sshwire(variant = "break")]
    Break(Break),
    #[sshwire(unknown)]
    Unknown(crate::sshwire::Unknown<'a>),
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ShellReq {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Exec<'a> {
    pub command: TextString<'a>,
}

/// A `"pty-req"` request body.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Pty<'a> {
    pub term: TextString<'a>,
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
    pub modes: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Subsystem<'a> {
    pub subsystem: &'a str,
}

#[derive(Debug, Clone, SSHEncode, SSHDecode)]
pub struct WinChange {
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Signal<'a> {
    pub sig: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ExitStatus {
    pub status: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ExitSignal<'a> {
    pub signal: &'a str,
    pub core: bool,
    pub error: TextString<'a>,
    pub lang: &'a str,
}

#[derive(Debug, Clone, SSHEncode, SSHDecode)]
pub struct Break {
    pub length: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ForwardedTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct DirectTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}

/// State passed in alongside decoding so the parser can pick the right
/// variant for packets whose shape depends on in-flight session state
/// (currently only [`Userauth60`]) or adjust encoding for [`MethodPubKey`].
#[derive(Default, Clone, Debug)]
pub struct ParseContext {
    pub cli_auth_type: Option<AuthType>,
    pub method_pubkey_force_sig_bool: bool,
}

impl ParseContext {
    pub fn new() -> Self {
        ParseContext::default()
    }
}

/// Expands to the [`MessageNumber`] enum, the [`Packet`] enum, and their
/// encode/decode/category glue, from one table of
/// `(number, variant, type, MSG_NAME, category)` tuples.
macro_rules! messagetypes {
    ( $( ($num:literal, $variant:ident, $ty:ty, $name:ident, $category:ident), )* ) => {

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum MessageNumber {
    $( $name = $num, )*
}

impl TryFrom<u8> for MessageNumber {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            $( $num => Ok(MessageNumber::$name), )*
            _ => Err(Error::UnknownPacket { number: v }),
        }
    }
}

impl SSHEncode for Packet<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        (self.message_num() as u8).enc(s)?;
        match self {
            $( Packet::$variant(p) => p.enc(s)?, )*
        }
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Packet<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let msg_num = u8::dec(s)?;
        let ty = MessageNumber::try_from(msg_num).map_err(|_| WireError::UnknownPacket { number: msg_num })?;
        Ok(match ty {
            $( MessageNumber::$name => Packet::$variant(SSHDecode::dec(s)?), )*
        })
    }
}

/// Top level SSH packet enum: one variant per message number.
#[derive(Debug)]
pub enum Packet<'a> {
    $( $variant($ty), )*
}

impl<'a> Packet<'a> {
    pub fn message_num(&self) -> MessageNumber {
        match self {
            $( Packet::$variant(_) => MessageNumber::$name, )*
        }
    }

    pub fn category(&self) -> Category {
        match self {
            $( Packet::$variant(_) => Category::$category, )*
        }
    }
}

$(
impl<'a> From<$ty> for Packet<'a> {
    fn from(p: $ty) -> Packet<'a> {
        Packet::$variant(p)
    }
}
)*

} }

/// Which transport phase a packet type is legal in (the transport state
/// machine consults this when validating an incoming message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Allowed in any transport state.
    All,
    /// Only legal between KEXINIT and NEWKEYS.
    Kex,
    /// Only legal once key exchange has completed (pre- or post-auth).
    Auth,
    /// Only legal once authentication has completed.
    Sess,
}

messagetypes![
    (1, Disconnect, Disconnect<'a>, SSH_MSG_DISCONNECT, All),
    (2, Ignore, Ignore, SSH_MSG_IGNORE, All),
    (3, Unimplemented, Unimplemented, SSH_MSG_UNIMPLEMENTED, All),
    (4, DebugPacket, DebugPacket<'a>, SSH_MSG_DEBUG, All),
    (5, ServiceRequest, ServiceRequest<'a>, SSH_MSG_SERVICE_REQUEST, Auth),
    (6, ServiceAccept, ServiceAccept<'a>, SSH_MSG_SERVICE_ACCEPT, Auth),
    (20, KexInit, KexInit<'a>, SSH_MSG_KEXINIT, All),
    (21, NewKeys, NewKeys, SSH_MSG_NEWKEYS, Kex),
    (30, KexDHInit, KexDHInit<'a>, SSH_MSG_KEXDH_INIT, Kex),
    (31, KexDHReply, KexDHReply<'a>, SSH_MSG_KEXDH_REPLY, Kex),
    (50, UserauthRequest, UserauthRequest<'a>, SSH_MSG_USERAUTH_REQUEST, Auth),
    (51, UserauthFailure, UserauthFailure<'a>, SSH_MSG_USERAUTH_FAILURE, Auth),
    (52, UserauthSuccess, UserauthSuccess, SSH_MSG_USERAUTH_SUCCESS, Auth),
    (53, UserauthBanner, UserauthBanner<'a>, SSH_MSG_USERAUTH_BANNER, Auth),
    (7, ExtInfo, ExtInfo<'a>, SSH_MSG_EXT_INFO, Auth),
    // One of SSH_MSG_USERAUTH_PASSWD_CHANGEREQ / SSH_MSG_USERAUTH_PK_OK /
    // SSH_MSG_USERAUTH_INFO_REQUEST, see Userauth60.
    (60, Userauth60, Userauth60<'a>, SSH_MSG_USERAUTH_60, Auth),
    (61, UserauthInfoResponse, UserauthInfoResponse<'a>, SSH_MSG_USERAUTH_INFO_RESPONSE, Auth),
    (90, ChannelOpen, ChannelOpen<'a>, SSH_MSG_CHANNEL_OPEN, Sess),
    (91, ChannelOpenConfirmation, ChannelOpenConfirmation, SSH_MSG_CHANNEL_OPEN_CONFIRMATION, Sess),
    (92, ChannelOpenFailure, ChannelOpenFailure<'a>, SSH_MSG_CHANNEL_OPEN_FAILURE, Sess),
    (93, ChannelWindowAdjust, ChannelWindowAdjust, SSH_MSG_CHANNEL_WINDOW_ADJUST, Sess),
    (94, ChannelData, ChannelData<'a>, SSH_MSG_CHANNEL_DATA, Sess),
    (95, ChannelDataExt, ChannelDataExt<'a>, SSH_MSG_CHANNEL_EXTENDED_DATA, Sess),
    (96, ChannelEof, ChannelEof, SSH_MSG_CHANNEL_EOF, Sess),
    (97, ChannelClose, ChannelClose, SSH_MSG_CHANNEL_CLOSE, Sess),
    (98, ChannelRequest, ChannelRequest<'a>, SSH_MSG_CHANNEL_REQUEST, Sess),
    (99, ChannelSuccess, ChannelSuccess, SSH_MSG_CHANNEL_SUCCESS, Sess),
    (100, ChannelFailure, ChannelFailure, SSH_MSG_CHANNEL_FAILURE, Sess),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sshwire::tests::{assert_serialize_equal, test_roundtrip};
    use crate::sshwire::{packet_from_bytes, write_ssh};

    #[test]
    fn packet_type_roundtrips_number() {
        for i in 0..=255u8 {
            if let Ok(ty) = MessageNumber::try_from(i) {
                assert_eq!(i, ty as u8);
            }
        }
    }

    #[test]
    fn roundtrip_authpubkey() {
        let pubkey = PubKey::Ed25519(Ed25519PubKey { key: BinString(b"abcdefgh") });
        let p: Packet = UserauthRequest {
            username: "matt".into(),
            service: "ssh-connection",
            method: AuthMethod::try_from(pubkey).unwrap(),
        }
        .into();
        test_roundtrip(&p);

        let sig = Signature::Ed25519(Ed25519Sig { sig: BinString(b"something") });
        let pubkey = PubKey::Ed25519(Ed25519PubKey { key: BinString(b"abcdefgh") });
        let p: Packet = UserauthRequest {
            username: "matt".into(),
            service: "ssh-connection",
            method: AuthMethod::PubKey(MethodPubKey {
                sig_algo: SSH_NAME_ED25519,
                pubkey: Blob(pubkey),
                sig: Some(Blob(sig)),
            }),
        }
        .into();
        test_roundtrip(&p);
    }

    #[test]
    fn roundtrip_channel_open() {
        let p: Packet = ChannelOpen {
            num: 111,
            initial_window: 50000,
            max_packet: 20000,
            ty: ChannelOpenType::DirectTcpip(DirectTcpip {
                address: "localhost".into(),
                port: 4444,
                origin: "somewhere".into(),
                origin_port: 0,
            }),
        }
        .into();
        test_roundtrip(&p);

        let p: Packet = ChannelOpen {
            num: 0,
            initial_window: 899,
            max_packet: 14,
            ty: ChannelOpenType::Session(SessionOpen {}),
        }
        .into();
        test_roundtrip(&p);
    }

    #[test]
    fn roundtrip_channel_request() {
        let p: Packet = ChannelRequest {
            num: 3,
            want_reply: true,
            req: ChannelReqType::Pty(Pty {
                term: "xterm".into(),
                cols: 80,
                rows: 24,
                width: 0,
                height: 0,
                modes: BinString(b""),
            }),
        }
        .into();
        test_roundtrip(&p);
    }

    #[test]
    fn unknown_channel_type_name_only() {
        let p: Packet = ChannelOpen {
            num: 0,
            initial_window: 899,
            max_packet: 14,
            ty: ChannelOpenType::Unknown(crate::sshwire::Unknown("audio-stream")),
        }
        .into();
        let mut buf = [0u8; 256];
        let n = write_ssh(&mut buf, &p).unwrap();
        let ctx = ParseContext::new();
        let p2: Packet = packet_from_bytes(&buf[..n], &ctx).unwrap();
        match p2 {
            Packet::ChannelOpen(c) => assert!(matches!(c.ty, ChannelOpenType::Unknown(_))),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn kexinit_roundtrip() {
        let local = crate::namelist::LocalNames(vec![SSH_NAME_CURVE25519]);
        let p: Packet = KexInit {
            cookie: [7u8; 16],
            kex: (&local).into(),
            hostsig: (&local).into(),
            cipher_c2s: (&local).into(),
            cipher_s2c: (&local).into(),
            mac_c2s: (&local).into(),
            mac_s2c: (&local).into(),
            comp_c2s: (&local).into(),
            comp_s2c: (&local).into(),
            lang_c2s: NameList::empty(),
            lang_s2c: NameList::empty(),
            first_follows: false,
            reserved: 0,
        }
        .into();
        test_roundtrip(&p);
    }

    #[test]
    fn assert_serialize_equal_sanity() {
        assert_serialize_equal(&1u32, &1u32);
    }

    #[test]
    fn roundtrip_kbdint_request() {
        let p: Packet = UserauthRequest {
            username: "matt".into(),
            service: "ssh-connection",
            method: AuthMethod::KbdInteractive(MethodKbdInt {
                lang: TextString(b""),
                submethods: TextString(b"pam"),
            }),
        }
        .into();
        test_roundtrip(&p);
    }

    #[test]
    fn roundtrip_info_response() {
        let p: Packet = UserauthInfoResponse {
            responses: vec![TextString(b"hunter2"), TextString(b"")],
        }
        .into();
        test_roundtrip(&p);
    }

    #[test]
    fn info_request_roundtrips_with_kbdint_context() {
        let p: Packet = Userauth60::InfoRequest(UserauthInfoRequest {
            name: TextString(b"challenge"),
            instruction: TextString(b"answer the questions"),
            lang: TextString(b""),
            prompts: vec![
                KbdPrompt { prompt: TextString(b"Password: "), echo: false },
                KbdPrompt { prompt: TextString(b"Token: "), echo: true },
            ],
        })
        .into();
        let mut buf = [0u8; 512];
        let n = write_ssh(&mut buf, &p).unwrap();
        let ctx = ParseContext { cli_auth_type: Some(AuthType::KbdInteractive), ..ParseContext::new() };
        let p2: Packet = packet_from_bytes(&buf[..n], &ctx).unwrap();
        match p2 {
            Packet::Userauth60(Userauth60::InfoRequest(req)) => {
                assert_eq!(req.name.as_str(), "challenge");
                assert_eq!(req.prompts.len(), 2);
                assert!(!req.prompts[0].echo);
                assert!(req.prompts[1].echo);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn info_request_wrong_context_fails() {
        let p: Packet = Userauth60::InfoRequest(UserauthInfoRequest {
            name: TextString(b""),
            instruction: TextString(b""),
            lang: TextString(b""),
            prompts: vec![],
        })
        .into();
        let mut buf = [0u8; 256];
        let n = write_ssh(&mut buf, &p).unwrap();
        let ctx = ParseContext::new();
        let r: WireResult<Packet> = packet_from_bytes(&buf[..n], &ctx);
        assert!(r.is_err());
    }
}
