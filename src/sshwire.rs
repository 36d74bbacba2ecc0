//! The SSH Binary Packet Protocol's *payload* encoding: every [`Packet`]
//! variant and the structures nested inside it implement [`SSHEncode`] and
//! [`SSHDecode`], a minimal zero-copy serde-alike. Framing (length/padding/
//! MAC) is a separate concern handled by [`crate::encrypt`] and
//! [`crate::traffic`]; this module only knows how to turn one packet's
//! payload bytes into (and out of) typed Rust values.

use core::fmt;

use digest::DynDigest;

use crate::packets::ParseContext;

pub type WireResult<T> = core::result::Result<T, WireError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Ran out of input decoding a fixed-size or length-prefixed field.
    RanOut,
    /// A length-prefixed field declared itself implausibly large.
    TooLarge,
    /// A string field wasn't valid UTF-8 where one was required.
    BadUtf8,
    /// A packet number byte had no matching [`crate::packets::MessageNumber`].
    UnknownPacket { number: u8 },
    /// A packet was received that doesn't parse in the current auth/kex
    /// sub-state (e.g. USERAUTH_60 when no method exchange is pending).
    PacketWrong,
    /// The output buffer isn't big enough to hold the encoded value.
    NoRoom,
    /// A packet's `packet_length` field was out of bounds (exceeds
    /// [`crate::traffic::MAX_PACKET_LEN`], or too small to hold even the
    /// padding-length byte and minimum padding).
    BadPacketLength,
    /// `padding_length` was out of the 4..255 range the length implies.
    BadPadding,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::RanOut => write!(f, "ran out of input"),
            WireError::TooLarge => write!(f, "length field too large"),
            WireError::BadUtf8 => write!(f, "invalid utf8"),
            WireError::UnknownPacket { number } => {
                write!(f, "unknown packet type {number}")
            }
            WireError::PacketWrong => write!(f, "packet not valid in this state"),
            WireError::NoRoom => write!(f, "output buffer too small"),
            WireError::BadPacketLength => write!(f, "packet length out of bounds"),
            WireError::BadPadding => write!(f, "invalid padding length"),
        }
    }
}

/// Sink side of the wire format: somewhere to append encoded bytes.
pub trait SSHSink {
    fn push(&mut self, data: &[u8]) -> WireResult<()>;
    /// Parse context, used by a handful of encoders that vary their shape
    /// based on session state (e.g. [`crate::packets::MethodPubKey`]'s
    /// `force_sig_bool`).
    fn ctx(&self) -> Option<&ParseContext> {
        None
    }
}

/// Source side of the wire format: a byte slice with a cursor, plus the
/// [`ParseContext`] needed to disambiguate packets whose shape depends on
/// in-flight session state (e.g. [`crate::packets::Userauth60`]).
pub trait SSHSource<'de> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]>;
    fn ctx(&self) -> &ParseContext;
    /// Remaining undecoded bytes, consuming them. Used by `Unknown` catch-all
    /// variants so an unrecognised algorithm/channel-type name doesn't abort
    /// parsing the rest of the packet stream.
    fn take_rest(&mut self) -> &'de [u8];
}

pub trait SSHEncode {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()>;
}

pub trait SSHDecode<'de>: Sized {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self>;
}

// ---- primitives ----

impl SSHEncode for u8 {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        s.push(&[*self])
    }
}
impl<'de> SSHDecode<'de> for u8 {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        Ok(s.take(1)?[0])
    }
}

impl SSHEncode for bool {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        s.push(&[*self as u8])
    }
}
impl<'de> SSHDecode<'de> for bool {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        Ok(s.take(1)?[0] != 0)
    }
}

impl SSHEncode for u32 {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        s.push(&self.to_be_bytes())
    }
}
impl<'de> SSHDecode<'de> for u32 {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let b = s.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().map_err(|_| WireError::RanOut)?))
    }
}

impl SSHEncode for [u8; 16] {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        s.push(self)
    }
}
impl<'de> SSHDecode<'de> for [u8; 16] {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        s.take(16)?.try_into().map_err(|_| WireError::RanOut)
    }
}

/// An unframed 'name' field: length-prefixed and required to be valid UTF-8
/// (service names, subsystem names, signature algorithm names, ...).
impl<'de: 'a, 'a> SSHDecode<'de> for &'a str {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let len = u32::dec(s)? as usize;
        let b = s.take(len)?;
        core::str::from_utf8(b).map_err(|_| WireError::BadUtf8)
    }
}
impl SSHEncode for str {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        (self.len() as u32).enc(s)?;
        s.push(self.as_bytes())
    }
}
impl SSHEncode for &str {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        (*self).enc(s)
    }
}

impl<T: SSHEncode> SSHEncode for Option<T> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        match self {
            Some(v) => v.enc(s),
            None => Ok(()),
        }
    }
}

/// A length-prefixed opaque byte string (RFC4251 §5 `string`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BinString<'a>(pub &'a [u8]);

impl fmt::Debug for BinString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BinString({} bytes)", self.0.len())
    }
}
impl<'a> From<&'a [u8]> for BinString<'a> {
    fn from(v: &'a [u8]) -> Self {
        BinString(v)
    }
}
impl SSHEncode for BinString<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        (self.0.len() as u32).enc(s)?;
        s.push(self.0)
    }
}
impl<'de: 'a, 'a> SSHDecode<'de> for BinString<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let len = u32::dec(s)? as usize;
        Ok(BinString(s.take(len)?))
    }
}

/// A length-prefixed `string` that's expected (but not required) to be
/// displayable text, e.g. banners and error descriptions. Unlike `&str`
/// this tolerates non-UTF8 content rather than failing the whole decode.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TextString<'a>(pub &'a [u8]);

impl<'a> From<&'a str> for TextString<'a> {
    fn from(v: &'a str) -> Self {
        TextString(v.as_bytes())
    }
}
impl<'a> TextString<'a> {
    pub fn as_str(&self) -> &'a str {
        core::str::from_utf8(self.0).unwrap_or("")
    }
}
impl fmt::Debug for TextString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}
impl SSHEncode for TextString<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        (self.0.len() as u32).enc(s)?;
        s.push(self.0)
    }
}
impl<'de: 'a, 'a> SSHDecode<'de> for TextString<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let len = u32::dec(s)? as usize;
        Ok(TextString(s.take(len)?))
    }
}

/// A value that's itself SSH-encoded as the content of a `string` (e.g. a
/// host key blob, a signature blob): `Blob(T)` writes/reads a u32 length
/// prefix around `T`'s own encoding.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob<T>(pub T);

impl<T: SSHEncode> SSHEncode for Blob<T> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        let mut buf = CountSink(0);
        self.0.enc(&mut buf)?;
        (buf.0 as u32).enc(s)?;
        self.0.enc(s)
    }
}
impl<'de: 'a, 'a, T: SSHDecode<'de>> SSHDecode<'de> for Blob<T> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let len = u32::dec(s)? as usize;
        let inner = s.take(len)?;
        let mut sub = SliceSource::new(inner, s.ctx());
        let v = T::dec(&mut sub)?;
        Ok(Blob(v))
    }
}

/// A catch-all for an unrecognised algorithm/channel-type/request-type
/// name. Only the name is retained (matched against during negotiation);
/// any payload that would have followed is dropped since there's nothing
/// meaningful to do with it once the type is unrecognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unknown<'a>(pub &'a str);

impl fmt::Display for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A sink that only counts bytes, used by [`Blob`] to compute its length
/// prefix without a double allocation.
struct CountSink(usize);
impl SSHSink for CountSink {
    fn push(&mut self, data: &[u8]) -> WireResult<()> {
        self.0 += data.len();
        Ok(())
    }
}

/// Growable-buffer sink used for encoding packets destined for the
/// encrypt/framing layer.
pub struct VecSink<'c> {
    pub buf: Vec<u8>,
    ctx: Option<&'c ParseContext>,
}
impl<'c> VecSink<'c> {
    pub fn new() -> Self {
        VecSink { buf: Vec::new(), ctx: None }
    }
    pub fn with_ctx(ctx: &'c ParseContext) -> Self {
        VecSink { buf: Vec::new(), ctx: Some(ctx) }
    }
}
impl Default for VecSink<'_> {
    fn default() -> Self {
        Self::new()
    }
}
impl SSHSink for VecSink<'_> {
    fn push(&mut self, data: &[u8]) -> WireResult<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }
    fn ctx(&self) -> Option<&ParseContext> {
        self.ctx
    }
}

/// A fixed-size-buffer sink, for encoding directly into a preallocated
/// packet buffer (the framing layer's payload region).
pub struct SliceSink<'b, 'c> {
    buf: &'b mut [u8],
    pos: usize,
    ctx: Option<&'c ParseContext>,
}
impl<'b, 'c> SliceSink<'b, 'c> {
    pub fn new(buf: &'b mut [u8]) -> Self {
        SliceSink { buf, pos: 0, ctx: None }
    }
    pub fn len(&self) -> usize {
        self.pos
    }
}
impl SSHSink for SliceSink<'_, '_> {
    fn push(&mut self, data: &[u8]) -> WireResult<()> {
        let end = self.pos.checked_add(data.len()).ok_or(WireError::NoRoom)?;
        if end > self.buf.len() {
            return Err(WireError::NoRoom);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }
    fn ctx(&self) -> Option<&ParseContext> {
        self.ctx
    }
}

/// A byte-slice source with a cursor: the decode counterpart of
/// [`SliceSink`].
pub struct SliceSource<'de, 'c> {
    buf: &'de [u8],
    pos: usize,
    ctx: &'c ParseContext,
}
impl<'de, 'c> SliceSource<'de, 'c> {
    pub fn new(buf: &'de [u8], ctx: &'c ParseContext) -> Self {
        SliceSource { buf, pos: 0, ctx }
    }
    pub fn pos(&self) -> usize {
        self.pos
    }
}
impl<'de, 'c> SSHSource<'de> for SliceSource<'de, 'c> {
    fn take(&mut self, len: usize) -> WireResult<&'de [u8]> {
        let end = self.pos.checked_add(len).ok_or(WireError::RanOut)?;
        if end > self.buf.len() {
            return Err(WireError::RanOut);
        }
        let r = &self.buf[self.pos..end];
        self.pos = end;
        Ok(r)
    }
    fn ctx(&self) -> &ParseContext {
        self.ctx
    }
    fn take_rest(&mut self) -> &'de [u8] {
        let r = &self.buf[self.pos..];
        self.pos = self.buf.len();
        r
    }
}

/// Encodes `val` into `buf`, returning the number of bytes written.
pub fn write_ssh<E: SSHEncode>(buf: &mut [u8], val: &E) -> WireResult<usize> {
    let mut s = SliceSink::new(buf);
    val.enc(&mut s)?;
    Ok(s.len())
}

/// Encodes `val` into a freshly allocated buffer.
pub fn write_ssh_vec<E: SSHEncode>(val: &E) -> Vec<u8> {
    let mut s = VecSink::new();
    // Infallible: VecSink never runs out of room.
    val.enc(&mut s).expect("VecSink::push is infallible");
    s.buf
}

/// Decodes a [`crate::packets::Packet`] (or any other top-level
/// `SSHDecode` type) from a complete payload buffer.
pub fn packet_from_bytes<'de, T: SSHDecode<'de>>(
    buf: &'de [u8],
    ctx: &ParseContext,
) -> WireResult<T> {
    let mut s = SliceSource::new(buf, ctx);
    T::dec(&mut s)
}

/// Hashes `data` as an SSH `mpint` (RFC4251 §5): big-endian two's
/// complement, with a length prefix, stripped of leading zero bytes but
/// with a leading `0x00` reinstated if the high bit of the first remaining
/// byte would otherwise be set. `data` is treated as a non-negative
/// integer (the only case the KEX/key-derivation hashing in this crate
/// needs).
pub fn hash_mpint(hash_ctx: &mut dyn DynDigest, data: &[u8]) {
    let mut d = data;
    while !d.is_empty() && d[0] == 0 {
        d = &d[1..];
    }
    let pad = !d.is_empty() && (d[0] & 0x80) != 0;
    let len = d.len() + pad as usize;
    hash_ctx.update(&(len as u32).to_be_bytes());
    if pad {
        hash_ctx.update(&[0u8]);
    }
    hash_ctx.update(d);
}

/// Hashes the SSH-serialised form of `val`, without any extra length
/// prefix (the value is responsible for framing itself, as `Packet` does
/// via its own message-number byte).
pub fn hash_ser(hash_ctx: &mut dyn DynDigest, val: &impl SSHEncode) -> crate::error::Result<()> {
    let mut s = VecSink::new();
    val.enc(&mut s).map_err(Error::from)?;
    hash_ctx.update(&s.buf);
    Ok(())
}

/// As [`hash_ser`], but additionally hashes a u32 length prefix first, used
/// for hashing `I_C`/`I_S` (the raw KEXINIT payloads) into the exchange
/// hash per RFC4253 §8.
pub fn hash_ser_length(
    hash_ctx: &mut dyn DynDigest,
    val: &impl SSHEncode,
) -> crate::error::Result<()> {
    let mut s = VecSink::new();
    val.enc(&mut s).map_err(Error::from)?;
    hash_ctx.update(&(s.buf.len() as u32).to_be_bytes());
    hash_ctx.update(&s.buf);
    Ok(())
}

pub fn try_as_ascii_str(b: &[u8]) -> Result<&str, core::str::Utf8Error> {
    core::str::from_utf8(b)
}

use crate::error::Error;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::packets::{Packet, ParseContext};

    pub(crate) fn test_roundtrip(p: &Packet) {
        let mut buf = [0u8; 4096];
        let n = write_ssh(&mut buf, p).expect("encode");
        let ctx = ParseContext::new();
        let p2: Packet = packet_from_bytes(&buf[..n], &ctx).expect("decode");
        assert_eq!(format!("{p:?}"), format!("{p2:?}"));
    }

    pub(crate) fn assert_serialize_equal(a: &impl SSHEncode, b: &impl SSHEncode) {
        let mut ba = [0u8; 4096];
        let mut bb = [0u8; 4096];
        let na = write_ssh(&mut ba, a).unwrap();
        let nb = write_ssh(&mut bb, b).unwrap();
        assert_eq!(&ba[..na], &bb[..nb]);
    }

    #[test]
    fn mpint_padding() {
        let mut h = sha2::Sha256::default();
        // high bit set: needs a padding zero byte
        hash_mpint(&mut h, &[0x80]);
        // leading zero stripped
        let mut h2 = sha2::Sha256::default();
        hash_mpint(&mut h2, &[0x00, 0x01]);
    }
}
