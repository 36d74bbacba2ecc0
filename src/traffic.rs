//! Binary Packet Protocol framing (RFC4253 §6): turns a byte stream into
//! a sequence of decrypted payloads on the way in, and payloads into
//! encrypted wire bytes on the way out. Splits into a `Traffic` buffer
//! that owns the raw byte queues and a `TrafSend` handle that the
//! KEX/auth/channel state machines use to queue outbound packets without
//! reaching into the buffer's internals directly.
//!
//! This crate is sans-I/O: `Traffic` never touches a socket. A caller
//! (the `tokio` member, or a test) feeds inbound bytes via [`Traffic::input`]
//! and drains outbound bytes via [`Traffic::output`].

use log::trace;
use pretty_hex::PrettyHex;

use crate::encrypt::{Keys, KeyState};
use crate::error::{Error, Result};
use crate::ident::RemoteVersion;
use crate::packets::Packet;
use crate::sshwire::write_ssh_vec;

/// RFC4253 §6.1: implementations SHOULD support packets of at least 35000
/// bytes; this crate also enforces it as the inbound maximum.
pub const MAX_PACKET_LEN: u32 = 35000;
const MIN_PADDING: usize = 4;

/// Where [`Traffic::input`] is up to in decoding the next packet.
enum Decode {
    /// Waiting for 4 ciphertext bytes of the length field.
    Length,
    /// Length decrypted; waiting for `len` body bytes plus `mac_len` tag
    /// bytes.
    Body { len: u32, mac_len: usize },
}

pub struct Traffic {
    remote_version: RemoteVersion,
    inbuf: Vec<u8>,
    decode: Decode,
    /// A fully decoded, not yet dispatched payload (message-number byte
    /// included, matching what [`crate::packets::Packet`] decodes).
    payload: Option<Vec<u8>>,
    outbuf: Vec<u8>,
    outpos: usize,
    bytes_in: u64,
    bytes_out: u64,
}

impl Traffic {
    pub fn new() -> Self {
        Traffic {
            remote_version: RemoteVersion::new(),
            inbuf: Vec::new(),
            decode: Decode::Length,
            payload: None,
            outbuf: Vec::new(),
            outpos: 0,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn remote_version(&self) -> &RemoteVersion {
        &self.remote_version
    }

    /// Queues our cleartext identification line (RFC4253 §4.2). Must be
    /// called before any packet is sent, and bypasses the codec entirely:
    /// no length/padding/MAC framing applies to this line.
    pub fn send_version(&mut self) {
        self.outbuf.extend_from_slice(crate::ident::OUR_VERSION);
        self.outbuf.extend_from_slice(b"\r\n");
    }

    /// Feeds newly received bytes. Consumes the pre-KEX identification
    /// line first (RFC4253 §4.2 version exchange), then accumulates
    /// binary packet bytes and attempts to decode one payload. Returns the
    /// number of bytes consumed from `buf` (always all of it; excess
    /// beyond one decoded payload is buffered for the next call).
    pub fn input(&mut self, keys: &mut KeyState, buf: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        let mut buf = buf;
        if !self.remote_version.ready() {
            let n = self.remote_version.consume(buf)?;
            consumed += n;
            buf = &buf[n..];
            if !self.remote_version.ready() {
                return Ok(consumed);
            }
        }
        self.inbuf.extend_from_slice(buf);
        consumed += buf.len();
        self.try_decode(keys)?;
        Ok(consumed)
    }

    fn try_decode(&mut self, keys: &mut KeyState) -> Result<()> {
        if self.payload.is_some() {
            // One payload must be dispatched (done_payload) before the
            // next is decoded, matching the single in-flight payload
            // model the transport state machine drives.
            return Ok(());
        }
        loop {
            match self.decode {
                Decode::Length => {
                    if self.inbuf.len() < 4 {
                        return Ok(());
                    }
                    let mut len_bytes: [u8; 4] = self.inbuf[..4].try_into().expect("checked len");
                    let len = keys.decrypt_len(&mut len_bytes)?;
                    if len > MAX_PACKET_LEN || (len as usize) < 1 + MIN_PADDING {
                        return Err(Error::WireFormat {
                            source: crate::sshwire::WireError::BadPacketLength,
                        });
                    }
                    let block = keys.block_size_encrypt().max(8);
                    if ((len as usize) + 4) % block != 0 {
                        return Err(Error::WireFormat {
                            source: crate::sshwire::WireError::BadPacketLength,
                        });
                    }
                    self.inbuf[..4].copy_from_slice(&len_bytes);
                    self.decode = Decode::Body { len, mac_len: keys.mac_len() };
                }
                Decode::Body { len, mac_len } => {
                    let need = 4 + len as usize + mac_len;
                    if self.inbuf.len() < need {
                        return Ok(());
                    }
                    let mut packet: Vec<u8> = self.inbuf.drain(..need).collect();
                    let (head, tag) = packet.split_at_mut(4 + len as usize);
                    let (length, rest) = head.split_at_mut(4);
                    let length: &[u8; 4] = &(*length).try_into().expect("checked len");
                    keys.decrypt(length, rest, tag)?;
                    self.bytes_in += need as u64;
                    let padding_len = rest[0] as usize;
                    if padding_len < MIN_PADDING || 1 + padding_len > rest.len() {
                        return Err(Error::WireFormat {
                            source: crate::sshwire::WireError::BadPadding,
                        });
                    }
                    let payload_end = rest.len() - padding_len;
                    let payload = rest[1..payload_end].to_vec();
                    trace!("decoded payload, {} bytes", payload.len());
                    trace!("{:?}", payload.as_slice().hex_dump());
                    self.payload = Some(payload);
                    self.decode = Decode::Length;
                    return Ok(());
                }
            }
        }
    }

    /// The currently decoded payload (message-number byte first), if any
    /// is waiting to be dispatched.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Call once the current payload has been fully handled, to allow the
    /// next packet to be decoded out of any buffered bytes.
    pub fn done_payload(&mut self, keys: &mut KeyState) -> Result<()> {
        self.payload = None;
        self.try_decode(keys)
    }

    pub fn ready_input(&self) -> bool {
        self.payload.is_none()
    }

    /// Copies up to `buf.len()` bytes of pending outbound wire data into
    /// `buf`, returning the number of bytes written.
    pub fn output(&mut self, buf: &mut [u8]) -> usize {
        let avail = &self.outbuf[self.outpos..];
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        self.outpos += n;
        if self.outpos == self.outbuf.len() {
            self.outbuf.clear();
            self.outpos = 0;
        }
        n
    }

    pub fn output_pending(&self) -> bool {
        self.outpos < self.outbuf.len()
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }
}

impl Default for Traffic {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle used by the KEX/auth/channel state machines to queue outbound
/// packets. Borrows the traffic buffer and the active key state together
/// so a packet can be framed and encrypted in one call, and so a rekey
/// swap (component B's "single indivisible operation") happens exactly at
/// a call boundary, never mid-packet.
pub struct TrafSend<'t, 'k> {
    traffic: &'t mut Traffic,
    keys: &'k mut KeyState,
}

impl<'t, 'k> TrafSend<'t, 'k> {
    pub fn new(traffic: &'t mut Traffic, keys: &'k mut KeyState) -> Self {
        TrafSend { traffic, keys }
    }

    /// Encodes, pads, encrypts and queues `payload` for output.
    pub fn send<'p, P: Into<Packet<'p>>>(&mut self, payload: P) -> Result<()> {
        let packet: Packet<'p> = payload.into();
        let plain = write_ssh_vec(&packet);
        trace!("sending payload, {} bytes", plain.len());
        trace!("{:?}", plain.as_slice().hex_dump());
        self.send_raw(&plain)
    }

    fn send_raw(&mut self, plain: &[u8]) -> Result<()> {
        let block = self.keys.block_size_encrypt().max(8);
        // packet_length counts padding_length(1) + payload + padding.
        let min_total = 4 + 1 + plain.len() + MIN_PADDING;
        let total = min_total.div_ceil(block) * block;
        let padding_len = total - 4 - 1 - plain.len();
        let packet_len = (1 + plain.len() + padding_len) as u32;
        if packet_len > MAX_PACKET_LEN {
            return Err(Error::NoRoom);
        }

        let mut length = packet_len.to_be_bytes();
        let mut rest = Vec::with_capacity(1 + plain.len() + padding_len);
        rest.push(padding_len as u8);
        rest.extend_from_slice(plain);
        let mut pad = vec![0u8; padding_len];
        crate::random::fill_random(&mut pad)?;
        rest.extend_from_slice(&pad);

        let tag = self.keys.encrypt(&mut length, &mut rest)?;
        self.traffic.bytes_out += (4 + rest.len() + tag.len()) as u64;
        self.traffic.outbuf.extend_from_slice(&length);
        self.traffic.outbuf.extend_from_slice(&rest);
        self.traffic.outbuf.extend_from_slice(&tag);
        Ok(())
    }

    /// Installs freshly derived keys (RFC4253 §7's NEWKEYS swap). Affects
    /// both directions at once: by the time this is called (on receipt of
    /// the peer's NEWKEYS, see [`crate::kex::Kex::handle_newkeys`]) nothing
    /// else is queued to send under the old context, since the transport
    /// state machine pauses application writes for the duration of a
    /// rekey.
    pub fn rekey(&mut self, keys: Keys) {
        self.keys.rekey(keys);
    }

    pub fn reset_seqs(&mut self) {
        self.keys.reset_seqs();
    }

    pub fn seq_encrypt(&self) -> u32 {
        self.keys.seq_encrypt()
    }

    pub fn seq_decrypt(&self) -> u32 {
        self.keys.seq_decrypt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets;

    #[test]
    fn cleartext_roundtrip() {
        let mut enc_keys = KeyState::new_cleartext();
        let mut traffic = Traffic::new();
        {
            let mut s = TrafSend::new(&mut traffic, &mut enc_keys);
            s.send(packets::Ignore {}).unwrap();
        }
        assert!(traffic.output_pending());
        let mut wire = vec![0u8; 256];
        let n = traffic.output(&mut wire);
        wire.truncate(n);

        let mut dec_keys = KeyState::new_cleartext();
        let mut rx = Traffic::new();
        // Feed the version line first so input() moves past it.
        rx.input(&mut dec_keys, b"SSH-2.0-test\r\n").unwrap();
        rx.input(&mut dec_keys, &wire).unwrap();
        let payload = rx.payload().expect("decoded a payload");
        let ctx = packets::ParseContext::new();
        let p: Packet = crate::sshwire::packet_from_bytes(payload, &ctx).unwrap();
        assert!(matches!(p, Packet::Ignore(_)));
    }
}
