//! Channel multiplexer (RFC4254): the set of open logical streams on one
//! transport, their flow-control windows, and their request FIFOs. The
//! `ChanHandle`/`ChanOpened`/`ChanFail` surface matches how
//! [`crate::behaviour`]'s traits refer to channels.
//!
//! A `Channel` never holds a handle back to the multiplexer: callers
//! address channels purely by [`ChanNum`], an index into [`Channels`]'s
//! slot table. A channel's slot is reclaimed (and its number made eligible
//! for reuse) only once both `close_sent` and `close_received` are true.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::packets::{
    self, ChannelClose, ChannelData, ChannelDataExt, ChannelEof, ChannelFailure, ChannelOpen,
    ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenType, ChannelRequest, ChannelSuccess,
    ChannelWindowAdjust,
};
use crate::sshnames::*;
use crate::sshwire::{BinString, TextString};
use crate::traffic::TrafSend;

/// A local channel number: an index into [`Channels`]'s slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChanNum(pub u32);

/// Handed to [`crate::behaviour`] callbacks so they can refer to the
/// channel a CHANNEL_OPEN is proposing without yet owning anything: the
/// slot already exists (in [`ChanState::Opening`]) by the time the
/// callback runs, so the handle is just its number plus the type that was
/// requested.
#[derive(Debug, Clone, Copy)]
pub struct ChanHandle(pub ChanNum);

/// RFC4254 §5.1 CHANNEL_OPEN_FAILURE reason codes. Named after the wire
/// constants directly rather than CamelCase, matching how callers in
/// [`crate::behaviour`] refer to them.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanFail {
    SSH_OPEN_ADMINISTRATIVELY_PROHIBITED,
    SSH_OPEN_CONNECT_FAILED,
    SSH_OPEN_UNKNOWN_CHANNEL_TYPE,
    SSH_OPEN_RESOURCE_SHORTAGE,
}

impl ChanFail {
    pub fn code(self) -> u32 {
        match self {
            ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED => SSH_OPEN_ADMINISTRATIVELY_PROHIBITED,
            ChanFail::SSH_OPEN_CONNECT_FAILED => SSH_OPEN_CONNECT_FAILED,
            ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE => SSH_OPEN_UNKNOWN_CHANNEL_TYPE,
            ChanFail::SSH_OPEN_RESOURCE_SHORTAGE => SSH_OPEN_RESOURCE_SHORTAGE,
        }
    }
}

/// A handler's verdict on an inbound CHANNEL_OPEN, returned synchronously
/// from a [`crate::behaviour`] callback.
#[derive(Debug)]
pub enum ChanOpened {
    Success(ChanHandle),
    Failure((ChanFail, ChanHandle)),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanState {
    /// We sent CHANNEL_OPEN (local open) or the peer's CHANNEL_OPEN has
    /// been allocated a slot but not yet confirmed/failed (remote open).
    Opening,
    Open,
    /// We've sent our half-close; the peer's direction is still live.
    EofSent,
    /// The peer has half-closed; ours is still live.
    EofReceived,
    /// Both directions have seen EOF.
    BothEof,
    /// CLOSE sent or received; waiting for the other side's CLOSE.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanSide {
    Session,
    DirectTcpip,
    ForwardedTcpip,
    X11,
}

impl ChanSide {
    pub fn type_name(self) -> &'static str {
        match self {
            ChanSide::Session => SSH_CHANNEL_SESSION,
            ChanSide::DirectTcpip => SSH_CHANNEL_DIRECT_TCPIP,
            ChanSide::ForwardedTcpip => SSH_CHANNEL_FORWARDED_TCPIP,
            ChanSide::X11 => SSH_CHANNEL_X11,
        }
    }
}

/// A pending CHANNEL_REQUEST awaiting its CHANNEL_SUCCESS/FAILURE, tracked
/// so replies are matched to requests strictly in FIFO order.
#[derive(Debug)]
struct PendingRequest {
    /// Only requests with `want_reply` occupy a FIFO slot; this field is
    /// retained for diagnostics.
    #[allow(dead_code)]
    kind: &'static str,
}

pub struct Channel {
    pub num: ChanNum,
    pub remote_num: u32,
    pub ty: ChanSide,
    pub state: ChanState,

    /// Credit we've granted the peer to send us data.
    pub local_window: u32,
    pub local_max_packet: u32,
    /// Credit the peer has granted us to send data.
    pub remote_window: u32,
    pub remote_max_packet: u32,

    /// Bytes consumed by the handler since the last WINDOW_ADJUST we sent;
    /// compared against half of `local_window_initial` to decide when to
    /// grant more window back to the peer.
    local_window_initial: u32,
    consumed_since_adjust: u32,

    eof_sent: bool,
    eof_received: bool,
    close_sent: bool,
    close_received: bool,

    /// Data queued by the application but not yet sent because
    /// `remote_window`/`remote_max_packet` didn't allow it all at once. A
    /// blocked channel's write doesn't block any other channel.
    pending_out: VecDeque<u8>,
    pending_ext_out: VecDeque<u8>,

    requests: VecDeque<PendingRequest>,
}

impl Channel {
    pub fn is_closed(&self) -> bool {
        self.close_sent && self.close_received
    }
}

const DEFAULT_WINDOW: u32 = 2 * 1024 * 1024;
const DEFAULT_MAX_PACKET: u32 = 32768;

pub struct Channels {
    slots: Vec<Option<Channel>>,
    initial_window: u32,
    max_packet: u32,
}

/// One channel's worth of freshly arrived data, handed to the caller to
/// dispatch to the application handler. `is_ext` distinguishes
/// CHANNEL_EXTENDED_DATA (stderr) from CHANNEL_DATA.
pub struct RecvData<'a> {
    pub num: ChanNum,
    pub data: &'a [u8],
    pub is_ext: bool,
    pub ext_code: u32,
}

impl Channels {
    pub fn new() -> Self {
        Channels { slots: Vec::new(), initial_window: DEFAULT_WINDOW, max_packet: DEFAULT_MAX_PACKET }
    }

    pub fn with_limits(initial_window: u32, max_packet: u32) -> Self {
        Channels { slots: Vec::new(), initial_window, max_packet }
    }

    fn alloc_slot(&mut self) -> ChanNum {
        for (i, s) in self.slots.iter().enumerate() {
            if s.is_none() {
                return ChanNum(i as u32);
            }
        }
        self.slots.push(None);
        ChanNum((self.slots.len() - 1) as u32)
    }

    pub fn get(&self, num: ChanNum) -> Result<&Channel> {
        self.slots
            .get(num.0 as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Error::UnknownChannel { num: num.0 })
    }

    fn get_mut(&mut self, num: ChanNum) -> Result<&mut Channel> {
        self.slots
            .get_mut(num.0 as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Error::UnknownChannel { num: num.0 })
    }

    /// Opens a channel from our side: allocates a slot, sends
    /// CHANNEL_OPEN, and returns the number to track until confirmation.
    pub fn open(&mut self, ty: ChanSide, open_ty: ChannelOpenType, s: &mut TrafSend) -> Result<ChanNum> {
        let num = self.alloc_slot();
        let chan = Channel {
            num,
            remote_num: 0,
            ty,
            state: ChanState::Opening,
            local_window: self.initial_window,
            local_max_packet: self.max_packet,
            remote_window: 0,
            remote_max_packet: 0,
            local_window_initial: self.initial_window,
            consumed_since_adjust: 0,
            eof_sent: false,
            eof_received: false,
            close_sent: false,
            close_received: false,
            pending_out: VecDeque::new(),
            pending_ext_out: VecDeque::new(),
            requests: VecDeque::new(),
        };
        self.slots[num.0 as usize] = Some(chan);
        s.send(ChannelOpen {
            num: num.0,
            initial_window: self.initial_window,
            max_packet: self.max_packet,
            ty: open_ty,
        })?;
        Ok(num)
    }

    /// A CHANNEL_OPEN arrived from the peer. Allocates a slot in
    /// `Opening` state and returns its handle; the caller (the connection
    /// layer) asks [`crate::behaviour`] whether to accept it, then calls
    /// [`Channels::accept`] or [`Channels::reject`].
    pub fn recv_open(&mut self, p: &ChannelOpen) -> Result<(ChanNum, ChanSide)> {
        let ty = match &p.ty {
            ChannelOpenType::Session(_) => ChanSide::Session,
            ChannelOpenType::DirectTcpip(_) => ChanSide::DirectTcpip,
            ChannelOpenType::ForwardedTcpip(_) => ChanSide::ForwardedTcpip,
            ChannelOpenType::Unknown(_) => {
                return Err(Error::ChannelFail { num: p.num, msg: "unknown channel type" });
            }
        };
        let num = self.alloc_slot();
        let chan = Channel {
            num,
            remote_num: p.num,
            ty,
            state: ChanState::Opening,
            local_window: self.initial_window,
            local_max_packet: self.max_packet,
            remote_window: p.initial_window,
            remote_max_packet: p.max_packet,
            local_window_initial: self.initial_window,
            consumed_since_adjust: 0,
            eof_sent: false,
            eof_received: false,
            close_sent: false,
            close_received: false,
            pending_out: VecDeque::new(),
            pending_ext_out: VecDeque::new(),
            requests: VecDeque::new(),
        };
        self.slots[num.0 as usize] = Some(chan);
        Ok((num, ty))
    }

    pub fn accept(&mut self, num: ChanNum, s: &mut TrafSend) -> Result<()> {
        let initial_window = self.initial_window;
        let max_packet = self.max_packet;
        let chan = self.get_mut(num)?;
        chan.state = ChanState::Open;
        s.send(ChannelOpenConfirmation {
            num: chan.remote_num,
            sender_num: num.0,
            initial_window,
            max_packet,
        })
    }

    pub fn reject(&mut self, num: ChanNum, reason: ChanFail, s: &mut TrafSend) -> Result<()> {
        let remote_num = self.get(num)?.remote_num;
        self.slots[num.0 as usize] = None;
        s.send(ChannelOpenFailure {
            num: remote_num,
            reason: reason.code(),
            desc: TextString(b""),
            lang: "",
        })
    }

    pub fn recv_confirmation(&mut self, p: &ChannelOpenConfirmation) -> Result<()> {
        let chan = self.get_mut(ChanNum(p.num))?;
        if chan.state != ChanState::Opening {
            return Err(Error::ChannelFail { num: p.num, msg: "confirmation in wrong state" });
        }
        chan.remote_num = p.sender_num;
        chan.remote_window = p.initial_window;
        chan.remote_max_packet = p.max_packet;
        chan.state = ChanState::Open;
        Ok(())
    }

    /// The peer refused our CHANNEL_OPEN; frees the slot.
    pub fn recv_failure(&mut self, p: &ChannelOpenFailure) -> Result<()> {
        self.get(ChanNum(p.num))?;
        self.slots[p.num as usize] = None;
        Ok(())
    }

    /// Queues `data` for the channel, sending as many CHANNEL_DATA packets
    /// as the current window/max-packet allow and buffering the rest.
    /// Returns the number of bytes actually accepted into the channel's
    /// send queue plus wire (always all of `data`; the window only
    /// affects when it's flushed to the wire, not whether it's accepted).
    pub fn send_data(&mut self, num: ChanNum, data: &[u8], s: &mut TrafSend) -> Result<usize> {
        {
            let chan = self.get_mut(num)?;
            if chan.eof_sent || chan.close_sent {
                return Err(Error::ChannelFail { num: num.0, msg: "channel half-closed for sending" });
            }
            chan.pending_out.extend(data);
        }
        self.flush_data(num, s)?;
        Ok(data.len())
    }

    pub fn send_extended_data(&mut self, num: ChanNum, code: u32, data: &[u8], s: &mut TrafSend) -> Result<usize> {
        {
            let chan = self.get_mut(num)?;
            if chan.eof_sent || chan.close_sent {
                return Err(Error::ChannelFail { num: num.0, msg: "channel half-closed for sending" });
            }
            chan.pending_ext_out.extend(data);
            let _ = code; // only SSH_EXTENDED_DATA_STDERR (1) is used in practice
        }
        self.flush_data(num, s)?;
        Ok(data.len())
    }

    /// Drains as much of a channel's pending outbound data as the current
    /// remote window/max-packet size allow. Call again after a
    /// WINDOW_ADJUST arrives to resume a parked send.
    pub fn flush_data(&mut self, num: ChanNum, s: &mut TrafSend) -> Result<()> {
        loop {
            let (remote_num, chunk) = {
                let chan = self.get_mut(num)?;
                if chan.pending_out.is_empty() || chan.remote_window == 0 {
                    break;
                }
                let n = (chan.pending_out.len() as u32).min(chan.remote_window).min(chan.remote_max_packet) as usize;
                let chunk: Vec<u8> = chan.pending_out.drain(..n).collect();
                chan.remote_window -= n as u32;
                (chan.remote_num, chunk)
            };
            s.send(ChannelData { num: remote_num, data: BinString(&chunk) })?;
        }
        loop {
            let (remote_num, chunk) = {
                let chan = self.get_mut(num)?;
                if chan.pending_ext_out.is_empty() || chan.remote_window == 0 {
                    break;
                }
                let n = (chan.pending_ext_out.len() as u32).min(chan.remote_window).min(chan.remote_max_packet) as usize;
                let chunk: Vec<u8> = chan.pending_ext_out.drain(..n).collect();
                chan.remote_window -= n as u32;
                (chan.remote_num, chunk)
            };
            s.send(ChannelDataExt { num: remote_num, code: 1, data: BinString(&chunk) })?;
        }
        Ok(())
    }

    pub fn has_pending_output(&self, num: ChanNum) -> Result<bool> {
        let chan = self.get(num)?;
        Ok(!chan.pending_out.is_empty() || !chan.pending_ext_out.is_empty())
    }

    /// Takes the packet by value rather than by reference: `ChannelData<'a>`
    /// only carries a `BinString<'a>` (a plain fat pointer, `Copy`), and an
    /// owned parameter lets the returned `RecvData<'a>` keep the payload's
    /// full lifetime instead of being pinned to a local reborrow of it.
    pub fn recv_data<'a>(&mut self, p: ChannelData<'a>) -> Result<RecvData<'a>> {
        let chan = self.get_mut(ChanNum(p.num))?;
        if chan.eof_received || chan.close_received {
            return Err(Error::ChannelFail { num: p.num, msg: "data after EOF/CLOSE" });
        }
        let len = p.data.0.len() as u32;
        if len > chan.local_window {
            return Err(Error::ChannelFail { num: p.num, msg: "window exceeded" });
        }
        chan.local_window -= len;
        chan.consumed_since_adjust += len;
        Ok(RecvData { num: ChanNum(p.num), data: p.data.0, is_ext: false, ext_code: 0 })
    }

    /// Rejects extended data after EOF: treated as a protocol error the
    /// same way ordinary data after EOF is.
    pub fn recv_extended_data<'a>(&mut self, p: ChannelDataExt<'a>) -> Result<RecvData<'a>> {
        let chan = self.get_mut(ChanNum(p.num))?;
        if chan.eof_received || chan.close_received {
            return Err(Error::ChannelFail { num: p.num, msg: "extended data after EOF/CLOSE" });
        }
        let len = p.data.0.len() as u32;
        if len > chan.local_window {
            return Err(Error::ChannelFail { num: p.num, msg: "window exceeded" });
        }
        chan.local_window -= len;
        chan.consumed_since_adjust += len;
        Ok(RecvData { num: ChanNum(p.num), data: p.data.0, is_ext: true, ext_code: p.code })
    }

    /// Grants back window credit for bytes the application has consumed,
    /// once consumption has dropped the window below half its initial
    /// size.
    pub fn maybe_adjust_window(&mut self, num: ChanNum, s: &mut TrafSend) -> Result<()> {
        let (remote_num, adjust) = {
            let chan = self.get_mut(num)?;
            if chan.consumed_since_adjust < chan.local_window_initial / 2 {
                return Ok(());
            }
            let adjust = chan.consumed_since_adjust;
            chan.local_window += adjust;
            chan.consumed_since_adjust = 0;
            (chan.remote_num, adjust)
        };
        s.send(ChannelWindowAdjust { num: remote_num, adjust })
    }

    pub fn recv_window_adjust(&mut self, p: &ChannelWindowAdjust, s: &mut TrafSend) -> Result<()> {
        let num = ChanNum(p.num);
        {
            let chan = self.get_mut(num)?;
            chan.remote_window = chan.remote_window.checked_add(p.adjust).ok_or(Error::ChannelFail {
                num: p.num,
                msg: "window overflow",
            })?;
        }
        self.flush_data(num, s)
    }

    pub fn send_eof(&mut self, num: ChanNum, s: &mut TrafSend) -> Result<()> {
        let remote_num = {
            let chan = self.get_mut(num)?;
            if chan.eof_sent {
                return Ok(());
            }
            chan.eof_sent = true;
            chan.state = match chan.state {
                ChanState::EofReceived | ChanState::BothEof => ChanState::BothEof,
                _ => ChanState::EofSent,
            };
            chan.remote_num
        };
        s.send(ChannelEof { num: remote_num })
    }

    pub fn recv_eof(&mut self, p: &ChannelEof) -> Result<()> {
        let chan = self.get_mut(ChanNum(p.num))?;
        chan.eof_received = true;
        chan.state = match chan.state {
            ChanState::EofSent | ChanState::BothEof => ChanState::BothEof,
            _ => ChanState::EofReceived,
        };
        Ok(())
    }

    /// Sends CLOSE; the slot is reclaimed once the peer's CLOSE has also
    /// arrived (or immediately, if it already has).
    pub fn send_close(&mut self, num: ChanNum, s: &mut TrafSend) -> Result<()> {
        let (remote_num, done) = {
            let chan = self.get_mut(num)?;
            if chan.close_sent {
                return Ok(());
            }
            chan.close_sent = true;
            chan.state = ChanState::Closing;
            (chan.remote_num, chan.is_closed())
        };
        s.send(ChannelClose { num: remote_num })?;
        if done {
            self.slots[num.0 as usize] = None;
            debug!("channel {} closed", num.0);
        }
        Ok(())
    }

    pub fn recv_close(&mut self, p: &ChannelClose, s: &mut TrafSend) -> Result<()> {
        let num = ChanNum(p.num);
        let (remote_num, already_sent) = {
            let chan = self.get_mut(num)?;
            chan.close_received = true;
            (chan.remote_num, chan.close_sent)
        };
        if !already_sent {
            // RFC4254 §5.3: a CLOSE may be sent in response immediately,
            // without waiting for the application to finish its side.
            self.send_close(num, s)?;
        } else {
            self.slots[num.0 as usize] = None;
        }
        let _ = remote_num;
        Ok(())
    }

    /// Transport is tearing down (DISCONNECT or socket EOF): force-close
    /// every channel without further wire traffic and return their
    /// numbers so the caller can notify handlers.
    pub fn force_close_all(&mut self) -> Vec<ChanNum> {
        let mut nums = Vec::new();
        for (i, s) in self.slots.iter_mut().enumerate() {
            if s.is_some() {
                nums.push(ChanNum(i as u32));
            }
            *s = None;
        }
        nums
    }

    pub fn send_request(
        &mut self,
        num: ChanNum,
        req: packets::ChannelReqType,
        want_reply: bool,
        s: &mut TrafSend,
    ) -> Result<()> {
        let remote_num = {
            let chan = self.get_mut(num)?;
            if want_reply {
                chan.requests.push_back(PendingRequest { kind: "outbound" });
            }
            chan.remote_num
        };
        s.send(ChannelRequest { num: remote_num, want_reply, req })
    }

    pub fn send_success(&mut self, num: ChanNum, s: &mut TrafSend) -> Result<()> {
        let remote_num = self.get(num)?.remote_num;
        s.send(ChannelSuccess { num: remote_num })
    }

    pub fn send_failure(&mut self, num: ChanNum, s: &mut TrafSend) -> Result<()> {
        let remote_num = self.get(num)?.remote_num;
        s.send(ChannelFailure { num: remote_num })
    }

    /// Matches an inbound CHANNEL_SUCCESS/FAILURE against the oldest
    /// pending request on that channel, maintaining FIFO order with
    /// respect to the request stream.
    pub fn recv_request_reply(&mut self, num: ChanNum) -> Result<()> {
        let chan = self.get_mut(num)?;
        if chan.requests.pop_front().is_none() {
            warn!("unexpected channel reply on channel {}", num.0);
        }
        Ok(())
    }

    pub fn count_open(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::KeyState;
    use crate::traffic::Traffic;

    fn send_harness() -> (Traffic, KeyState) {
        (Traffic::new(), KeyState::new_cleartext())
    }

    #[test]
    fn window_flow_control_matches_scenario() {
        let (mut traffic, mut keys) = send_harness();
        let mut chans = Channels::with_limits(8, 4);
        let mut s = TrafSend::new(&mut traffic, &mut keys);

        let num = chans.open(ChanSide::Session, ChannelOpenType::Session(packets::SessionOpen {}), &mut s).unwrap();
        // Pretend the peer confirmed with window=8, max_packet=4 (mirrors
        // our own limits for this test).
        chans
            .recv_confirmation(&ChannelOpenConfirmation { num: num.0, sender_num: 99, initial_window: 8, max_packet: 4 })
            .unwrap();

        chans.send_data(num, &[0u8; 12], &mut s).unwrap();
        assert_eq!(chans.get(num).unwrap().remote_window, 0);
        assert_eq!(chans.get(num).unwrap().pending_out.len(), 4);

        chans.recv_window_adjust(&ChannelWindowAdjust { num: 99, adjust: 4 }, &mut s).unwrap();
        assert_eq!(chans.get(num).unwrap().pending_out.len(), 0);
        assert_eq!(chans.get(num).unwrap().remote_window, 0);
    }

    #[test]
    fn data_after_eof_is_protocol_error() {
        let (mut traffic, mut keys) = send_harness();
        let mut chans = Channels::new();
        let mut s = TrafSend::new(&mut traffic, &mut keys);
        let (num, _) = chans
            .recv_open(&ChannelOpen {
                num: 5,
                initial_window: 1000,
                max_packet: 100,
                ty: ChannelOpenType::Session(packets::SessionOpen {}),
            })
            .unwrap();
        chans.accept(num, &mut s).unwrap();
        chans.recv_eof(&ChannelEof { num: 5 }).unwrap();
        let data = ChannelData { num: 5, data: BinString(b"late") };
        assert!(chans.recv_data(data).is_err());
    }

    #[test]
    fn close_reclaims_slot_for_reuse() {
        let (mut traffic, mut keys) = send_harness();
        let mut chans = Channels::new();
        let mut s = TrafSend::new(&mut traffic, &mut keys);
        let (num, _) = chans
            .recv_open(&ChannelOpen {
                num: 0,
                initial_window: 1000,
                max_packet: 100,
                ty: ChannelOpenType::Session(packets::SessionOpen {}),
            })
            .unwrap();
        chans.accept(num, &mut s).unwrap();
        chans.recv_close(&ChannelClose { num: 0 }, &mut s).unwrap();
        assert_eq!(chans.count_open(), 0);

        let (num2, _) = chans
            .recv_open(&ChannelOpen {
                num: 1,
                initial_window: 1000,
                max_packet: 100,
                ty: ChannelOpenType::Session(packets::SessionOpen {}),
            })
            .unwrap();
        assert_eq!(num2, num);
    }
}
