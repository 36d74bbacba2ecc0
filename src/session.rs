//! Transport state machine (RFC4253), service request dispatch (RFC4253
//! §10), and the sans-I/O half of the per-connection supervisor: the piece
//! that ties [`crate::traffic::Traffic`], [`crate::kex::Kex`],
//! [`crate::cliauth::CliAuth`]/[`crate::servauth::ServAuth`] and
//! [`crate::channel::Channels`] together into one [`Session`] a caller
//! drives with `input`/`output`/`progress`.
//!
//! This module never touches a socket: [`Session::input`] takes bytes
//! already read from somewhere, [`Session::output`] hands back bytes ready
//! to write, and [`Session::progress`] is what actually decodes a payload
//! and dispatches it, returning the [`Event`]s the driving code should
//! surface to its application.

use std::time::Instant;

use log::{debug, trace, warn};

use crate::behaviour::Behaviour;
use crate::channel::{ChanFail, ChanHandle, ChanNum, ChanOpened, ChanSide, Channels, RecvData};
use crate::cliauth::CliAuth;
use crate::config::Config;
use crate::encrypt::KeyState;
use crate::error::{Error, Result, TrapBug};
use crate::kex::{AlgoConfig, Kex, SessId};
use crate::packets::{self, Category, ChannelReqType, DirectTcpip, Packet, ParseContext};
use crate::servauth::ServAuth;
use crate::sshnames::SSH_SERVICE_CONNECTION;
use crate::sshwire::{packet_from_bytes, TextString};
use crate::traffic::{Traffic, TrafSend};

/// Where the transport state machine is up to. Distinct from [`Kex`]
/// (which tracks one handshake in isolation and can be non-`Idle` in any
/// phase, e.g. during a rekey while `Running`): `Phase` is about whether
/// authentication and the connection protocol have started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Before the first `NEWKEYS`: no service has been requested yet.
    PreAuth,
    /// Authenticated; `ssh-connection` is in effect and channel traffic is
    /// legal.
    Running,
    /// DISCONNECT sent or received, or the caller gave up. No further
    /// input/output is produced.
    Closed,
}

enum AuthSide {
    Client(CliAuth),
    Server(ServAuth),
}

/// One thing that happened while draining input that the application needs
/// to know about. Channel data is copied into an owned `Vec<u8>` here
/// rather than handed out as a borrow of the decoded payload, since
/// [`crate::behaviour::CliBehaviour`]/[`crate::behaviour::ServBehaviour`]
/// have no data-delivery hooks of their own for the caller to be invoked
/// through during `progress`.
#[derive(Debug)]
pub enum Event {
    Authenticated,
    Banner { message: String, language: String },
    ChannelOpenConfirmed(ChanNum),
    ChannelOpenFailed(ChanNum),
    ChannelData { num: ChanNum, data: Vec<u8> },
    ChannelExtData { num: ChanNum, ext_code: u32, data: Vec<u8> },
    ChannelEof(ChanNum),
    ChannelClose(ChanNum),
    /// The peer sent DISCONNECT, or a fatal local error tore the transport
    /// down. `reason` is the RFC4253 §11.1 code when known.
    Disconnected { reason: Option<u32>, desc: String },
}

/// One SSH connection: either end, client or server. Sans-I/O; feed bytes
/// in with [`Session::input`], drain bytes to write with
/// [`Session::output`], and call [`Session::progress`] whenever
/// [`Session::ready_input`] was true before the last `input` call, to
/// decode and dispatch whatever packet arrived.
pub struct Session {
    traffic: Traffic,
    keys: KeyState,
    kex: Kex,
    algo_conf: AlgoConfig,
    is_client: bool,
    auth: AuthSide,
    channels: Channels,
    session_id: Option<SessId>,
    parse_ctx: ParseContext,
    phase: Phase,
    config: Config,
    started: bool,
    bytes_at_epoch: u64,
    /// When the current rekey epoch began, for [`Config::rekey_time_seconds`].
    /// `None` until the first `NEWKEYS`; the caller supplies the clock via
    /// [`Session::progress`] so this core stays sans-I/O.
    epoch_started: Option<Instant>,
}

impl Session {
    pub fn new_client(config: Config) -> Self {
        Self::new(config, true)
    }

    pub fn new_server(config: Config) -> Self {
        Self::new(config, false)
    }

    fn new(config: Config, is_client: bool) -> Self {
        let algo_conf = config.algo_config(is_client);
        let channels = Channels::with_limits(config.initial_window_size, config.max_packet_size);
        let auth = if is_client {
            AuthSide::Client(CliAuth::new())
        } else {
            AuthSide::Server(ServAuth::new(config.max_auth_requests))
        };
        Session {
            traffic: Traffic::new(),
            keys: KeyState::new_cleartext(),
            kex: Kex::new(),
            algo_conf,
            is_client,
            auth,
            channels,
            session_id: None,
            parse_ctx: ParseContext::new(),
            phase: Phase::PreAuth,
            config,
            started: false,
            bytes_at_epoch: 0,
            epoch_started: None,
        }
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// Queues the identification line and the first `KEXINIT`. Idempotent;
    /// call once before any `input`/`output`.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.traffic.send_version();
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.kex.send_kexinit(&self.algo_conf, &mut s)
    }

    /// Feeds inbound bytes. Returns the number of bytes consumed; any
    /// excess is buffered internally for the next call.
    pub fn input(&mut self, buf: &[u8]) -> Result<usize> {
        self.traffic.input(&mut self.keys, buf)
    }

    /// Whether [`Session::input`] will actually decode a new payload (it
    /// won't if one is already waiting to be dispatched via
    /// [`Session::progress`]).
    pub fn ready_input(&self) -> bool {
        self.traffic.ready_input()
    }

    /// Drains queued outbound wire bytes into `buf`, returning how many
    /// were written.
    pub fn output(&mut self, buf: &mut [u8]) -> usize {
        self.traffic.output(buf)
    }

    pub fn output_pending(&self) -> bool {
        self.traffic.output_pending()
    }

    /// Decodes and dispatches one waiting payload (if any), drives
    /// client-side auth kickoff and rekey triggers, and returns the
    /// [`Event`]s produced. Call whenever a prior [`Session::input`] may
    /// have completed a payload. `now` only feeds the rekey-by-time check;
    /// this core never reads the clock itself.
    pub fn progress(&mut self, b: &mut Behaviour, now: Instant) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        if matches!(self.phase, Phase::Closed) {
            return Ok(events);
        }

        if let Some(payload) = self.traffic.payload() {
            let payload = payload.to_vec();
            match self.handle_payload(&payload, b, &mut events, now) {
                Ok(()) => {}
                Err(e) if e.is_channel_local() => {
                    warn!("channel error: {e}");
                    self.force_close_errored_channel(&e, &mut events);
                }
                Err(e) if e.is_auth_recoverable() => {
                    warn!("authentication attempt failed: {e}");
                }
                Err(e) => {
                    self.fail(&e, b, &mut events);
                    self.traffic.done_payload(&mut self.keys)?;
                    return Err(e);
                }
            }
            self.traffic.done_payload(&mut self.keys)?;
        }

        if self.phase == Phase::PreAuth && self.session_id.is_some() {
            if let AuthSide::Client(auth) = &mut self.auth {
                let cb = b.client()?;
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                if let Err(e) = auth.progress(&mut s, cb) {
                    self.fail(&e, b, &mut events);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.maybe_rekey(now) {
            self.fail(&e, b, &mut events);
            return Err(e);
        }

        Ok(events)
    }

    fn force_close_errored_channel(&mut self, e: &Error, events: &mut Vec<Event>) {
        let num = match e {
            Error::ChannelFail { num, .. } | Error::UnknownChannel { num } => ChanNum(*num),
            _ => return,
        };
        if self.channels.get(num).is_ok() {
            let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
            let _ = self.channels.send_close(num, &mut s);
            events.push(Event::ChannelClose(num));
        }
    }

    /// Best-effort DISCONNECT plus local teardown for a fatal error.
    fn fail(&mut self, e: &Error, b: &mut Behaviour, events: &mut Vec<Event>) {
        if matches!(self.phase, Phase::Closed) {
            return;
        }
        let reason = e.disconnect_reason();
        let desc = e.to_string();
        if let Some(reason) = reason {
            let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
            let _ = s.send(packets::Disconnect {
                reason,
                desc: TextString(desc.as_bytes()),
                lang: TextString(b""),
            });
        }
        self.phase = Phase::Closed;
        for num in self.channels.force_close_all() {
            events.push(Event::ChannelClose(num));
        }
        b.disconnected(TextString(desc.as_bytes()));
        events.push(Event::Disconnected { reason, desc });
    }

    /// Sends our own DISCONNECT and marks the transport closed. Use to tear
    /// the connection down cleanly rather than waiting for an error.
    pub fn disconnect(&mut self, reason: u32, desc: &str) -> Result<()> {
        if matches!(self.phase, Phase::Closed) {
            return Ok(());
        }
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        let r = s.send(packets::Disconnect { reason, desc: TextString(desc.as_bytes()), lang: TextString(b"") });
        self.phase = Phase::Closed;
        self.channels.force_close_all();
        r
    }

    fn check_category(&self, cat: Category) -> Result<()> {
        match cat {
            Category::All => Ok(()),
            Category::Kex => {
                if matches!(self.kex, Kex::Idle) {
                    Err(Error::PacketWrong)
                } else {
                    Ok(())
                }
            }
            Category::Auth => {
                if self.session_id.is_some() {
                    Ok(())
                } else {
                    Err(Error::PacketWrong)
                }
            }
            Category::Sess => {
                if self.phase == Phase::Running {
                    Ok(())
                } else {
                    Err(Error::PacketWrong)
                }
            }
        }
    }

    fn handle_payload(
        &mut self,
        payload: &[u8],
        b: &mut Behaviour,
        events: &mut Vec<Event>,
        now: Instant,
    ) -> Result<()> {
        let packet: Packet = packet_from_bytes(payload, &self.parse_ctx)?;
        self.check_category(packet.category())?;
        match packet {
            Packet::Disconnect(p) => {
                let desc = p.desc.as_str().to_string();
                b.disconnected(p.desc);
                self.phase = Phase::Closed;
                for num in self.channels.force_close_all() {
                    events.push(Event::ChannelClose(num));
                }
                events.push(Event::Disconnected { reason: Some(p.reason), desc });
                Ok(())
            }
            Packet::Ignore(_) => Ok(()),
            Packet::Unimplemented(_) => Ok(()),
            Packet::DebugPacket(p) => {
                trace!("peer debug: {}", p.message.as_str());
                Ok(())
            }
            Packet::ServiceRequest(p) => self.recv_service_request(&p),
            Packet::ServiceAccept(p) => {
                trace!("service accepted: {}", p.name);
                Ok(())
            }
            Packet::KexInit(p) => self.recv_kexinit(p),
            Packet::NewKeys(_) => self.recv_newkeys(now),
            Packet::KexDHInit(p) => self.recv_kexdhinit(&p, b),
            Packet::KexDHReply(p) => self.recv_kexdhreply(&p, b),
            Packet::UserauthRequest(p) => self.recv_userauth_request(&p, b, events),
            Packet::UserauthFailure(p) => self.recv_userauth_failure(&p, b),
            Packet::UserauthSuccess(_) => self.recv_userauth_success(b, events),
            Packet::UserauthBanner(p) => self.recv_banner(&p, b, events),
            Packet::ExtInfo(p) => {
                if let AuthSide::Client(auth) = &mut self.auth {
                    auth.handle_ext_info(&p);
                }
                Ok(())
            }
            Packet::Userauth60(p) => self.recv_userauth60(&p, b),
            Packet::UserauthInfoResponse(p) => self.recv_userauth_info_response(&p, b, events),
            Packet::ChannelOpen(p) => self.recv_channel_open(&p, b, events),
            Packet::ChannelOpenConfirmation(p) => {
                self.channels.recv_confirmation(&p)?;
                events.push(Event::ChannelOpenConfirmed(ChanNum(p.num)));
                Ok(())
            }
            Packet::ChannelOpenFailure(p) => {
                let num = ChanNum(p.num);
                self.channels.recv_failure(&p)?;
                events.push(Event::ChannelOpenFailed(num));
                Ok(())
            }
            Packet::ChannelWindowAdjust(p) => {
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                self.channels.recv_window_adjust(&p, &mut s)
            }
            Packet::ChannelData(p) => {
                let num = ChanNum(p.num);
                let RecvData { data, .. } = self.channels.recv_data(p)?;
                events.push(Event::ChannelData { num, data: data.to_vec() });
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                self.channels.maybe_adjust_window(num, &mut s)
            }
            Packet::ChannelDataExt(p) => {
                let num = ChanNum(p.num);
                let RecvData { data, ext_code, .. } = self.channels.recv_extended_data(p)?;
                events.push(Event::ChannelExtData { num, ext_code, data: data.to_vec() });
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                self.channels.maybe_adjust_window(num, &mut s)
            }
            Packet::ChannelEof(p) => {
                let num = ChanNum(p.num);
                self.channels.recv_eof(&p)?;
                events.push(Event::ChannelEof(num));
                Ok(())
            }
            Packet::ChannelClose(p) => {
                let num = ChanNum(p.num);
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                self.channels.recv_close(&p, &mut s)?;
                events.push(Event::ChannelClose(num));
                Ok(())
            }
            Packet::ChannelRequest(p) => self.recv_channel_request(&p, b),
            Packet::ChannelSuccess(p) => self.channels.recv_request_reply(ChanNum(p.num)),
            Packet::ChannelFailure(p) => self.channels.recv_request_reply(ChanNum(p.num)),
        }
    }

    fn recv_kexinit(&mut self, p: packets::KexInit) -> Result<()> {
        let remote_version =
            self.traffic.remote_version().version().map(|v| v.to_vec()).trap()?;
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.kex.handle_kexinit(p, self.is_client, &self.algo_conf, &remote_version, &mut s)
    }

    fn recv_newkeys(&mut self, now: Instant) -> Result<()> {
        {
            let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
            self.kex.handle_newkeys(&mut self.session_id, &mut s)?;
        }
        self.epoch_started = Some(now);
        self.bytes_at_epoch = self.traffic.bytes_in() + self.traffic.bytes_out();
        Ok(())
    }

    fn recv_kexdhinit(&mut self, p: &packets::KexDHInit, b: &mut Behaviour) -> Result<()> {
        if self.is_client {
            return Err(Error::PacketWrong);
        }
        let hostkeys = b.server()?.hostkeys()?;
        let send_ext_info = {
            let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
            self.kex.handle_kexdhinit(p, &mut s, hostkeys)?;
            self.kex.send_ext_info()
        };
        if send_ext_info {
            let algs = (&self.config.host_key_algorithms).into();
            let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
            s.send(packets::ExtInfo { server_sig_algs: Some(algs) })?;
        }
        Ok(())
    }

    fn recv_kexdhreply(&mut self, p: &packets::KexDHReply, b: &mut Behaviour) -> Result<()> {
        if !self.is_client {
            return Err(Error::PacketWrong);
        }
        let cb = b.client()?;
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.kex.handle_kexdhreply(p, &mut s, |k| cb.valid_hostkey(k).unwrap_or(false))
    }

    fn recv_service_request(&mut self, req: &packets::ServiceRequest) -> Result<()> {
        if self.is_client {
            return Err(Error::PacketWrong);
        }
        match &mut self.auth {
            AuthSide::Server(auth) if !auth.is_authenticated() => {
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                auth.recv_service_request(req, &mut s)
            }
            AuthSide::Server(_) => {
                if req.name != SSH_SERVICE_CONNECTION {
                    return Err(Error::ServiceNotAvailable { name: "requested service" });
                }
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                s.send(packets::ServiceAccept { name: SSH_SERVICE_CONNECTION })
            }
            AuthSide::Client(_) => unreachable!("client side never receives SERVICE_REQUEST"),
        }
    }

    fn recv_userauth_request(
        &mut self,
        req: &packets::UserauthRequest,
        b: &mut Behaviour,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        if self.is_client {
            return Err(Error::PacketWrong);
        }
        let sess_id = self.session_id.clone().trap()?;
        let sb = b.server()?;
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        let AuthSide::Server(auth) = &mut self.auth else { unreachable!() };
        auth.recv_userauth_request(req, &sess_id, &mut s, sb)?;
        if auth.is_authenticated() {
            self.phase = Phase::Running;
            events.push(Event::Authenticated);
        }
        Ok(())
    }

    fn recv_userauth_failure(&mut self, f: &packets::UserauthFailure, b: &mut Behaviour) -> Result<()> {
        if !self.is_client {
            return Err(Error::PacketWrong);
        }
        let cb = b.client()?;
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        let AuthSide::Client(auth) = &mut self.auth else { unreachable!() };
        auth.failure(f, &mut self.parse_ctx, &mut s, cb)
    }

    fn recv_userauth_success(&mut self, b: &mut Behaviour, events: &mut Vec<Event>) -> Result<()> {
        if !self.is_client {
            return Err(Error::PacketWrong);
        }
        let cb = b.client()?;
        {
            let AuthSide::Client(auth) = &mut self.auth else { unreachable!() };
            auth.success(cb)?;
        }
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        s.send(packets::ServiceRequest { name: SSH_SERVICE_CONNECTION })?;
        self.phase = Phase::Running;
        events.push(Event::Authenticated);
        Ok(())
    }

    fn recv_banner(&mut self, p: &packets::UserauthBanner, b: &mut Behaviour, events: &mut Vec<Event>) -> Result<()> {
        if self.is_client {
            b.client()?.show_banner(p.message, p.lang);
        }
        events.push(Event::Banner { message: p.message.as_str().to_string(), language: p.lang.as_str().to_string() });
        Ok(())
    }

    fn recv_userauth60(&mut self, p: &packets::Userauth60, b: &mut Behaviour) -> Result<()> {
        if !self.is_client {
            return Err(Error::PacketWrong);
        }
        let cb = b.client()?;
        let sess_id = self.session_id.clone().trap()?;
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        let AuthSide::Client(auth) = &mut self.auth else { unreachable!() };
        auth.auth60(p, &sess_id, &mut self.parse_ctx, &mut s, cb)
    }

    fn recv_userauth_info_response(
        &mut self,
        p: &packets::UserauthInfoResponse,
        b: &mut Behaviour,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        if self.is_client {
            return Err(Error::PacketWrong);
        }
        let sb = b.server()?;
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        let AuthSide::Server(auth) = &mut self.auth else { unreachable!() };
        auth.recv_info_response(p, &mut s, sb)?;
        if auth.is_authenticated() {
            self.phase = Phase::Running;
            events.push(Event::Authenticated);
        }
        Ok(())
    }

    fn recv_channel_open(&mut self, p: &packets::ChannelOpen, b: &mut Behaviour, events: &mut Vec<Event>) -> Result<()> {
        let (num, _side) = match self.channels.recv_open(p) {
            Ok(ok) => ok,
            Err(e) if e.is_channel_local() => {
                let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
                s.send(packets::ChannelOpenFailure {
                    num: p.num,
                    reason: ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE.code(),
                    desc: TextString(b"unknown channel type"),
                    lang: "",
                })?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let handle = ChanHandle(num);
        let verdict = match &p.ty {
            packets::ChannelOpenType::Session(_) => {
                if self.is_client {
                    ChanOpened::Failure((ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED, handle))
                } else {
                    b.server()?.open_session(handle)
                }
            }
            packets::ChannelOpenType::ForwardedTcpip(t) => b.open_tcp_forwarded(handle, t),
            packets::ChannelOpenType::DirectTcpip(t) => b.open_tcp_direct(handle, t),
            packets::ChannelOpenType::Unknown(_) => {
                ChanOpened::Failure((ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE, handle))
            }
        };
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        match verdict {
            ChanOpened::Success(ChanHandle(n)) => {
                self.channels.accept(n, &mut s)?;
                events.push(Event::ChannelOpenConfirmed(n));
            }
            ChanOpened::Failure((reason, ChanHandle(n))) => {
                self.channels.reject(n, reason, &mut s)?;
            }
        }
        Ok(())
    }

    fn recv_channel_request(&mut self, p: &packets::ChannelRequest, b: &mut Behaviour) -> Result<()> {
        let num = ChanNum(p.num);
        self.channels.get(num)?;
        let outcome: Option<bool> = match &p.req {
            ChannelReqType::Shell(_) => b.server().ok().map(|sb| sb.sess_shell(num)),
            ChannelReqType::Exec(e) => b.server().ok().map(|sb| sb.sess_exec(num, e.command)),
            ChannelReqType::Pty(pty) => b.server().ok().map(|sb| sb.sess_pty(num, pty)),
            ChannelReqType::Subsystem(s2) => {
                b.server().ok().map(|sb| sb.sess_subsystem(num, TextString(s2.subsystem.as_bytes())))
            }
            ChannelReqType::WinChange(wc) => {
                trace!("window-change on chan {}: {}x{}", num.0, wc.cols, wc.rows);
                None
            }
            ChannelReqType::Signal(sig) => {
                trace!("signal {} on chan {}", sig.sig, num.0);
                None
            }
            ChannelReqType::ExitStatus(es) => {
                debug!("chan {} exit status {}", num.0, es.status);
                None
            }
            ChannelReqType::ExitSignal(es) => {
                debug!("chan {} exit signal {}", num.0, es.signal);
                None
            }
            ChannelReqType::Break(_) => None,
            ChannelReqType::Unknown(_) => Some(false),
        };
        if p.want_reply {
            let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
            match outcome {
                Some(false) => self.channels.send_failure(num, &mut s),
                _ => self.channels.send_success(num, &mut s),
            }
        } else {
            Ok(())
        }
    }

    fn maybe_rekey(&mut self, now: Instant) -> Result<()> {
        if !matches!(self.kex, Kex::Idle) || self.session_id.is_none() {
            return Ok(());
        }
        let Some(epoch_started) = self.epoch_started else {
            return Ok(());
        };
        let transferred = (self.traffic.bytes_in() + self.traffic.bytes_out()).saturating_sub(self.bytes_at_epoch);
        let elapsed = now.saturating_duration_since(epoch_started).as_secs();
        let time_due = self.config.rekey_time_seconds > 0 && elapsed >= self.config.rekey_time_seconds as u64;
        if transferred >= self.config.rekey_bytes || time_due {
            debug!("initiating rekey: {transferred} bytes transferred, {elapsed}s elapsed");
            let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
            self.kex.send_kexinit(&self.algo_conf, &mut s)?;
        }
        Ok(())
    }

    /// Requests a rekey on demand (e.g. a host application policy, rather
    /// than the byte/time thresholds in [`Config`]). A no-op if one is
    /// already underway.
    pub fn request_rekey(&mut self) -> Result<()> {
        if !matches!(self.kex, Kex::Idle) {
            return Ok(());
        }
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.kex.send_kexinit(&self.algo_conf, &mut s)
    }

    // ---- application-facing channel operations ----

    pub fn open_session_channel(&mut self) -> Result<ChanNum> {
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.channels.open(ChanSide::Session, packets::ChannelOpenType::Session(packets::SessionOpen {}), &mut s)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_direct_tcpip_channel(
        &mut self,
        address: &str,
        port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<ChanNum> {
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.channels.open(
            ChanSide::DirectTcpip,
            packets::ChannelOpenType::DirectTcpip(DirectTcpip {
                address: address.into(),
                port,
                origin: originator_address.into(),
                origin_port: originator_port,
            }),
            &mut s,
        )
    }

    pub fn send_channel_data(&mut self, num: ChanNum, data: &[u8]) -> Result<usize> {
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.channels.send_data(num, data, &mut s)
    }

    pub fn send_channel_extended_data(&mut self, num: ChanNum, code: u32, data: &[u8]) -> Result<usize> {
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.channels.send_extended_data(num, code, data, &mut s)
    }

    pub fn send_channel_eof(&mut self, num: ChanNum) -> Result<()> {
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.channels.send_eof(num, &mut s)
    }

    pub fn close_channel(&mut self, num: ChanNum) -> Result<()> {
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.channels.send_close(num, &mut s)
    }

    pub fn send_channel_request(&mut self, num: ChanNum, req: ChannelReqType, want_reply: bool) -> Result<()> {
        let mut s = TrafSend::new(&mut self.traffic, &mut self.keys);
        self.channels.send_request(num, req, want_reply, &mut s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviour::{BhResult, CliBehaviour, ResponseString, ServBehaviour};
    use crate::channel::ChanOpened;
    use crate::packets::PubKey;
    use crate::sign::SignKey;

    struct TestServer {
        keys: Vec<SignKey>,
    }

    impl ServBehaviour for TestServer {
        fn hostkeys(&mut self) -> BhResult<&[SignKey]> {
            Ok(&self.keys)
        }
        fn have_auth_password(&self, _username: TextString) -> bool {
            true
        }
        fn auth_password(&mut self, _username: TextString, password: TextString) -> bool {
            password.as_str() == "hunter2"
        }
        fn open_session(&mut self, chan: ChanHandle) -> ChanOpened {
            ChanOpened::Success(chan)
        }
        fn sess_shell(&mut self, _chan: ChanNum) -> bool {
            true
        }
    }

    struct TestClient {
        authenticated: bool,
    }

    impl CliBehaviour for TestClient {
        fn username(&mut self) -> BhResult<ResponseString> {
            Ok("alice".to_string())
        }
        fn valid_hostkey(&mut self, _key: &PubKey) -> BhResult<bool> {
            Ok(true)
        }
        fn auth_password(&mut self, pwbuf: &mut ResponseString) -> BhResult<bool> {
            pwbuf.push_str("hunter2");
            Ok(true)
        }
        fn authenticated(&mut self) {
            self.authenticated = true;
        }
    }

    fn test_server_signkey() -> SignKey {
        crate::sign::tests::make_ed25519_signkey()
    }

    /// Shuttles bytes between two sessions and calls `progress` on each
    /// until both stop producing output and events, or `max_rounds` is hit.
    fn pump(
        client: &mut Session,
        cb: &mut (impl CliBehaviour + Send),
        server: &mut Session,
        sb: &mut (impl ServBehaviour + Send),
        max_rounds: usize,
    ) {
        let mut cli_b = Behaviour::new_client(cb);
        let mut srv_b = Behaviour::new_server(sb);
        let now = Instant::now();
        for _ in 0..max_rounds {
            let mut moved = false;
            let mut buf = [0u8; 4096];

            let n = client.output(&mut buf);
            if n > 0 {
                moved = true;
                let mut off = 0;
                while off < n {
                    off += server.input(&buf[off..n]).unwrap();
                }
            }
            let n = server.output(&mut buf);
            if n > 0 {
                moved = true;
                let mut off = 0;
                while off < n {
                    off += client.input(&buf[off..n]).unwrap();
                }
            }

            if !client.ready_input() || client.traffic.payload().is_some() {
                let evs = client.progress(&mut cli_b, now).unwrap();
                moved = moved || !evs.is_empty();
            } else {
                client.progress(&mut cli_b, now).unwrap();
            }
            if !server.ready_input() || server.traffic.payload().is_some() {
                let evs = server.progress(&mut srv_b, now).unwrap();
                moved = moved || !evs.is_empty();
            } else {
                server.progress(&mut srv_b, now).unwrap();
            }

            if !moved && client.phase == Phase::Running && server.phase == Phase::Running {
                break;
            }
        }
    }

    #[test]
    fn full_handshake_reaches_running_and_opens_a_channel() {
        let mut client = Session::new_client(Config::default());
        let mut server = Session::new_server(Config::default());
        let mut cb = TestClient { authenticated: false };
        let mut sb = TestServer { keys: vec![test_server_signkey()] };

        client.start().unwrap();
        server.start().unwrap();

        pump(&mut client, &mut cb, &mut server, &mut sb, 64);

        assert_eq!(client.phase, Phase::Running);
        assert_eq!(server.phase, Phase::Running);
        assert!(cb.authenticated);
        assert!(client.session_id().is_some());
        assert_eq!(client.session_id(), server.session_id());

        let num = client.open_session_channel().unwrap();
        pump(&mut client, &mut cb, &mut server, &mut sb, 16);
        assert_eq!(server.channels.count_open(), 1);

        client.send_channel_data(num, b"hello").unwrap();
        pump(&mut client, &mut cb, &mut server, &mut sb, 16);
    }

    struct KbdIntServer {
        keys: Vec<SignKey>,
    }

    impl ServBehaviour for KbdIntServer {
        fn hostkeys(&mut self) -> BhResult<&[SignKey]> {
            Ok(&self.keys)
        }
        fn have_auth_kbdinteractive(&self, _username: TextString) -> bool {
            true
        }
        fn auth_kbdinteractive_start(&mut self, _username: TextString) -> Option<crate::behaviour::KbdInteractivePrompts> {
            Some(crate::behaviour::KbdInteractivePrompts {
                name: "Challenge".to_string(),
                instruction: "answer carefully".to_string(),
                prompts: vec![("Password: ".to_string(), false)],
            })
        }
        fn auth_kbdinteractive_respond(&mut self, _username: TextString, responses: &[TextString]) -> bool {
            responses.len() == 1 && responses[0].as_str() == "hunter2"
        }
        fn open_session(&mut self, chan: ChanHandle) -> ChanOpened {
            ChanOpened::Success(chan)
        }
        fn sess_shell(&mut self, _chan: ChanNum) -> bool {
            true
        }
    }

    struct KbdIntClient {
        authenticated: bool,
    }

    impl CliBehaviour for KbdIntClient {
        fn username(&mut self) -> BhResult<ResponseString> {
            Ok("alice".to_string())
        }
        fn valid_hostkey(&mut self, _key: &PubKey) -> BhResult<bool> {
            Ok(true)
        }
        fn auth_kbdinteractive(
            &mut self,
            req: &crate::behaviour::KbdInteractivePrompts,
        ) -> BhResult<Option<Vec<ResponseString>>> {
            assert_eq!(req.prompts.len(), 1);
            Ok(Some(vec!["hunter2".to_string()]))
        }
        fn authenticated(&mut self) {
            self.authenticated = true;
        }
    }

    #[test]
    fn kbdint_handshake_reaches_running() {
        let mut client = Session::new_client(Config::default());
        let mut server = Session::new_server(Config::default());
        let mut cb = KbdIntClient { authenticated: false };
        let mut sb = KbdIntServer { keys: vec![test_server_signkey()] };

        client.start().unwrap();
        server.start().unwrap();

        pump(&mut client, &mut cb, &mut server, &mut sb, 64);

        assert_eq!(client.phase, Phase::Running);
        assert_eq!(server.phase, Phase::Running);
        assert!(cb.authenticated);
    }

    #[test]
    fn category_check_rejects_session_packets_before_auth() {
        let server = Session::new_server(Config::default());
        let p = packets::ChannelOpen {
            num: 0,
            initial_window: 100,
            max_packet: 100,
            ty: packets::ChannelOpenType::Session(packets::SessionOpen {}),
        }
        .into();
        let cat: Packet = p;
        assert!(server.check_category(cat.category()).is_err());
    }

    #[test]
    fn category_check_allows_kexinit_anytime() {
        let server = Session::new_server(Config::default());
        assert!(server.check_category(Category::All).is_ok());
    }
}
