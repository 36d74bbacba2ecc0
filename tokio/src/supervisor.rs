//! The Session Supervisor (spec.md §4.H, §5): owns the socket and a
//! [`Session`], and runs it as three small tokio tasks sharing one
//! `std::sync::Mutex`-protected core, matching the teacher's
//! `smol::async_door::AsyncDoor` (one mutex around the sans-I/O state,
//! shared between the task that feeds it bytes and the task that drains
//! its output) generalized from a single `poll_read`/`poll_write` pair
//! into the explicit read/write task split spec.md §5 calls for:
//!
//! - a **read task**: reads off the socket, feeds [`Session::input`],
//!   and calls [`Session::progress`] to decode and dispatch, forwarding
//!   [`Event`]s to the caller;
//! - a **write task**: drains [`Session::output`] to the socket whenever
//!   a [`tokio::sync::Notify`] says new output may be pending;
//! - a **timer task**: calls `progress` on a fixed tick so the
//!   time-based rekey trigger (spec.md §4.C) and `idle_timeout_seconds`
//!   (spec.md §6) fire even when the peer falls silent.
//!
//! The single mutex guarding the security-context swap and the channel
//! table (spec.md §5 "Shared resources") is realized directly: there is
//! exactly one lock, taken for the (synchronous, non-blocking) duration
//! of each `Session` call, matching the teacher's choice of a single
//! `parking_lot::Mutex<Inner>` over a lock-per-field design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use dusk_ssh::{
    Behaviour, ChanNum, ChannelReqType, CliBehaviour, Error, Event, Result as SshResult,
    ServBehaviour, Session,
};

/// How often the timer task wakes the session even with no socket
/// activity, to service time-based rekey and idle-timeout checks.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound for [`SupervisorHandle::close_gracefully`] (spec.md §5).
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const READ_BUF: usize = 32 * 1024;
const WRITE_BUF: usize = 32 * 1024;

/// Either side's application hooks, boxed so the supervisor can own them
/// across the `'static` tasks it spawns. A [`Session`] is unambiguously a
/// client or a server, so this mirrors [`dusk_ssh::Behaviour`]'s split.
pub enum BehaviourBox {
    Client(Box<dyn CliBehaviour + Send>),
    Server(Box<dyn ServBehaviour + Send>),
}

impl BehaviourBox {
    pub fn client(b: impl CliBehaviour + Send + 'static) -> Self {
        Self::Client(Box::new(b))
    }

    pub fn server(b: impl ServBehaviour + Send + 'static) -> Self {
        Self::Server(Box::new(b))
    }

    fn as_behaviour(&mut self) -> Behaviour<'_> {
        match self {
            Self::Client(b) => Behaviour::new_client(b.as_mut()),
            Self::Server(b) => Behaviour::new_server(b.as_mut()),
        }
    }
}

struct Inner {
    session: Session,
    behaviour: BehaviourBox,
}

struct CloseState {
    /// Set once either close method has been called; both tasks exit
    /// promptly once this is true and the write task has drained.
    closing: AtomicBool,
    /// Set once the grace period elapses (or `close_immediately` was
    /// called directly): stop writing immediately, don't wait to drain.
    immediate: AtomicBool,
}

/// A running session: the read/write/timer tasks plus the shared,
/// mutex-guarded [`Session`] they drive. Dropping this does not stop the
/// tasks; call [`Supervisor::close_gracefully`] or
/// [`Supervisor::close_immediately`] first, or just drop the
/// [`SupervisorHandle`] and let the peer's EOF (or your own half of the
/// socket closing) end them.
pub struct Supervisor {
    handle: SupervisorHandle,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
    timer_task: JoinHandle<()>,
}

/// A cheaply-cloneable handle for driving a [`Supervisor`]'s [`Session`]
/// from application code: open channels, send data, request a rekey, or
/// close the transport. Every method takes the shared mutex for the
/// duration of one (synchronous) `Session` call, matching spec.md §5's
/// "single mutex... guards the security context swap and the writer's
/// access to the outbound sequence number".
#[derive(Clone)]
pub struct SupervisorHandle {
    inner: Arc<Mutex<Inner>>,
    notify_output: Arc<Notify>,
    close: Arc<CloseState>,
}

impl SupervisorHandle {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Wakes the write task to check for newly-queued output. Called
    /// after every handle method that may have produced bytes to send.
    fn wake_writer(&self) {
        self.notify_output.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().session.is_closed()
    }

    pub fn session_id(&self) -> Option<Vec<u8>> {
        self.lock().session.session_id().map(|id| id.to_vec())
    }

    pub fn open_session_channel(&self) -> SshResult<ChanNum> {
        let r = self.lock().session.open_session_channel();
        self.wake_writer();
        r
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_direct_tcpip_channel(
        &self,
        address: &str,
        port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> SshResult<ChanNum> {
        let r = self.lock().session.open_direct_tcpip_channel(
            address,
            port,
            originator_address,
            originator_port,
        );
        self.wake_writer();
        r
    }

    pub fn send_channel_data(&self, num: ChanNum, data: &[u8]) -> SshResult<usize> {
        let r = self.lock().session.send_channel_data(num, data);
        self.wake_writer();
        r
    }

    pub fn send_channel_extended_data(
        &self,
        num: ChanNum,
        code: u32,
        data: &[u8],
    ) -> SshResult<usize> {
        let r = self.lock().session.send_channel_extended_data(num, code, data);
        self.wake_writer();
        r
    }

    pub fn send_channel_eof(&self, num: ChanNum) -> SshResult<()> {
        let r = self.lock().session.send_channel_eof(num);
        self.wake_writer();
        r
    }

    pub fn close_channel(&self, num: ChanNum) -> SshResult<()> {
        let r = self.lock().session.close_channel(num);
        self.wake_writer();
        r
    }

    pub fn send_channel_request(
        &self,
        num: ChanNum,
        req: ChannelReqType,
        want_reply: bool,
    ) -> SshResult<()> {
        let r = self.lock().session.send_channel_request(num, req, want_reply);
        self.wake_writer();
        r
    }

    pub fn request_rekey(&self) -> SshResult<()> {
        let r = self.lock().session.request_rekey();
        self.wake_writer();
        r
    }

    /// Sends DISCONNECT and lets the write task drain it before the
    /// socket closes; stops writing after `grace` if the peer never
    /// acknowledges, escalating to [`Self::close_immediately`].
    pub async fn close_gracefully(&self, reason: u32, desc: &str, grace: Duration) {
        {
            let mut g = self.lock();
            let _ = g.session.disconnect(reason, desc);
        }
        self.close.closing.store(true, Ordering::SeqCst);
        self.wake_writer();
        tokio::time::sleep(grace).await;
        self.close_immediately();
    }

    /// Stops both tasks without waiting for queued output to drain.
    pub fn close_immediately(&self) {
        self.close.closing.store(true, Ordering::SeqCst);
        self.close.immediate.store(true, Ordering::SeqCst);
        self.wake_writer();
    }
}

/// Spawns the Session Supervisor over `stream`, driving `session`
/// (already built with [`Session::new_client`]/[`Session::new_server`])
/// and `behaviour`. Returns once [`Session::start`] has queued the
/// initial KEXINIT; call [`Supervisor::events`] to receive
/// [`Event`]s and [`Supervisor::handle`] to drive channels.
pub fn spawn<S>(stream: S, mut session: Session, behaviour: BehaviourBox) -> (Supervisor, mpsc::UnboundedReceiver<Event>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    session.start().ok();

    let inner = Arc::new(Mutex::new(Inner { session, behaviour }));
    let notify_output = Arc::new(Notify::new());
    let close = Arc::new(CloseState {
        closing: AtomicBool::new(false),
        immediate: AtomicBool::new(false),
    });
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let (rd, wr) = tokio::io::split(stream);

    let read_task = tokio::spawn(read_loop(
        rd,
        inner.clone(),
        notify_output.clone(),
        close.clone(),
        events_tx.clone(),
    ));
    let write_task = tokio::spawn(write_loop(wr, inner.clone(), notify_output.clone(), close.clone()));
    let timer_task = tokio::spawn(timer_loop(
        inner.clone(),
        notify_output.clone(),
        close.clone(),
        events_tx,
    ));

    let handle = SupervisorHandle { inner, notify_output, close };
    (Supervisor { handle, read_task, write_task, timer_task }, events_rx)
}

impl Supervisor {
    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    pub async fn close_gracefully(&self, reason: u32, desc: &str, grace: Duration) {
        self.handle.close_gracefully(reason, desc, grace).await
    }

    pub fn close_immediately(&self) {
        self.handle.close_immediately()
    }

    /// Waits for all three tasks to finish (after a close, or after the
    /// transport closed on its own from a peer DISCONNECT/EOF).
    pub async fn join(self) {
        let _ = tokio::join!(self.read_task, self.write_task, self.timer_task);
    }
}

/// Drains whatever payloads are already fully buffered, forwarding the
/// [`Event`]s produced. Mirrors the loop spec.md §4.H's `onPacket`
/// dispatch implies: keep calling `progress` while a decoded payload is
/// still waiting (see [`Session::ready_input`]'s doc comment).
fn drain_progress(inner: &mut Inner, events_tx: &mpsc::UnboundedSender<Event>) -> SshResult<()> {
    // Always call at least once per `input()`: client auth kickoff and
    // the rekey-trigger check run unconditionally inside `progress`, not
    // only when a full payload was just decoded. Once a payload *was*
    // waiting, each call dispatches exactly one and decodes the next (if
    // any) out of what's already buffered (`Traffic::done_payload`), so
    // looping while `!ready_input()` terminates once the buffer runs dry.
    loop {
        let mut b = inner.behaviour.as_behaviour();
        let evs = inner.session.progress(&mut b, Instant::now())?;
        for ev in evs {
            let _ = events_tx.send(ev);
        }
        if inner.session.is_closed() || inner.session.ready_input() {
            break;
        }
    }
    Ok(())
}

async fn read_loop<R>(
    mut rd: R,
    inner: Arc<Mutex<Inner>>,
    notify_output: Arc<Notify>,
    close: Arc<CloseState>,
    events_tx: mpsc::UnboundedSender<Event>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF];
    loop {
        if close.immediate.load(Ordering::SeqCst) {
            break;
        }
        let n = match rd.read(&mut buf).await {
            Ok(0) => {
                debug!("peer closed the connection");
                let _ = events_tx.send(Event::Disconnected {
                    reason: None,
                    desc: "transport closed".into(),
                });
                close.closing.store(true, Ordering::SeqCst);
                close.immediate.store(true, Ordering::SeqCst);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("socket read error: {e}");
                let _ = events_tx.send(Event::Disconnected { reason: None, desc: e.to_string() });
                close.closing.store(true, Ordering::SeqCst);
                close.immediate.store(true, Ordering::SeqCst);
                break;
            }
        };
        trace!("read {n} bytes");

        let closed = {
            let mut g = inner.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(e) = g.session.input(&buf[..n]) {
                report_fatal(&e, &events_tx);
                true
            } else if let Err(e) = drain_progress(&mut g, &events_tx) {
                report_fatal(&e, &events_tx);
                true
            } else {
                g.session.is_closed()
            }
        };
        notify_output.notify_one();
        if closed {
            close.closing.store(true, Ordering::SeqCst);
            break;
        }
    }
}

fn report_fatal(e: &Error, events_tx: &mpsc::UnboundedSender<Event>) {
    warn!("fatal transport error: {e}");
    let _ = events_tx.send(Event::Disconnected { reason: e.disconnect_reason(), desc: e.to_string() });
}

async fn write_loop<W>(mut wr: W, inner: Arc<Mutex<Inner>>, notify_output: Arc<Notify>, close: Arc<CloseState>)
where
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; WRITE_BUF];
    loop {
        let (n, pending_more, session_closed) = {
            let mut g = inner.lock().unwrap_or_else(|p| p.into_inner());
            let n = g.session.output(&mut buf);
            (n, g.session.output_pending(), g.session.is_closed())
        };

        if n > 0 {
            if let Err(e) = wr.write_all(&buf[..n]).await {
                warn!("socket write error: {e}");
                break;
            }
        }

        if close.immediate.load(Ordering::SeqCst) {
            break;
        }
        if n == 0 && !pending_more {
            if close.closing.load(Ordering::SeqCst) && session_closed {
                // Closing and nothing left queued: a final flush then done.
                let _ = wr.flush().await;
                break;
            }
            notify_output.notified().await;
        }
    }
    let _ = wr.shutdown().await;
}

async fn timer_loop(
    inner: Arc<Mutex<Inner>>,
    notify_output: Arc<Notify>,
    close: Arc<CloseState>,
    events_tx: mpsc::UnboundedSender<Event>,
) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        interval.tick().await;
        if close.immediate.load(Ordering::SeqCst) {
            break;
        }
        let closed = {
            let mut g = inner.lock().unwrap_or_else(|p| p.into_inner());
            if g.session.is_closed() {
                true
            } else {
                let mut b = g.behaviour.as_behaviour();
                match g.session.progress(&mut b, Instant::now()) {
                    Ok(evs) => {
                        for ev in evs {
                            let _ = events_tx.send(ev);
                        }
                        g.session.is_closed()
                    }
                    Err(e) => {
                        report_fatal(&e, &events_tx);
                        true
                    }
                }
            }
        };
        notify_output.notify_one();
        if closed {
            close.closing.store(true, Ordering::SeqCst);
            break;
        }
    }
}
