//! Application hooks for authentication decisions and channel requests:
//! the external-authenticator and session-handler contracts the transport
//! state machine calls into. Splits into a `CliBehaviour`/`ServBehaviour`
//! pair so a single session is unambiguously a client or a server.

use crate::channel::{ChanFail, ChanHandle, ChanNum, ChanOpened};
use crate::error::{Error, Result};
use crate::packets::{DirectTcpip, ForwardedTcpip, Pty, PubKey};
use crate::sign::SignKey;
use crate::sshwire::TextString;

/// A password or username collected from the application.
pub type ResponseString = String;

pub type BhResult<T> = Result<T>;

/// A `keyboard-interactive` challenge (RFC4256 §3.2): a free-form
/// instruction plus an ordered list of prompts, each with its own echo
/// flag (servers use `echo = false` for anything password-shaped).
#[derive(Debug, Clone)]
pub struct KbdInteractivePrompts {
    pub name: String,
    pub instruction: String,
    pub prompts: Vec<(String, bool)>,
}

pub enum Behaviour<'a> {
    Client(&'a mut (dyn CliBehaviour + Send)),
    Server(&'a mut (dyn ServBehaviour + Send)),
}

impl<'a> Behaviour<'a> {
    pub fn new_client(b: &'a mut (dyn CliBehaviour + Send)) -> Self {
        Self::Client(b)
    }

    pub fn new_server(b: &'a mut (dyn ServBehaviour + Send)) -> Self {
        Self::Server(b)
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    pub fn client(&mut self) -> Result<&mut dyn CliBehaviour> {
        match self {
            Self::Client(b) => Ok(*b),
            Self::Server(_) => Err(Error::bug_msg("client behaviour requested on a server session")),
        }
    }

    pub fn server(&mut self) -> Result<&mut dyn ServBehaviour> {
        match self {
            Self::Server(b) => Ok(*b),
            Self::Client(_) => Err(Error::bug_msg("server behaviour requested on a client session")),
        }
    }

    pub(crate) fn open_tcp_forwarded(&mut self, chan: ChanHandle, t: &ForwardedTcpip) -> ChanOpened {
        match self {
            Self::Client(b) => b.open_tcp_forwarded(chan, t),
            Self::Server(b) => b.open_tcp_forwarded(chan, t),
        }
    }

    pub(crate) fn open_tcp_direct(&mut self, chan: ChanHandle, t: &DirectTcpip) -> ChanOpened {
        match self {
            Self::Client(b) => b.open_tcp_direct(chan, t),
            Self::Server(b) => b.open_tcp_direct(chan, t),
        }
    }

    pub(crate) fn disconnected(&mut self, desc: TextString) {
        match self {
            Self::Client(b) => b.disconnected(desc),
            Self::Server(b) => b.disconnected(desc),
        }
    }
}

/// Hooks driven by the client-side userauth state machine
/// ([`crate::cliauth`]) and post-auth channel handling.
pub trait CliBehaviour {
    /// The username to authenticate as. Called once per session; to
    /// switch users, start a new connection.
    fn username(&mut self) -> BhResult<ResponseString>;

    /// Whether to accept the server's host key. Implementations should
    /// compare it against a known-hosts style store keyed by hostname.
    fn valid_hostkey(&mut self, key: &PubKey) -> BhResult<bool>;

    /// Supplies a password for the `password` method. Return `Ok(false)`
    /// to skip password authentication entirely.
    #[allow(unused_variables)]
    fn auth_password(&mut self, pwbuf: &mut ResponseString) -> BhResult<bool> {
        Ok(false)
    }

    /// The next private key to try for `publickey` authentication. Once
    /// this returns `None` it will not be called again this session.
    fn next_authkey(&mut self) -> BhResult<Option<SignKey>> {
        Ok(None)
    }

    /// Answers a `keyboard-interactive` challenge with one response per
    /// prompt, in order. Return `Ok(None)` to decline keyboard-interactive
    /// entirely (it will not be retried with a different challenge).
    #[allow(unused_variables)]
    fn auth_kbdinteractive(&mut self, req: &KbdInteractivePrompts) -> BhResult<Option<Vec<ResponseString>>> {
        Ok(None)
    }

    /// Called once authentication succeeds.
    fn authenticated(&mut self);

    /// The disconnect message sent by the server, if any arrived before
    /// the transport closed.
    #[allow(unused_variables)]
    fn disconnected(&mut self, desc: TextString) {}

    /// A banner sent by the server prior to authentication completing.
    /// `banner`/`language` come from the peer and should be treated as
    /// untrusted display text.
    #[allow(unused_variables)]
    fn show_banner(&self, banner: TextString, language: TextString) {}

    #[allow(unused_variables)]
    fn open_tcp_forwarded(&mut self, chan: ChanHandle, t: &ForwardedTcpip) -> ChanOpened {
        ChanOpened::Failure((ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE, chan))
    }

    #[allow(unused_variables)]
    fn open_tcp_direct(&mut self, chan: ChanHandle, t: &DirectTcpip) -> ChanOpened {
        ChanOpened::Failure((ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE, chan))
    }
}

/// Hooks driven by the server-side userauth state machine
/// ([`crate::servauth`]) and inbound channel/session requests.
pub trait ServBehaviour {
    /// Host keys this server will offer during key exchange.
    fn hostkeys(&mut self) -> BhResult<&[SignKey]>;

    /// Whether `username` may attempt password authentication.
    /// Implementations should answer this without leaking whether the
    /// user actually exists via timing.
    #[allow(unused_variables)]
    fn have_auth_password(&self, username: TextString) -> bool {
        false
    }

    /// Whether `username` may attempt publickey authentication.
    #[allow(unused_variables)]
    fn have_auth_pubkey(&self, username: TextString) -> bool {
        false
    }

    /// Whether `username` may log in with the `none` method.
    #[allow(unused_variables)]
    fn auth_unchallenged(&mut self, username: TextString) -> bool {
        false
    }

    /// Verifies a password for `username`. Implementations should
    /// compare in constant time (e.g. via `subtle::ConstantTimeEq`) and
    /// avoid leaking user existence through timing.
    #[allow(unused_variables)]
    fn auth_password(&mut self, username: TextString, password: TextString) -> bool {
        false
    }

    /// Whether `pubkey` is an authorized key for `username`. Called
    /// during both the query phase (PK_OK) and the signed request phase;
    /// the signature itself is checked separately by the caller.
    #[allow(unused_variables)]
    fn auth_pubkey(&mut self, username: TextString, pubkey: &PubKey) -> bool {
        false
    }

    /// Whether `username` may attempt `keyboard-interactive` authentication.
    #[allow(unused_variables)]
    fn have_auth_kbdinteractive(&self, username: TextString) -> bool {
        false
    }

    /// Begins a `keyboard-interactive` attempt, returning the challenge to
    /// send. Returning `None` fails the method immediately (as if the
    /// username didn't support it). Called once per attempt; the returned
    /// prompts are echoed back to `auth_kbdinteractive_respond` alongside
    /// the client's answers so the implementation doesn't need to keep its
    /// own copy.
    #[allow(unused_variables)]
    fn auth_kbdinteractive_start(&mut self, username: TextString) -> Option<KbdInteractivePrompts> {
        None
    }

    /// Checks the client's answers against the challenge issued by
    /// `auth_kbdinteractive_start`, in prompt order.
    #[allow(unused_variables)]
    fn auth_kbdinteractive_respond(&mut self, username: TextString, responses: &[TextString]) -> bool {
        false
    }

    /// Methods that must *all* succeed (across possibly several
    /// `UserauthRequest`s) before authentication completes — RFC4252 §5.1
    /// "multiple authentication methods". An empty list (the default)
    /// means any single successful method is enough.
    #[allow(unused_variables)]
    fn auth_methods_required(&self, username: TextString) -> Vec<&'static str> {
        Vec::new()
    }

    /// Whether a bare `session` channel may be opened.
    fn open_session(&mut self, chan: ChanHandle) -> ChanOpened;

    #[allow(unused_variables)]
    fn open_tcp_forwarded(&mut self, chan: ChanHandle, t: &ForwardedTcpip) -> ChanOpened {
        ChanOpened::Failure((ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE, chan))
    }

    #[allow(unused_variables)]
    fn open_tcp_direct(&mut self, chan: ChanHandle, t: &DirectTcpip) -> ChanOpened {
        ChanOpened::Failure((ChanFail::SSH_OPEN_UNKNOWN_CHANNEL_TYPE, chan))
    }

    /// Returns whether the request succeeded, for the `want_reply` case.
    #[allow(unused_variables)]
    fn sess_shell(&mut self, chan: ChanNum) -> bool {
        false
    }

    #[allow(unused_variables)]
    fn sess_exec(&mut self, chan: ChanNum, cmd: TextString) -> bool {
        false
    }

    #[allow(unused_variables)]
    fn sess_pty(&mut self, chan: ChanNum, pty: &Pty) -> bool {
        false
    }

    #[allow(unused_variables)]
    fn sess_subsystem(&mut self, chan: ChanNum, subsystem: TextString) -> bool {
        false
    }

    /// The disconnect message sent by the client, if any arrived before
    /// the transport closed.
    #[allow(unused_variables)]
    fn disconnected(&mut self, desc: TextString) {}
}
