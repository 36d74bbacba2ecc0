//! Crate-wide error type.
//!
//! Wire framing, crypto, protocol-state, negotiation, auth, channel and
//! transport-closed failures each get their own variant so callers can
//! match on `Error` to decide whether a failure is recoverable (auth,
//! channel) or fatal (everything else, per the transport's DISCONNECT
//! policy).

use core::fmt;

use snafu::prelude::*;

use crate::sshwire::WireError;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Binary Packet Protocol framing problem: bad length, bad padding,
    /// packet too large, or a name/enum value that doesn't parse.
    #[snafu(display("SSH wire format error: {source}"))]
    WireFormat { source: WireError },

    /// MAC/AEAD tag mismatch, decryption failure, or key derivation failure.
    #[snafu(display("cryptographic failure: {msg}"))]
    Crypto { msg: &'static str },

    /// A packet was received that's illegal in the current transport/auth/
    /// channel state.
    #[snafu(display("protocol error: packet not valid in current state"))]
    PacketWrong,

    /// No algorithm in common between the two KEXINITs for `algo`.
    #[snafu(display("no matching algorithm for {algo}"))]
    AlgoNoMatch { algo: &'static str },

    /// An unknown wire name was used where a concrete algorithm was required.
    #[snafu(display("unknown {kind}"))]
    UnknownMethod { kind: &'static str },

    /// SERVICE_REQUEST named a service this side doesn't offer.
    #[snafu(display("service {name} not available"))]
    ServiceNotAvailable { name: &'static str },

    #[snafu(display("unknown packet type {number}"))]
    UnknownPacket { number: u8 },

    /// Host key signature failed verification.
    #[snafu(display("bad signature"))]
    BadSignature,

    #[snafu(display("signature type {sig} doesn't match key type {key}"))]
    SignatureMismatch { key: &'static str, sig: &'static str },

    #[snafu(display("key exchange failed: {msg}"))]
    BadKex { msg: &'static str },

    #[snafu(display("decryption/MAC verification failed"))]
    BadDecrypt,

    /// Authentication attempt rejected. Recoverable: the auth state machine
    /// may allow further attempts within `max_auth_requests`.
    #[snafu(display("authentication failed"))]
    AuthFailed,

    /// Too many failed auth attempts.
    #[snafu(display("no more authentication methods available"))]
    AuthExhausted,

    /// A channel-scoped failure: the affected channel is force-closed but
    /// the transport continues.
    #[snafu(display("channel {num} error: {msg}"))]
    ChannelFail { num: u32, msg: &'static str },

    #[snafu(display("unknown channel number {num}"))]
    UnknownChannel { num: u32 },

    /// Peer sent DISCONNECT, or the socket reached EOF.
    #[snafu(display("transport closed: {msg}"))]
    TransportClosed { msg: &'static str },

    #[snafu(display("timed out waiting for {what}"))]
    Timeout { what: &'static str },

    /// A host application `Behaviour`/authenticator callback declined or
    /// errored out of a step that isn't itself a protocol error.
    #[snafu(display("application rejected: {msg}"))]
    BehaviourError { msg: &'static str },

    /// Output buffer too small for the current operation.
    #[snafu(display("no room in output buffer"))]
    NoRoom,

    /// Internal invariant violated. Should never happen; if it does, it's
    /// a bug in this crate rather than a hostile peer or bad config.
    #[snafu(display("internal bug: {msg}"))]
    Bug { msg: &'static str },
}

impl Error {
    pub fn msg(msg: &'static str) -> Self {
        Error::BehaviourError { msg }
    }

    pub fn bug() -> Self {
        Error::Bug { msg: "internal invariant violated" }
    }

    pub fn bug_msg(msg: &'static str) -> Self {
        Error::Bug { msg }
    }

    /// Whether this error should force-close only a single channel rather
    /// than the whole transport.
    pub fn is_channel_local(&self) -> bool {
        matches!(self, Error::ChannelFail { .. } | Error::UnknownChannel { .. })
    }

    /// Whether a caller may retry within the authentication budget.
    pub fn is_auth_recoverable(&self) -> bool {
        matches!(self, Error::AuthFailed)
    }

    /// The DISCONNECT reason code (RFC 4253 §11.1) this error should be
    /// reported with, if it's fatal to the transport.
    pub fn disconnect_reason(&self) -> Option<u32> {
        use crate::sshnames::*;
        let reason = match self {
            Error::WireFormat { .. } => SSH_DISCONNECT_PROTOCOL_ERROR,
            Error::Crypto { .. } | Error::BadDecrypt => SSH_DISCONNECT_MAC_ERROR,
            Error::PacketWrong => SSH_DISCONNECT_PROTOCOL_ERROR,
            Error::AlgoNoMatch { .. } | Error::BadKex { .. } => {
                SSH_DISCONNECT_KEY_EXCHANGE_FAILED
            }
            Error::UnknownMethod { .. } | Error::UnknownPacket { .. } => {
                SSH_DISCONNECT_PROTOCOL_ERROR
            }
            Error::ServiceNotAvailable { .. } => SSH_DISCONNECT_SERVICE_NOT_AVAILABLE,
            Error::BadSignature | Error::SignatureMismatch { .. } => {
                SSH_DISCONNECT_KEY_EXCHANGE_FAILED
            }
            Error::AuthExhausted => SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE,
            Error::Timeout { .. } => SSH_DISCONNECT_CONNECTION_LOST,
            Error::NoRoom | Error::Bug { .. } => SSH_DISCONNECT_PROTOCOL_ERROR,
            // Channel-local and auth-recoverable errors and transport-closed
            // don't get a fresh DISCONNECT sent (closed already, or handled
            // without tearing down the transport).
            Error::AuthFailed
            | Error::ChannelFail { .. }
            | Error::UnknownChannel { .. }
            | Error::TransportClosed { .. }
            | Error::BehaviourError { .. } => return None,
        };
        Some(reason)
    }
}

impl From<WireError> for Error {
    fn from(source: WireError) -> Self {
        Error::WireFormat { source }
    }
}

/// Converts infallible-in-practice internal failures (`Option::None`,
/// slice-conversion errors, mutex poison, etc) into `Error::Bug` rather
/// than panicking.
pub trait TrapBug<T> {
    fn trap(self) -> Result<T>;
}

impl<T> TrapBug<T> for Option<T> {
    fn trap(self) -> Result<T> {
        self.ok_or_else(Error::bug)
    }
}

impl<T, E: fmt::Debug> TrapBug<T> for core::result::Result<T, E> {
    fn trap(self) -> Result<T> {
        self.map_err(|_e| Error::bug())
    }
}
