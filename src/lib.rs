//! `dusk-ssh`: a sans-I/O SSH protocol version 2 engine covering the
//! binary packet protocol, key exchange, userauth and channel
//! multiplexing (RFC4251-4254, 4256, 4419, 5656, 8308).
//!
//! This crate never touches a socket or a runtime: [`session::Session`]
//! consumes and produces plain byte buffers, and a separate I/O-driving
//! crate (`dusk-ssh-tokio`) is responsible for actually moving those
//! bytes across a transport. See [`session`] for the entry point.

mod auth;
mod behaviour;
mod channel;
mod chapoly;
mod cliauth;
mod config;
mod encrypt;
mod error;
mod ident;
mod kex;
mod namelist;
mod packets;
mod random;
mod servauth;
mod session;
mod sign;
mod sshnames;
mod sshwire;
mod traffic;

pub use behaviour::{Behaviour, BhResult, CliBehaviour, KbdInteractivePrompts, ResponseString, ServBehaviour};
pub use channel::{ChanFail, ChanHandle, ChanNum, ChanOpened, RecvData};
pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use packets::{
    Break, ChannelReqType, DirectTcpip, Ed25519PubKey, Exec, ExitSignal, ExitStatus,
    ForwardedTcpip, Pty, PubKey, RSAPubKey, ShellReq, Signal, Subsystem, WinChange,
};
pub use session::{Event, Session};
pub use sign::SignKey;
pub use sshwire::{BinString, TextString};
