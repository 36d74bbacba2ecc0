//! Authentication types shared between [`crate::cliauth`] and
//! [`crate::servauth`]: which method a pending exchange concerns, and the
//! exact byte message a pubkey signature signs (RFC4252 §7).

use crate::kex::SessId;
use crate::packets::{Packet, ParseContext};
use crate::sshwire::{BinString, SSHEncode, SSHSink, WireResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Password,
    PubKey,
    KbdInteractive,
}

/// The exact bytes a publickey auth signature covers: the session
/// identifier (as an opaque `string`) followed by the
/// `SSH_MSG_USERAUTH_REQUEST` packet that would be sent, with its
/// signature field forced present-but-empty (RFC4252 §7 "the value of
/// 'signature' is ... boolean TRUE" -- the signature itself is excluded
/// from what it signs, but the `TRUE` marker byte is included).
pub struct AuthSigMsg<'a> {
    sess_id: &'a SessId,
    packet: &'a Packet<'a>,
}

impl<'a> AuthSigMsg<'a> {
    pub fn new(packet: &'a Packet<'a>, sess_id: &'a SessId) -> Self {
        AuthSigMsg { sess_id, packet }
    }
}

impl SSHEncode for AuthSigMsg<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        BinString(self.sess_id.as_ref()).enc(s)?;
        self.packet.enc(s)
    }
}

/// Parse context requesting the `force_sig_bool` shape needed by
/// [`AuthSigMsg`]'s encoding.
pub fn force_sig_ctx() -> ParseContext {
    let mut ctx = ParseContext::new();
    ctx.method_pubkey_force_sig_bool = true;
    ctx
}
