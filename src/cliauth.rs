//! Client-side userauth state machine (RFC4252): probes which methods the
//! server accepts, then tries publickey (two-phase PK_OK query then signed
//! request) and password in turn, driven by [`crate::behaviour::CliBehaviour`].

use log::{trace, warn};

use crate::auth::{force_sig_ctx, AuthSigMsg, AuthType};
use crate::behaviour::{CliBehaviour, KbdInteractivePrompts, ResponseString};
use crate::error::{Error, Result};
use crate::kex::SessId;
use crate::packets::{
    self, AuthMethod, ExtInfo, MethodKbdInt, MethodPassword, MethodPubKey, Packet, ParseContext,
    Signature, Userauth60, UserauthFailure, UserauthInfoRequest, UserauthInfoResponse,
    UserauthPkOk, UserauthRequest,
};
use crate::sign::{OwnedSig, SignKey};
use crate::sshnames::{
    SSH_AUTHMETHOD_KBDINTERACTIVE, SSH_AUTHMETHOD_PASSWORD, SSH_AUTHMETHOD_PUBLICKEY,
    SSH_NAME_RSA_SHA256,
};
use crate::sshnames::{SSH_SERVICE_CONNECTION, SSH_SERVICE_USERAUTH};
use crate::sshwire::{Blob, SSHEncode, TextString, VecSink};
use crate::traffic::TrafSend;

/// A userauth request this client has already sent, kept so a later
/// `SSH_MSG_USERAUTH_PK_OK`/`FAILURE` can be matched against it.
enum Req {
    Password(ResponseString),
    PubKey { key: SignKey },
    KbdInteractive,
}

impl Req {
    /// Builds the `UserauthRequest` packet for this attempt. `sig` is
    /// `None` for the initial publickey query; callers resend with it
    /// populated once the server has confirmed the key via PK_OK.
    fn req_packet<'b>(
        &'b self,
        username: &'b str,
        parse_ctx: &mut ParseContext,
        sig: Option<&'b OwnedSig>,
    ) -> Result<Packet<'b>> {
        let username = username.into();
        Ok(match self {
            Req::PubKey { key } => {
                parse_ctx.cli_auth_type = Some(AuthType::PubKey);
                let sig_algo = Signature::sig_name_for_pubkey(&key.pubkey())?;
                let method = AuthMethod::PubKey(MethodPubKey {
                    sig_algo,
                    pubkey: Blob(key.pubkey()),
                    sig: sig.map(|s| Blob(s.into())),
                });
                UserauthRequest { username, service: SSH_SERVICE_CONNECTION, method }.into()
            }
            Req::Password(pw) => {
                parse_ctx.cli_auth_type = Some(AuthType::Password);
                let method = AuthMethod::Password(MethodPassword {
                    change: false,
                    password: pw.as_str().into(),
                });
                UserauthRequest { username, service: SSH_SERVICE_CONNECTION, method }.into()
            }
            Req::KbdInteractive => {
                parse_ctx.cli_auth_type = Some(AuthType::KbdInteractive);
                let method = AuthMethod::KbdInteractive(MethodKbdInt {
                    lang: TextString(b""),
                    submethods: TextString(b""),
                });
                UserauthRequest { username, service: SSH_SERVICE_CONNECTION, method }.into()
            }
        })
    }
}

enum AuthState {
    Unstarted,
    MethodQuery,
    Request { last_req: Req },
    Idle,
}

pub(crate) struct CliAuth {
    state: AuthState,
    username: ResponseString,
    /// Set false once [`CliBehaviour::auth_password`] declines to supply
    /// one; not reset by a server rejection.
    try_password: bool,
    /// Set false once [`CliBehaviour::next_authkey`] runs out of keys.
    try_pubkey: bool,
    /// Set false after one `keyboard-interactive` attempt; unlike
    /// publickey there's no "next challenge" to iterate, so one declined
    /// or failed round is all we retry.
    try_kbdint: bool,
    /// Learned from `SSH_MSG_EXT_INFO`'s `server-sig-algs`: whether the
    /// server will accept `rsa-sha2-256` signatures.
    allow_rsa_sha2: bool,
}

impl CliAuth {
    pub fn new() -> Self {
        CliAuth {
            state: AuthState::Unstarted,
            username: ResponseString::new(),
            try_password: true,
            try_pubkey: true,
            try_kbdint: true,
            allow_rsa_sha2: false,
        }
    }

    pub fn allow_rsa_sha2(&self) -> bool {
        self.allow_rsa_sha2
    }

    /// Kicks off authentication on first call; idempotent afterwards.
    /// Sends the `ssh-userauth` service request followed by a `none`
    /// method probe, whose `FAILURE` response tells us which real methods
    /// are worth trying.
    pub fn progress(&mut self, s: &mut TrafSend<'_, '_>, b: &mut dyn CliBehaviour) -> Result<()> {
        if let AuthState::Unstarted = self.state {
            self.state = AuthState::MethodQuery;
            self.username = b.username()?;

            s.send(packets::ServiceRequest { name: SSH_SERVICE_USERAUTH })?;
            s.send(UserauthRequest {
                username: self.username.as_str().into(),
                service: SSH_SERVICE_CONNECTION,
                method: AuthMethod::NoneMethod(packets::MethodNone {}),
            })?;
        }
        Ok(())
    }

    fn make_password_req(&mut self, b: &mut dyn CliBehaviour) -> Result<Option<Req>> {
        let mut pw = ResponseString::new();
        match b.auth_password(&mut pw) {
            Ok(true) => Ok(Some(Req::Password(pw))),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Retrieves the next pubkey to try from the application. Returns
    /// `None` once `next_authkey` has run dry, and latches
    /// [`Self::try_pubkey`] false so it isn't asked again.
    fn make_pubkey_req(&mut self, b: &mut dyn CliBehaviour) -> Option<Req> {
        let k = b.next_authkey().unwrap_or_else(|_| {
            warn!("error getting pubkey for auth");
            None
        });
        match k {
            Some(key) => Some(Req::PubKey { key }),
            None => {
                trace!("stop iterating pubkeys");
                self.try_pubkey = false;
                None
            }
        }
    }

    /// Signs the bytes a publickey auth request commits to: the session
    /// identifier followed by the request packet with `sig` forced to the
    /// present-but-empty shape (RFC4252 §7).
    fn auth_sig_msg(key: &SignKey, sess_id: &SessId, p: &Packet<'_>) -> Result<OwnedSig> {
        let msg = AuthSigMsg::new(p, sess_id);
        let ctx = force_sig_ctx();
        let mut sink = VecSink::with_ctx(&ctx);
        msg.enc(&mut sink).map_err(|source| Error::WireFormat { source })?;
        key.sign(&sink.buf)
    }

    pub fn auth60(
        &mut self,
        auth60: &Userauth60<'_>,
        sess_id: &SessId,
        parse_ctx: &mut ParseContext,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        parse_ctx.cli_auth_type = None;
        match auth60 {
            Userauth60::PkOk(pkok) => self.auth_pkok(pkok, sess_id, parse_ctx, s),
            Userauth60::PwChangeReq(_req) => Err(Error::AuthFailed),
            Userauth60::InfoRequest(req) => self.auth_info_request(req, parse_ctx, s, b),
        }
    }

    /// Answers an `SSH_MSG_USERAUTH_INFO_REQUEST` by forwarding its
    /// prompts to [`CliBehaviour::auth_kbdinteractive`] and sending back
    /// whatever it returns (empty answers if it declines, which the
    /// server will simply reject). Leaves `cli_auth_type` set so a
    /// further round of `INFO_REQUEST` (RFC4256 permits several before a
    /// final verdict) still decodes correctly.
    fn auth_info_request(
        &mut self,
        req: &UserauthInfoRequest<'_>,
        parse_ctx: &mut ParseContext,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        if !matches!(&self.state, AuthState::Request { last_req: Req::KbdInteractive }) {
            trace!("unexpected info-request");
            return Err(Error::PacketWrong);
        }

        let prompts = KbdInteractivePrompts {
            name: req.name.as_str().to_string(),
            instruction: req.instruction.as_str().to_string(),
            prompts: req.prompts.iter().map(|p| (p.prompt.as_str().to_string(), p.echo)).collect(),
        };
        let answers = b.auth_kbdinteractive(&prompts)?.unwrap_or_default();
        let responses = answers.iter().map(|a| TextString(a.as_bytes())).collect();
        parse_ctx.cli_auth_type = Some(AuthType::KbdInteractive);
        s.send(UserauthInfoResponse { responses })
    }

    fn auth_pkok(
        &mut self,
        pkok: &UserauthPkOk<'_>,
        sess_id: &SessId,
        parse_ctx: &mut ParseContext,
        s: &mut TrafSend<'_, '_>,
    ) -> Result<()> {
        let AuthState::Request { last_req } = &self.state else {
            trace!("unexpected userauth60");
            return Err(Error::PacketWrong);
        };
        let Req::PubKey { key } = last_req else {
            trace!("pkok while a password request was outstanding");
            return Err(Error::PacketWrong);
        };
        if key.pubkey() != pkok.key.0 {
            trace!("pkok for a different key than the one offered");
            return Err(Error::PacketWrong);
        }

        let unsigned = last_req.req_packet(&self.username, parse_ctx, None)?;
        let sig = Self::auth_sig_msg(key, sess_id, &unsigned)?;
        let signed = last_req.req_packet(&self.username, parse_ctx, Some(&sig))?;
        s.send(signed)?;
        Ok(())
    }

    /// Reacts to `SSH_MSG_USERAUTH_FAILURE` by trying the next method the
    /// server still allows: publickey first (cycling through available
    /// keys), falling back to password. Gives up with
    /// [`Error::AuthExhausted`] once nothing is left to try.
    pub fn failure(
        &mut self,
        failure: &UserauthFailure<'_>,
        parse_ctx: &mut ParseContext,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        parse_ctx.cli_auth_type = None;
        self.state = AuthState::Idle;

        if failure.methods.has_algo(SSH_AUTHMETHOD_PUBLICKEY)? {
            while self.try_pubkey {
                if let Some(req) = self.make_pubkey_req(b) {
                    self.state = AuthState::Request { last_req: req };
                    break;
                }
            }
        }

        if matches!(self.state, AuthState::Idle)
            && self.try_kbdint
            && failure.methods.has_algo(SSH_AUTHMETHOD_KBDINTERACTIVE)?
        {
            self.try_kbdint = false;
            self.state = AuthState::Request { last_req: Req::KbdInteractive };
        }

        if matches!(self.state, AuthState::Idle)
            && self.try_password
            && failure.methods.has_algo(SSH_AUTHMETHOD_PASSWORD)?
        {
            match self.make_password_req(b)? {
                Some(req) => self.state = AuthState::Request { last_req: req },
                None => self.try_password = false,
            }
        }

        let AuthState::Request { last_req } = &self.state else {
            return Err(Error::AuthExhausted);
        };
        // Publickey starts with the unsigned query; the server's PK_OK
        // (or a fresh FAILURE) decides what happens next.
        let p = last_req.req_packet(&self.username, parse_ctx, None)?;
        s.send(p)?;
        Ok(())
    }

    pub fn success(&mut self, b: &mut dyn CliBehaviour) -> Result<()> {
        self.state = AuthState::Idle;
        b.authenticated();
        Ok(())
    }

    pub fn handle_ext_info(&mut self, p: &ExtInfo<'_>) {
        if let Some(ref algs) = p.server_sig_algs {
            self.allow_rsa_sha2 = algs.has_algo(SSH_NAME_RSA_SHA256).unwrap_or(false);
            trace!("allow_rsa_sha2 = {}", self.allow_rsa_sha2);
        }
    }
}

impl Default for CliAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tries_every_method_once() {
        let auth = CliAuth::new();
        assert!(auth.try_password);
        assert!(auth.try_pubkey);
        assert!(auth.try_kbdint);
    }

    #[test]
    fn kbdint_req_packet_sets_parse_ctx() {
        let mut parse_ctx = ParseContext::new();
        let req = Req::KbdInteractive;
        let p = req.req_packet("matt", &mut parse_ctx, None).unwrap();
        assert_eq!(parse_ctx.cli_auth_type, Some(AuthType::KbdInteractive));
        match p {
            Packet::UserauthRequest(r) => assert!(matches!(r.method, AuthMethod::KbdInteractive(_))),
            _ => panic!("wrong variant"),
        }
    }
}
