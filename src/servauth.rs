//! Server-side userauth state machine (RFC4252): answers the client's
//! method probes and authentication attempts against
//! [`crate::behaviour::ServBehaviour`], tracking the attempt count against
//! [`crate::config::Config::max_auth_requests`] and, when
//! [`ServBehaviour::auth_methods_required`] names more than one method,
//! RFC4252 §5.1 "multiple authentication methods" partial success.

use log::trace;

use crate::auth::{force_sig_ctx, AuthSigMsg};
use crate::behaviour::ServBehaviour;
use crate::error::{Error, Result};
use crate::kex::SessId;
use crate::namelist::{LocalNames, NameList};
use crate::packets::{
    self, AuthMethod, MethodPubKey, Packet, ServiceRequest, Userauth60, UserauthFailure,
    UserauthInfoRequest, UserauthInfoResponse, UserauthPkOk, UserauthRequest,
};
use crate::sign::SigType;
use crate::sshnames::{
    SSH_AUTHMETHOD_KBDINTERACTIVE, SSH_AUTHMETHOD_PASSWORD, SSH_AUTHMETHOD_PUBLICKEY,
    SSH_NAME_ED25519, SSH_NAME_RSA_SHA256, SSH_SERVICE_USERAUTH,
};
use crate::sshwire::{SSHEncode, TextString, VecSink};
use crate::traffic::TrafSend;

pub(crate) struct ServAuth {
    /// The username of the first request seen this session. RFC4252 §5.1
    /// requires a constant username across the whole authentication
    /// exchange; a later request naming someone else is a protocol error.
    username: Option<String>,
    attempts: u32,
    max_attempts: u32,
    authenticated: bool,
    /// Methods that have already succeeded this session, for
    /// `auth_methods_required`'s multi-factor check.
    succeeded_methods: Vec<&'static str>,
    /// Set while a `keyboard-interactive` challenge is outstanding, so an
    /// `SSH_MSG_USERAUTH_INFO_RESPONSE` can be matched against it.
    kbdint_pending: bool,
}

impl ServAuth {
    pub fn new(max_attempts: u32) -> Self {
        ServAuth {
            username: None,
            attempts: 0,
            max_attempts,
            authenticated: false,
            succeeded_methods: Vec::new(),
            kbdint_pending: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Answers the `ssh-userauth` service request with `SERVICE_ACCEPT`.
    pub fn recv_service_request(
        &mut self,
        req: &ServiceRequest<'_>,
        s: &mut TrafSend<'_, '_>,
    ) -> Result<()> {
        if req.name != SSH_SERVICE_USERAUTH {
            return Err(Error::ServiceNotAvailable { name: "requested service" });
        }
        s.send(packets::ServiceAccept { name: SSH_SERVICE_USERAUTH })
    }

    pub fn recv_userauth_request(
        &mut self,
        req: &UserauthRequest<'_>,
        sess_id: &SessId,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn ServBehaviour,
    ) -> Result<()> {
        if self.authenticated {
            return Err(Error::PacketWrong);
        }
        self.kbdint_pending = false;

        let username = req.username.as_str();
        match &self.username {
            Some(u) if u != username => {
                trace!("username changed mid-auth");
                return Err(Error::PacketWrong);
            }
            _ => self.username = Some(username.to_string()),
        }

        match &req.method {
            AuthMethod::NoneMethod(_) => {
                let ok = b.auth_unchallenged(req.username);
                self.finish(s, b, username, "none", ok)
            }
            AuthMethod::Password(m) if !m.change => {
                let ok = b.have_auth_password(req.username) && b.auth_password(req.username, m.password);
                self.finish(s, b, username, SSH_AUTHMETHOD_PASSWORD, ok)
            }
            AuthMethod::Password(_) => self.failure(s, b, username),
            AuthMethod::PubKey(m) => self.recv_pubkey(req, m, sess_id, s, b),
            AuthMethod::KbdInteractive(_) => self.recv_kbdint_start(s, b, username),
            AuthMethod::Unknown(_) => self.failure(s, b, username),
        }
    }

    fn recv_pubkey(
        &mut self,
        req: &UserauthRequest<'_>,
        m: &MethodPubKey<'_>,
        sess_id: &SessId,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn ServBehaviour,
    ) -> Result<()> {
        let username = req.username.as_str();
        let sig_type = match m.sig_algo {
            SSH_NAME_ED25519 => SigType::Ed25519,
            SSH_NAME_RSA_SHA256 => SigType::RSA256,
            _ => return self.failure(s, b, username),
        };

        if !b.auth_pubkey(req.username, &m.pubkey.0) {
            return self.failure(s, b, username);
        }

        let Some(sig) = &m.sig else {
            // Query phase: tell the client this key would be accepted,
            // without asking it to sign anything yet.
            return s.send(UserauthPkOk { algo: m.sig_algo, key: m.pubkey.clone() });
        };

        let unsigned = AuthMethod::PubKey(MethodPubKey {
            sig_algo: m.sig_algo,
            pubkey: m.pubkey.clone(),
            sig: None,
        });
        let unsigned_req: Packet =
            UserauthRequest { username: req.username, service: req.service, method: unsigned }.into();
        let msg = AuthSigMsg::new(&unsigned_req, sess_id);
        let ctx = force_sig_ctx();
        let mut sink = VecSink::with_ctx(&ctx);
        msg.enc(&mut sink).map_err(|source| Error::WireFormat { source })?;

        let ok = sig_type.verify(&m.pubkey.0, &sink.buf, &sig.0).is_ok();
        self.finish(s, b, username, SSH_AUTHMETHOD_PUBLICKEY, ok)
    }

    /// Starts a `keyboard-interactive` attempt (RFC4256 §3.2): asks the
    /// behaviour for a challenge and sends it as
    /// `SSH_MSG_USERAUTH_INFO_REQUEST`, or fails the method immediately if
    /// the behaviour declines.
    fn recv_kbdint_start(
        &mut self,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn ServBehaviour,
        username: &str,
    ) -> Result<()> {
        let text_username = TextString(username.as_bytes());
        if !b.have_auth_kbdinteractive(text_username) {
            return self.failure(s, b, username);
        }
        let Some(challenge) = b.auth_kbdinteractive_start(text_username) else {
            return self.failure(s, b, username);
        };

        let prompts = challenge
            .prompts
            .iter()
            .map(|(text, echo)| packets::KbdPrompt { prompt: TextString(text.as_bytes()), echo: *echo })
            .collect();
        let req = UserauthInfoRequest {
            name: TextString(challenge.name.as_bytes()),
            instruction: TextString(challenge.instruction.as_bytes()),
            lang: TextString(b""),
            prompts,
        };
        self.kbdint_pending = true;
        s.send(Packet::Userauth60(Userauth60::InfoRequest(req)))
    }

    /// Answers an `SSH_MSG_USERAUTH_INFO_RESPONSE`, checking the client's
    /// answers against the challenge a prior `recv_kbdint_start` issued.
    pub fn recv_info_response(
        &mut self,
        p: &UserauthInfoResponse<'_>,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn ServBehaviour,
    ) -> Result<()> {
        if self.authenticated || !self.kbdint_pending {
            return Err(Error::PacketWrong);
        }
        self.kbdint_pending = false;
        let Some(username) = self.username.clone() else {
            return Err(Error::PacketWrong);
        };
        let ok = b.auth_kbdinteractive_respond(TextString(username.as_bytes()), &p.responses);
        self.finish(s, b, &username, SSH_AUTHMETHOD_KBDINTERACTIVE, ok)
    }

    /// Completes one method's verdict: on success, checks whether
    /// `auth_methods_required` is satisfied yet (sending partial-success
    /// `FAILURE` if not); on failure, counts the attempt and reports which
    /// methods remain.
    fn finish(
        &mut self,
        s: &mut TrafSend<'_, '_>,
        b: &mut dyn ServBehaviour,
        username: &str,
        method: &'static str,
        ok: bool,
    ) -> Result<()> {
        if !ok {
            return self.failure(s, b, username);
        }

        if !self.succeeded_methods.contains(&method) {
            self.succeeded_methods.push(method);
        }
        let required = b.auth_methods_required(TextString(username.as_bytes()));
        let remaining: Vec<&'static str> =
            required.into_iter().filter(|m| !self.succeeded_methods.contains(m)).collect();

        if remaining.is_empty() {
            self.success(s)
        } else {
            let methods = NameList::from(&LocalNames(remaining));
            s.send(UserauthFailure { methods, partial: true })
        }
    }

    fn success(&mut self, s: &mut TrafSend<'_, '_>) -> Result<()> {
        self.authenticated = true;
        s.send(packets::UserauthSuccess {})
    }

    /// Sends `FAILURE` listing the methods still available, or gives up
    /// with [`Error::AuthExhausted`] once `max_attempts` is spent.
    fn failure(&mut self, s: &mut TrafSend<'_, '_>, b: &mut dyn ServBehaviour, username: &str) -> Result<()> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            return Err(Error::AuthExhausted);
        }

        let mut avail = LocalNames(Vec::new());
        let text_username = TextString(username.as_bytes());
        if b.have_auth_password(text_username) {
            avail.push(SSH_AUTHMETHOD_PASSWORD)?;
        }
        if b.have_auth_pubkey(text_username) {
            avail.push(SSH_AUTHMETHOD_PUBLICKEY)?;
        }
        if b.have_auth_kbdinteractive(text_username) {
            avail.push(SSH_AUTHMETHOD_KBDINTERACTIVE)?;
        }
        // Methods already satisfied this session stay off the list even
        // after an unrelated later method fails.
        avail.0.retain(|m| !self.succeeded_methods.contains(m));
        let methods = NameList::from(&avail);
        s.send(UserauthFailure { methods, partial: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_after_max_attempts() {
        let mut auth = ServAuth::new(2);
        auth.attempts = 1;
        assert_eq!(auth.max_attempts, 2);
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn tracks_succeeded_methods() {
        let mut auth = ServAuth::new(20);
        assert!(auth.succeeded_methods.is_empty());
        auth.succeeded_methods.push(SSH_AUTHMETHOD_PASSWORD);
        assert!(auth.succeeded_methods.contains(&SSH_AUTHMETHOD_PASSWORD));
    }
}
