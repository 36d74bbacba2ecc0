//! Name-lists: the comma-separated, order-significant ASCII lists used for
//! algorithm negotiation in KEXINIT (RFC4251 §5 "name-list"). A borrowed
//! `NameList<'a>` for values just decoded off the wire, and an owned
//! `LocalNames` for the configured preference order we negotiate against.

use crate::error::{Error, Result};
use crate::sshwire::{SSHDecode, SSHEncode, SSHSink, SSHSource, WireResult};

/// A name-list as received on the wire: the raw comma-separated string,
/// parsed lazily by the iteration/matching helpers below.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NameList<'a>(NameListInner<'a>);

#[derive(Clone, Copy, PartialEq, Eq)]
enum NameListInner<'a> {
    /// Borrowed straight off the wire.
    Wire(&'a str),
    /// Built locally from our own configuration, re-encoded when sent.
    Local(&'a LocalNames),
}

impl<'a> NameList<'a> {
    pub fn empty() -> Self {
        NameList(NameListInner::Wire(""))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        match &self.0 {
            NameListInner::Wire(s) => {
                NameListIter::Wire(if s.is_empty() { None } else { Some(s.split(',')) })
            }
            NameListInner::Local(l) => NameListIter::Local(l.0.iter()),
        }
    }

    pub fn first(&self) -> &str {
        self.iter().next().unwrap_or("")
    }

    pub fn has_algo(&self, name: &str) -> Result<bool> {
        Ok(self.iter().any(|n| n == name))
    }

    /// RFC4253 §7.1 algorithm negotiation: the first name in the client's
    /// list that also appears in the server's list, or `None` if there's
    /// no match. `self` is always the remote peer's list, just decoded off
    /// the wire; `local` is always our own configured preference order.
    /// `is_client` says whether *we* are the client, i.e. whether `local`
    /// (ours) or `self` (the peer's) is the client's list that dictates
    /// priority order among the names both sides share.
    pub fn first_match(&self, is_client: bool, local: &LocalNames) -> Result<Option<&'static str>> {
        let remote_has = |name: &str| self.iter().any(|n| n == name);
        if is_client {
            for c in local.0.iter() {
                if remote_has(c) {
                    return Ok(Some(*c));
                }
            }
            Ok(None)
        } else {
            for c in self.iter() {
                if let Some(found) = local.0.iter().find(|n| **n == c) {
                    return Ok(Some(found));
                }
            }
            Ok(None)
        }
    }
}

enum NameListIter<'a> {
    Wire(Option<core::str::Split<'a, char>>),
    Local(core::slice::Iter<'a, &'static str>),
}
impl<'a> Iterator for NameListIter<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<&'a str> {
        match self {
            NameListIter::Wire(it) => it.as_mut()?.next(),
            NameListIter::Local(it) => it.next().copied(),
        }
    }
}

impl core::fmt::Debug for NameList<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("[")?;
        for (i, n) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(n)?;
        }
        f.write_str("]")
    }
}

impl<'a> From<&'a LocalNames> for NameList<'a> {
    fn from(l: &'a LocalNames) -> Self {
        NameList(NameListInner::Local(l))
    }
}

impl SSHEncode for NameList<'_> {
    fn enc<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        let mut total = 0usize;
        for (i, n) in self.iter().enumerate() {
            total += n.len() + (i > 0) as usize;
        }
        (total as u32).enc(s)?;
        for (i, n) in self.iter().enumerate() {
            if i > 0 {
                s.push(b",")?;
            }
            s.push(n.as_bytes())?;
        }
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for NameList<'a> {
    fn dec<S: SSHSource<'de>>(s: &mut S) -> WireResult<Self> {
        let st: &'a str = SSHDecode::dec(s)?;
        Ok(NameList(NameListInner::Wire(st)))
    }
}

/// Our own configured preference order for one negotiated field
/// (kex, host-key sig, cipher, mac, compression).
const MAX_LOCAL_NAMES: usize = 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalNames(pub Vec<&'static str>);

impl LocalNames {
    pub fn first(&self) -> &str {
        self.0.first().copied().unwrap_or("")
    }

    pub fn push(&mut self, name: &'static str) -> Result<()> {
        if self.0.len() >= MAX_LOCAL_NAMES {
            return Err(Error::bug());
        }
        self.0.push(name);
        Ok(())
    }
}

impl TryFrom<&[&'static str]> for LocalNames {
    type Error = Error;
    fn try_from(v: &[&'static str]) -> Result<Self> {
        if v.len() > MAX_LOCAL_NAMES {
            return Err(Error::bug());
        }
        Ok(LocalNames(v.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_clients_order() {
        // We're the client: our own order (`local`) should win over the
        // server's (`remote`) when both list the same two algorithms in
        // opposite order.
        let local: LocalNames = (&[
            "aes256-ctr",
            "chacha20-poly1305@openssh.com",
        ][..])
            .try_into()
            .unwrap();
        let remote = NameListInnerTestHelper::wire("chacha20-poly1305@openssh.com,aes256-ctr");
        assert_eq!(remote.first_match(true, &local).unwrap(), Some("aes256-ctr"));
    }

    #[test]
    fn negotiate_prefers_remote_order_as_server() {
        // We're the server: the client's order (`remote`) should win.
        let local: LocalNames = (&[
            "aes256-ctr",
            "chacha20-poly1305@openssh.com",
        ][..])
            .try_into()
            .unwrap();
        let remote = NameListInnerTestHelper::wire("chacha20-poly1305@openssh.com,aes256-ctr");
        assert_eq!(
            remote.first_match(false, &local).unwrap(),
            Some("chacha20-poly1305@openssh.com")
        );
    }

    #[test]
    fn negotiate_no_match() {
        let local: LocalNames = (&["aes256-ctr"][..]).try_into().unwrap();
        let remote = NameListInnerTestHelper::wire("aes128-ctr,3des-cbc");
        assert_eq!(remote.first_match(true, &local).unwrap(), None);
    }

    // Small helper so the test above can construct a NameList::Wire variant
    // without exposing the private enum outside the module.
    struct NameListInnerTestHelper;
    impl NameListInnerTestHelper {
        fn wire(s: &'static str) -> NameList<'static> {
            NameList(NameListInner::Wire(s))
        }
    }
}
