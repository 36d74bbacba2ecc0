//! Cryptographic randomness, in one place so every call site goes through
//! the same source and any future hook for a host-supplied RNG lands here.

use rand_core::RngCore;

use crate::error::{Error, Result};

pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    rand::rngs::OsRng.try_fill_bytes(buf).map_err(|_| Error::Crypto { msg: "RNG failure" })
}
