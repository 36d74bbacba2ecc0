//! Session configuration. Algorithm-preference fields are [`LocalNames`]
//! so they can be handed straight to [`crate::kex::AlgoConfig`]'s
//! negotiation without another conversion step.

use crate::kex::AlgoConfig;
use crate::namelist::LocalNames;

pub const DEFAULT_MAX_PACKET_SIZE: u32 = 32768;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 2 * 1024 * 1024;
pub const DEFAULT_REKEY_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_REKEY_TIME_SECONDS: u32 = 3600;
pub const DEFAULT_AUTH_TIMEOUT_SECONDS: u32 = 120;
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u32 = 0;
pub const DEFAULT_MAX_AUTH_REQUESTS: u32 = 20;

#[derive(Debug, Clone)]
pub struct Config {
    pub max_packet_size: u32,
    pub initial_window_size: u32,
    pub rekey_bytes: u64,
    pub rekey_time_seconds: u32,
    pub auth_timeout_seconds: u32,
    pub idle_timeout_seconds: u32,
    pub max_auth_requests: u32,

    /// Gates the strict-KEX sequence-number reset. Default on; only
    /// matters when both peers advertise
    /// `kex-strict-c-v00@openssh.com`/`kex-strict-s-v00@openssh.com`.
    pub strict_kex: bool,

    pub(crate) ciphers: LocalNames,
    pub(crate) macs: LocalNames,
    pub(crate) kex_algorithms: LocalNames,
    pub(crate) host_key_algorithms: LocalNames,
    pub(crate) compressions: LocalNames,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Builds the [`AlgoConfig`] this session's KEX engine will negotiate
    /// with, seeding it from this config's algorithm preference lists.
    pub fn algo_config(&self, is_client: bool) -> AlgoConfig {
        AlgoConfig::with_names(
            is_client,
            self.kex_algorithms.clone(),
            self.host_key_algorithms.clone(),
            self.ciphers.clone(),
            self.macs.clone(),
            self.compressions.clone(),
            self.strict_kex,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/// Builds a [`Config`], defaulting every field to its documented value;
/// call sites only need to override what they care about.
pub struct ConfigBuilder {
    cfg: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder {
            cfg: Config {
                max_packet_size: DEFAULT_MAX_PACKET_SIZE,
                initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
                rekey_bytes: DEFAULT_REKEY_BYTES,
                rekey_time_seconds: DEFAULT_REKEY_TIME_SECONDS,
                auth_timeout_seconds: DEFAULT_AUTH_TIMEOUT_SECONDS,
                idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
                max_auth_requests: DEFAULT_MAX_AUTH_REQUESTS,
                strict_kex: cfg!(feature = "strict-kex"),
                ciphers: AlgoConfig::default_ciphers(),
                macs: AlgoConfig::default_macs(),
                kex_algorithms: AlgoConfig::default_kex(),
                host_key_algorithms: AlgoConfig::default_hostsig(),
                compressions: AlgoConfig::default_comp(),
            },
        }
    }

    pub fn max_packet_size(mut self, v: u32) -> Self {
        self.cfg.max_packet_size = v;
        self
    }

    pub fn initial_window_size(mut self, v: u32) -> Self {
        self.cfg.initial_window_size = v;
        self
    }

    pub fn rekey_bytes(mut self, v: u64) -> Self {
        self.cfg.rekey_bytes = v;
        self
    }

    pub fn rekey_time_seconds(mut self, v: u32) -> Self {
        self.cfg.rekey_time_seconds = v;
        self
    }

    pub fn auth_timeout_seconds(mut self, v: u32) -> Self {
        self.cfg.auth_timeout_seconds = v;
        self
    }

    pub fn idle_timeout_seconds(mut self, v: u32) -> Self {
        self.cfg.idle_timeout_seconds = v;
        self
    }

    pub fn max_auth_requests(mut self, v: u32) -> Self {
        self.cfg.max_auth_requests = v;
        self
    }

    pub fn strict_kex(mut self, v: bool) -> Self {
        self.cfg.strict_kex = v;
        self
    }

    pub fn ciphers(mut self, v: LocalNames) -> Self {
        self.cfg.ciphers = v;
        self
    }

    pub fn macs(mut self, v: LocalNames) -> Self {
        self.cfg.macs = v;
        self
    }

    pub fn kex_algorithms(mut self, v: LocalNames) -> Self {
        self.cfg.kex_algorithms = v;
        self
    }

    pub fn host_key_algorithms(mut self, v: LocalNames) -> Self {
        self.cfg.host_key_algorithms = v;
        self
    }

    pub fn compressions(mut self, v: LocalNames) -> Self {
        self.cfg.compressions = v;
        self
    }

    pub fn build(self) -> Config {
        self.cfg
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_packet_size, 32768);
        assert_eq!(cfg.initial_window_size, 2 * 1024 * 1024);
        assert_eq!(cfg.rekey_bytes, 1024 * 1024 * 1024);
        assert_eq!(cfg.rekey_time_seconds, 3600);
        assert_eq!(cfg.auth_timeout_seconds, 120);
        assert_eq!(cfg.idle_timeout_seconds, 0);
        assert_eq!(cfg.max_auth_requests, 20);
    }

    #[test]
    fn builder_overrides_take_effect() {
        let cfg = Config::builder().rekey_bytes(1024).strict_kex(false).build();
        assert_eq!(cfg.rekey_bytes, 1024);
        assert!(!cfg.strict_kex);
    }
}
