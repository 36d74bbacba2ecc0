//! Wire-format name constants: algorithm names, service names, auth method
//! names, and DISCONNECT reason codes. Grouped in one module so negotiation
//! code never has to stringly-type these.
#![allow(dead_code)]

// Key exchange
pub const SSH_NAME_CURVE25519: &str = "curve25519-sha256";
pub const SSH_NAME_CURVE25519_LIBSSH: &str = "curve25519-sha256@libssh.org";
pub const SSH_NAME_DH_GROUP14_SHA256: &str = "diffie-hellman-group14-sha256";
pub const SSH_NAME_ECDH_NISTP256: &str = "ecdh-sha2-nistp256";
pub const SSH_NAME_EXT_INFO_C: &str = "ext-info-c";
pub const SSH_NAME_EXT_INFO_S: &str = "ext-info-s";
pub const SSH_NAME_KEXGUESS2: &str = "kexguess2@matt.ucc.asn.au";
pub const SSH_NAME_STRICT_KEX_C: &str = "kex-strict-c-v00@openssh.com";
pub const SSH_NAME_STRICT_KEX_S: &str = "kex-strict-s-v00@openssh.com";

// Host / auth signature and key types
pub const SSH_NAME_ED25519: &str = "ssh-ed25519";
pub const SSH_NAME_RSA: &str = "ssh-rsa";
pub const SSH_NAME_RSA_SHA256: &str = "rsa-sha2-256";
pub const SSH_NAME_ECDSA_NISTP256: &str = "ecdsa-sha2-nistp256";

// Ciphers
pub const SSH_NAME_CHAPOLY: &str = "chacha20-poly1305@openssh.com";
pub const SSH_NAME_AES256_CTR: &str = "aes256-ctr";

// MACs
pub const SSH_NAME_HMAC_SHA256: &str = "hmac-sha2-256";

// Compression
pub const SSH_NAME_NONE: &str = "none";

// Services
pub const SSH_SERVICE_USERAUTH: &str = "ssh-userauth";
pub const SSH_SERVICE_CONNECTION: &str = "ssh-connection";

// RFC8308 extension-info
pub const SSH_EXT_SERVER_SIG_ALGS: &str = "server-sig-algs";

// Auth methods
pub const SSH_AUTHMETHOD_NONE: &str = "none";
pub const SSH_AUTHMETHOD_PASSWORD: &str = "password";
pub const SSH_AUTHMETHOD_PUBLICKEY: &str = "publickey";
pub const SSH_AUTHMETHOD_KBDINTERACTIVE: &str = "keyboard-interactive";

// Channel open types
pub const SSH_CHANNEL_SESSION: &str = "session";
pub const SSH_CHANNEL_DIRECT_TCPIP: &str = "direct-tcpip";
pub const SSH_CHANNEL_FORWARDED_TCPIP: &str = "forwarded-tcpip";
pub const SSH_CHANNEL_X11: &str = "x11";

// Channel open failure reasons (RFC4254 §5.1)
pub const SSH_OPEN_ADMINISTRATIVELY_PROHIBITED: u32 = 1;
pub const SSH_OPEN_CONNECT_FAILED: u32 = 2;
pub const SSH_OPEN_UNKNOWN_CHANNEL_TYPE: u32 = 3;
pub const SSH_OPEN_RESOURCE_SHORTAGE: u32 = 4;

// DISCONNECT reason codes (RFC4253 §11.1)
pub const SSH_DISCONNECT_HOST_NOT_ALLOWED_TO_CONNECT: u32 = 1;
pub const SSH_DISCONNECT_PROTOCOL_ERROR: u32 = 2;
pub const SSH_DISCONNECT_KEY_EXCHANGE_FAILED: u32 = 3;
pub const SSH_DISCONNECT_RESERVED: u32 = 4;
pub const SSH_DISCONNECT_MAC_ERROR: u32 = 5;
pub const SSH_DISCONNECT_COMPRESSION_ERROR: u32 = 6;
pub const SSH_DISCONNECT_SERVICE_NOT_AVAILABLE: u32 = 7;
pub const SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED: u32 = 8;
pub const SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE: u32 = 9;
pub const SSH_DISCONNECT_CONNECTION_LOST: u32 = 10;
pub const SSH_DISCONNECT_BY_APPLICATION: u32 = 11;
pub const SSH_DISCONNECT_TOO_MANY_CONNECTIONS: u32 = 12;
pub const SSH_DISCONNECT_AUTH_CANCELLED_BY_USER: u32 = 13;
pub const SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE: u32 = 14;
pub const SSH_DISCONNECT_ILLEGAL_USER_NAME: u32 = 15;
