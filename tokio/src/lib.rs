//! Tokio binding for `dusk-ssh`'s sans-I/O [`dusk_ssh::Session`]: the
//! Session Supervisor (spec.md §4.H). Owns a socket, spawns the read and
//! write tasks described in spec.md §5, and exposes `start`/`send`/
//! `close_gracefully`/`close_immediately` plus an [`dusk_ssh::Event`]
//! stream in place of the `onPacket`/`onError`/`onClosed` callbacks.
//!
//! Grounded on the teacher's `door-tokio` (manual `try_read`/`try_write`
//! loop over a `TcpStream`) and `smol/async_door.rs` (a single mutex
//! guarding the sans-I/O core, shared between the task that feeds it
//! bytes and the task that drains it).

mod supervisor;

pub use supervisor::{spawn, BehaviourBox, Supervisor, SupervisorHandle, DEFAULT_GRACE_PERIOD};
