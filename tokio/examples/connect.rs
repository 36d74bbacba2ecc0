//! Connects to an SSH server, authenticates with a password, opens a
//! shell channel and echoes its output to stdout. Grounded on the
//! teacher's `door-tokio/examples/con1.rs`, updated from that example's
//! manual `try_read` loop over a half-built `conn::Runner` to the
//! `dusk_ssh_tokio::spawn` Session Supervisor.
//!
//! Run with `cargo run --example connect -- <host> <user> <password>`.

use std::env;
use std::time::Duration;

use log::info;
use simplelog::{ColorChoice, CombinedLogger, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use tokio::net::TcpStream;

use dusk_ssh::{BhResult, ChanNum, Config, Event, PubKey, ResponseString};
use dusk_ssh::CliBehaviour;
use dusk_ssh_tokio::{spawn, BehaviourBox};

struct PasswordClient {
    username: String,
    password: String,
}

impl CliBehaviour for PasswordClient {
    fn username(&mut self) -> BhResult<ResponseString> {
        Ok(self.username.clone())
    }

    fn valid_hostkey(&mut self, key: &PubKey) -> BhResult<bool> {
        // A real client checks `key` against a known-hosts store (spec.md
        // §6 "Known-hosts": an injected `ServerKeyVerifier`); this example
        // accepts on first use.
        let _ = key;
        Ok(true)
    }

    fn auth_password(&mut self, pwbuf: &mut ResponseString) -> BhResult<bool> {
        pwbuf.push_str(&self.password);
        Ok(true)
    }

    fn authenticated(&mut self) {
        info!("authenticated");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    CombinedLogger::init(vec![TermLogger::new(
        LevelFilter::Info,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .ok();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost:22".to_string());
    let username = args.next().unwrap_or_else(|| "root".to_string());
    let password = args.next().unwrap_or_default();

    let stream = TcpStream::connect(&host).await?;
    stream.set_nodelay(true).ok();

    let session = dusk_ssh::Session::new_client(Config::default());
    let (sup, mut events) = spawn(stream, session, BehaviourBox::client(PasswordClient { username, password }));
    let handle = sup.handle();

    let mut shell_chan: Option<ChanNum> = None;
    loop {
        let ev = match events.recv().await {
            Some(ev) => ev,
            None => break,
        };
        match ev {
            Event::Authenticated => {
                let num = handle.open_session_channel()?;
                shell_chan = Some(num);
            }
            Event::ChannelOpenConfirmed(num) if Some(num) == shell_chan => {
                handle.send_channel_request(num, dusk_ssh::ChannelReqType::Shell(dusk_ssh::ShellReq {}), true)?;
            }
            Event::ChannelData { data, .. } => {
                use std::io::Write;
                std::io::stdout().write_all(&data).ok();
                std::io::stdout().flush().ok();
            }
            Event::ChannelClose(_) | Event::Disconnected { .. } => break,
            _ => {}
        }
    }

    sup.close_gracefully(0, "done", Duration::from_secs(2)).await;
    Ok(())
}
