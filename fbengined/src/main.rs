//! Control-plane daemon: owns one `engine::Context` and exposes it over a
//! Unix-domain socket, one thread per connection.
//!
//! Stands in for a kernel-interface transport out of scope here — a
//! concrete, minimal substrate so the system is runnable end-to-end, not a
//! claim about what a production transport would be.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;

use engine::{Command, Context, EngineConfig, EngineError};
use protocol::command::{CommandEnvelope, CommandType, Reply};

const SOCKET_PATH: &str = "/tmp/fbengined.sock";

fn main() {
    tracing_subscriber::fmt::try_init().ok();

    let config_path = std::env::args()
        .collect::<Vec<_>>()
        .windows(2)
        .find(|pair| pair[0] == "--config")
        .map(|pair| pair[1].clone());

    let config = match config_path {
        Some(path) => match EngineConfig::from_file(&path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("failed to load config {path}: {err}");
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    let ctx = match Context::start(config) {
        Ok(ctx) => Arc::new(ctx),
        Err(err) => {
            eprintln!("failed to start engine: {err}");
            std::process::exit(1);
        }
    };

    let _ = std::fs::remove_file(SOCKET_PATH);
    let listener = match UnixListener::bind(SOCKET_PATH) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind {SOCKET_PATH}: {err}");
            std::process::exit(1);
        }
    };
    tracing::info!(path = SOCKET_PATH, "listening");

    for conn in listener.incoming() {
        let Ok(stream) = conn else { continue };
        let ctx = Arc::clone(&ctx);
        std::thread::spawn(move || handle_connection(stream, &ctx));
    }
}

/// One control connection per thread: concurrency is serialized by the
/// control lock, not by a single-threaded reactor, so concurrent
/// connections race only at `Dispatcher::handle`'s own locking, not at this
/// accept loop.
fn handle_connection(mut stream: UnixStream, ctx: &Context) {
    let envelope_size = std::mem::size_of::<CommandEnvelope>();
    let mut buf = vec![0u8; envelope_size];

    loop {
        if stream.read_exact(&mut buf).is_err() {
            return;
        }
        let Some(envelope) = CommandEnvelope::from_bytes(&buf) else {
            let _ = stream.write_all(&Reply::Err(EngineError::Invalid as u8).to_bytes());
            continue;
        };

        if envelope.command_type() == Some(CommandType::Dump) {
            let json = serde_json::to_vec(&ctx.snapshot()).unwrap_or_default();
            let len = (json.len() as u32).to_le_bytes();
            if stream.write_all(&len).is_err() || stream.write_all(&json).is_err() {
                return;
            }
            continue;
        }

        let reply = match to_command(&envelope) {
            Some(command) => match ctx.dispatcher.handle(command) {
                Ok(reply) => reply,
                Err(err) => Reply::Err(err as u8),
            },
            None => Reply::Err(EngineError::Invalid as u8),
        };
        if stream.write_all(&reply.to_bytes()).is_err() {
            return;
        }
    }
}

fn to_command(envelope: &CommandEnvelope) -> Option<Command> {
    let name = envelope.name_str();
    let arg = envelope.arg_str();
    match envelope.command_type()? {
        CommandType::Add => Some(Command::Add { name, fb_type: arg }),
        CommandType::Set => Some(Command::Set {
            name,
            key: envelope.option_str().split('=').next()?.to_owned(),
            value: envelope.option_str().split('=').nth(1)?.to_owned(),
        }),
        CommandType::Rm => Some(Command::Rm { name }),
        CommandType::Bind => Some(Command::Bind { name1: name, name2: arg }),
        CommandType::Unbind => Some(Command::Unbind { name1: name, name2: arg }),
        CommandType::Replace => Some(Command::Replace {
            name1: name,
            name2: arg,
            drop_priv: envelope.drop_priv != 0,
        }),
        CommandType::Subscribe => Some(Command::Subscribe { name1: name, name2: arg }),
        CommandType::Unsubscribe => Some(Command::Unsubscribe { name1: name, name2: arg }),
        CommandType::Dump => None,
    }
}

