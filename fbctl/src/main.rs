//! Command-line control tool, talking to `fbengined` over its Unix socket.
//!
//! Grounded directly on `original_source/usr/fbctl.c`'s command set; the
//! subcommand names and argument shapes match it exactly, minus `preload`
//! (loading a kernel module has no analogue here -- FB types are compiled
//! into `fbengined` and registered at startup).

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use clap::{Parser, Subcommand};
use protocol::command::{CommandEnvelope, CommandType, Reply};

const SOCKET_PATH: &str = "/tmp/fbengined.sock";

#[derive(Parser)]
#[command(name = "fbctl", version)]
struct Cli {
    #[command(subcommand)]
    command: FbCommand,
}

#[derive(Subcommand)]
enum FbCommand {
    /// Add a functional block instance.
    Add { name: String, fb_type: String },
    /// Set an option on a functional block ("key=value").
    Set { name: String, option: String },
    /// Remove a functional block from the stack if unbound.
    Rm { name: String },
    /// Bind two functional blocks.
    Bind { name1: String, name2: String },
    /// Unbind two functional blocks.
    Unbind { name1: String, name2: String },
    /// Exchange name1 with name2, carrying private data forward.
    Replace { name1: String, name2: String },
    /// Exchange name1 with name2, discarding private data.
    #[command(name = "replace-drop")]
    ReplaceDrop { name1: String, name2: String },
    /// Subscribe name2 to name1's events.
    Subscribe { name1: String, name2: String },
    /// Unsubscribe name2 from name1's events.
    Unsubscribe { name1: String, name2: String },
    /// Print a JSON snapshot of every published functional block.
    Dump,
}

fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, FbCommand::Dump) {
        match send_dump() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to talk to fbengined: {err}");
                std::process::exit(1);
            }
        }
        return;
    }

    let envelope = match build_envelope(&cli.command) {
        Ok(envelope) => envelope,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(1);
        }
    };

    match send(envelope) {
        Ok(Reply::Ok) => {}
        Ok(Reply::Idp(idp)) => println!("idp={idp}"),
        Ok(Reply::Err(code)) => {
            eprintln!("fbengined rejected the command (error code {code})");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("failed to talk to fbengined: {err}");
            std::process::exit(1);
        }
    }
}

fn build_envelope(command: &FbCommand) -> Result<CommandEnvelope, String> {
    let envelope = match command {
        FbCommand::Add { name, fb_type } => CommandEnvelope::new(CommandType::Add).with_name(name).with_arg(fb_type),
        FbCommand::Set { name, option } => {
            if !option.contains('=') {
                return Err(format!("invalid option {option:?}, expected key=value"));
            }
            CommandEnvelope::new(CommandType::Set).with_name(name).with_option(option)
        }
        FbCommand::Rm { name } => CommandEnvelope::new(CommandType::Rm).with_name(name),
        FbCommand::Bind { name1, name2 } => CommandEnvelope::new(CommandType::Bind).with_name(name1).with_arg(name2),
        FbCommand::Unbind { name1, name2 } => CommandEnvelope::new(CommandType::Unbind).with_name(name1).with_arg(name2),
        FbCommand::Replace { name1, name2 } => CommandEnvelope::new(CommandType::Replace)
            .with_name(name1)
            .with_arg(name2)
            .with_drop_priv(false),
        FbCommand::ReplaceDrop { name1, name2 } => CommandEnvelope::new(CommandType::Replace)
            .with_name(name1)
            .with_arg(name2)
            .with_drop_priv(true),
        FbCommand::Subscribe { name1, name2 } => CommandEnvelope::new(CommandType::Subscribe).with_name(name1).with_arg(name2),
        FbCommand::Unsubscribe { name1, name2 } => CommandEnvelope::new(CommandType::Unsubscribe).with_name(name1).with_arg(name2),
        FbCommand::Dump => unreachable!("handled directly in main via send_dump"),
    };
    Ok(envelope)
}

fn send_dump() -> std::io::Result<String> {
    let mut stream = UnixStream::connect(SOCKET_PATH)?;
    stream.write_all(&CommandEnvelope::new(CommandType::Dump).to_bytes())?;
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let mut json_buf = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    stream.read_exact(&mut json_buf)?;
    String::from_utf8(json_buf).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

fn send(envelope: CommandEnvelope) -> std::io::Result<Reply> {
    let mut stream = UnixStream::connect(SOCKET_PATH)?;
    stream.write_all(&envelope.to_bytes())?;
    let mut reply_buf = [0u8; 5];
    stream.read_exact(&mut reply_buf)?;
    Reply::from_bytes(&reply_buf).ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed reply"))
}
