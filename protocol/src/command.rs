//! Control envelope exchanged between `fbctl` and `fbengined`.
//!
//! Fixed-layout and `repr(C)`, so the same bytes can be written and read
//! across a plain byte stream without a general-purpose serializer on the
//! hot control path.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::{name_from_bytes, name_to_bytes, NAME_SIZE};

/// The control operations the dispatcher understands. `Dump` is read-only
/// observability and carries no registry/binding mutation, so it bypasses
/// `Reply`'s fixed-size framing entirely — see `fbengined`'s connection
/// handler.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CommandType {
    Add = 0,
    Set = 1,
    Rm = 2,
    Bind = 3,
    Unbind = 4,
    Replace = 5,
    Subscribe = 6,
    Unsubscribe = 7,
    Dump = 8,
}

const OPTION_SIZE: usize = 64;

/// One control message, large enough to carry every command's arguments.
/// Unused fields are zeroed; which fields apply depends on `cmd`.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CommandEnvelope {
    pub cmd: u8,
    /// Subject FB name for ADD/SET/RM/REPLACE, or the binder's name for
    /// BIND/UNBIND.
    pub name: [u8; NAME_SIZE],
    /// FB type for ADD, replacement FB name for REPLACE, peer name for
    /// BIND/UNBIND, subscriber tag for SUBSCRIBE/UNSUBSCRIBE.
    pub arg: [u8; NAME_SIZE],
    /// `key=value` option text for SET.
    pub option: [u8; OPTION_SIZE],
    /// REPLACE only: transfer the outgoing FB's private data to the new one.
    pub drop_priv: u8,
}

impl CommandEnvelope {
    pub fn new(cmd: CommandType) -> Self {
        CommandEnvelope {
            cmd: cmd.to_u8().expect("CommandType fits in u8"),
            name: [0; NAME_SIZE],
            arg: [0; NAME_SIZE],
            option: [0; OPTION_SIZE],
            drop_priv: 0,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name_to_bytes(name);
        self
    }

    pub fn with_arg(mut self, arg: &str) -> Self {
        self.arg = name_to_bytes(arg);
        self
    }

    pub fn with_option(mut self, option: &str) -> Self {
        let mut buf = [0u8; OPTION_SIZE];
        let bytes = option.as_bytes();
        let len = bytes.len().min(OPTION_SIZE - 1);
        buf[..len].copy_from_slice(&bytes[..len]);
        self.option = buf;
        self
    }

    pub fn with_drop_priv(mut self, drop_priv: bool) -> Self {
        self.drop_priv = drop_priv as u8;
        self
    }

    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::from_u8(self.cmd)
    }

    pub fn name_str(&self) -> String {
        name_from_bytes(&self.name)
    }

    pub fn arg_str(&self) -> String {
        name_from_bytes(&self.arg)
    }

    pub fn option_str(&self) -> String {
        let end = self.option.iter().position(|&b| b == 0).unwrap_or(self.option.len());
        String::from_utf8_lossy(&self.option[..end]).into_owned()
    }

    /// Byte-for-byte view of this envelope, for writing to a socket.
    pub fn to_bytes(&self) -> [u8; std::mem::size_of::<CommandEnvelope>()] {
        // SAFETY: CommandEnvelope is `repr(C, packed)` and contains only
        // plain byte arrays and integers, so any bit pattern of its size is
        // a valid instance and the reinterpret cast is sound.
        unsafe { std::mem::transmute_copy(self) }
    }

    /// Reconstructs an envelope from exactly `size_of::<CommandEnvelope>()`
    /// bytes, as written by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != std::mem::size_of::<CommandEnvelope>() {
            return None;
        }
        let mut raw = [0u8; std::mem::size_of::<CommandEnvelope>()];
        raw.copy_from_slice(bytes);
        // SAFETY: size checked above, and the struct accepts any bit pattern.
        Some(unsafe { std::mem::transmute_copy(&raw) })
    }
}

/// Reply to a control command. Fits in a handful of bytes, as the control
/// path never returns bulk data — dumps go through `info::FbSnapshot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Idp(u32),
    Err(u8),
}

impl Reply {
    /// 1 tag byte + 4 payload bytes, fixed-size like `CommandEnvelope` so
    /// `fbctl` can read a reply with one `read_exact`.
    pub fn to_bytes(self) -> [u8; 5] {
        let mut out = [0u8; 5];
        match self {
            Reply::Ok => out[0] = 0,
            Reply::Idp(idp) => {
                out[0] = 1;
                out[1..5].copy_from_slice(&idp.to_le_bytes());
            }
            Reply::Err(code) => {
                out[0] = 2;
                out[1] = code;
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; 5]) -> Option<Self> {
        match bytes[0] {
            0 => Some(Reply::Ok),
            1 => Some(Reply::Idp(u32::from_le_bytes(bytes[1..5].try_into().ok()?))),
            2 => Some(Reply::Err(bytes[1])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_add_command() {
        let env = CommandEnvelope::new(CommandType::Add)
            .with_name("tee0")
            .with_arg("tee");
        let bytes = env.to_bytes();
        let back = CommandEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(back.command_type(), Some(CommandType::Add));
        assert_eq!(back.name_str(), "tee0");
        assert_eq!(back.arg_str(), "tee");
    }

    #[test]
    fn round_trips_bind_command() {
        let env = CommandEnvelope::new(CommandType::Bind).with_name("eth0").with_arg("tee0");
        let bytes = env.to_bytes();
        let back = CommandEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(back.command_type(), Some(CommandType::Bind));
        assert_eq!(back.name_str(), "eth0");
        assert_eq!(back.arg_str(), "tee0");
    }

    #[test]
    fn replace_carries_drop_priv_flag() {
        let env = CommandEnvelope::new(CommandType::Replace)
            .with_name("tee0")
            .with_arg("tee1")
            .with_drop_priv(true);
        assert_eq!(env.drop_priv, 1);
        let bytes = env.to_bytes();
        let back = CommandEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(back.drop_priv, 1);
    }

    #[test]
    fn set_option_is_null_terminated_and_truncated() {
        let env = CommandEnvelope::new(CommandType::Set)
            .with_name("eth0")
            .with_option("mtu=1500");
        assert_eq!(env.option_str(), "mtu=1500");
    }

    #[test]
    fn rejects_truncated_buffer() {
        assert!(CommandEnvelope::from_bytes(&[0u8; 3]).is_none());
    }

    #[test]
    fn name_round_trip_truncates_overlong_names() {
        let long = "a".repeat(64);
        let packed = name_to_bytes(&long);
        let back = name_from_bytes(&packed);
        assert_eq!(back.len(), NAME_SIZE - 1);
    }

    #[test]
    fn reply_round_trips_every_variant() {
        for reply in [Reply::Ok, Reply::Idp(42), Reply::Err(7)] {
            assert_eq!(Reply::from_bytes(&reply.to_bytes()), Some(reply));
        }
    }
}
