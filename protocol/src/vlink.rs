//! Virtual-link subsystem table and callback verdicts.
//!
//! Grounded on `nl_vlink.h`'s `vlink_subsys` groups and `xt_vlink.c`'s
//! priority-ordered callback chain: a parallel control channel riding
//! alongside the packet path, carrying a small set of named subsystems,
//! each with its own
//! priority-sorted list of callbacks invoked in order until one stops the
//! chain or raises an emergency.

use num_derive::{FromPrimitive, ToPrimitive};

/// One of the fixed subsystem groups a virtual link message can target.
/// Matches the `VLINKNLGRP_*` constants.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum VlinkSubsystem {
    Ethernet = 0,
    Bluetooth = 1,
    Infiniband = 2,
    I2c = 3,
}

impl VlinkSubsystem {
    pub const ALL: [VlinkSubsystem; 4] = [
        VlinkSubsystem::Ethernet,
        VlinkSubsystem::Bluetooth,
        VlinkSubsystem::Infiniband,
        VlinkSubsystem::I2c,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VlinkSubsystem::Ethernet => "eth",
            VlinkSubsystem::Bluetooth => "bluetooth",
            VlinkSubsystem::Infiniband => "infiniband",
            VlinkSubsystem::I2c => "i2c",
        }
    }
}

/// Callback priority. Higher runs first; matches `NETLINK_VLINK_PRIO_*`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, ToPrimitive)]
pub enum VlinkPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

/// What a callback wants done with the remainder of its chain. Matches
/// `NETLINK_VLINK_RX_{NXT,STOP,EMERG}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VlinkVerdict {
    /// Continue to the next callback in priority order.
    Next,
    /// Stop the chain; this message has been fully handled.
    Stop,
    /// Stop the chain and flag the message as failed.
    Emerg,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsystem_names_are_stable() {
        assert_eq!(VlinkSubsystem::Ethernet.name(), "eth");
        assert_eq!(VlinkSubsystem::I2c.name(), "i2c");
    }

    #[test]
    fn priority_orders_high_above_low() {
        assert!(VlinkPriority::High > VlinkPriority::Normal);
        assert!(VlinkPriority::Normal > VlinkPriority::Low);
    }
}
