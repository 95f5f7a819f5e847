//! Virtual-link subsystem registry: the "parallel control channel".
//!
//! Grounded on `original_source/src/xt_vlink.c` (`vlink_add_callback`
//! inserting into a priority-sorted vector, `vlink_netlink_rcv` walking it
//! until `STOP`/`EMERG`) and `nl_vlink.h`'s subsystem table.

use std::collections::HashMap;

use parking_lot::Mutex;
use protocol::vlink::{VlinkPriority, VlinkSubsystem, VlinkVerdict};

use crate::error::{EngineError, EngineResult};

/// `ADD_DEVICE`/`RM_DEVICE`/`START_HOOK_DEVICE`/`STOP_HOOK_DEVICE` payload.
#[derive(Clone, Debug)]
pub struct VlinkMessage {
    pub virt_name: String,
    pub real_name: String,
    pub port: u16,
    pub flags: u32,
}

pub type VlinkCallback = Box<dyn Fn(&VlinkMessage) -> VlinkVerdict + Send + Sync>;

struct Registered {
    priority: VlinkPriority,
    callback: VlinkCallback,
}

/// Priority-sorted callback chain for one subsystem. A small sorted vector
/// inserted in priority-descending order is sufficient — the data path
/// never touches this.
#[derive(Default)]
struct Chain {
    callbacks: Mutex<Vec<Registered>>,
}

impl Chain {
    fn add(&self, priority: VlinkPriority, callback: VlinkCallback) {
        let mut list = self.callbacks.lock();
        list.push(Registered { priority, callback });
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn dispatch(&self, msg: &VlinkMessage) -> VlinkVerdict {
        for registered in self.callbacks.lock().iter() {
            match (registered.callback)(msg) {
                VlinkVerdict::Next => continue,
                verdict => return verdict,
            }
        }
        VlinkVerdict::Next
    }
}

/// One chain per named subsystem (Ethernet/Bluetooth/Infiniband/I2C).
pub struct VlinkRegistry {
    subsystems: HashMap<VlinkSubsystem, Chain>,
}

impl VlinkRegistry {
    pub fn new() -> Self {
        let subsystems = VlinkSubsystem::ALL.into_iter().map(|s| (s, Chain::default())).collect();
        VlinkRegistry { subsystems }
    }

    pub fn add_callback(&self, subsystem: VlinkSubsystem, priority: VlinkPriority, callback: VlinkCallback) -> EngineResult<()> {
        self.subsystems.get(&subsystem).ok_or(EngineError::NotFound)?.add(priority, callback);
        Ok(())
    }

    /// Runs `msg` through `subsystem`'s chain in priority order, stopping
    /// at the first `Stop`/`Emerg`.
    pub fn dispatch(&self, subsystem: VlinkSubsystem, msg: &VlinkMessage) -> EngineResult<VlinkVerdict> {
        Ok(self.subsystems.get(&subsystem).ok_or(EngineError::NotFound)?.dispatch(msg))
    }
}

impl Default for VlinkRegistry {
    fn default() -> Self {
        VlinkRegistry::new()
    }
}
