//! Control-message dispatcher: translates external commands into
//! registry/binding operations.
//!
//! Grounded on `original_source/src/xt_user.c`'s command switch
//! (`FBLOCK_BIND_IDP`/`ADD`/`RM`/... dispatched from a netlink message) and
//! `usr/fbctl.c` for the argument shapes. Transport-independent: `fbengined`
//! owns the only socket and calls `handle` directly.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::binding::Event;
use crate::error::{EngineError, EngineResult};
use crate::fb::{Factory, FactoryRegistry, FunctionalBlock};
use crate::packet::Direction;
use crate::registry::Registry;
use crate::vlink::{VlinkMessage, VlinkRegistry};
use protocol::command::Reply;
use protocol::vlink::{VlinkSubsystem, VlinkVerdict};

/// The eight control operations, already parsed out of whatever transport
/// carried them (see `protocol::command::CommandEnvelope` for the wire
/// shape `fbengined` decodes before constructing one of these).
#[derive(Clone, Debug)]
pub enum Command {
    Add { name: String, fb_type: String },
    Set { name: String, key: String, value: String },
    Rm { name: String },
    Bind { name1: String, name2: String },
    Unbind { name1: String, name2: String },
    Replace { name1: String, name2: String, drop_priv: bool },
    Subscribe { name1: String, name2: String },
    Unsubscribe { name1: String, name2: String },
}

fn vlink_subsystem_for(fb_type: &str) -> Option<VlinkSubsystem> {
    match fb_type {
        "linklayer" => Some(VlinkSubsystem::Ethernet),
        _ => None,
    }
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    factories: RwLock<FactoryRegistry>,
    worker_count: usize,
    vlink: Arc<VlinkRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, worker_count: usize, vlink: Arc<VlinkRegistry>) -> Self {
        Dispatcher {
            registry,
            factories: RwLock::new(FactoryRegistry::new()),
            worker_count,
            vlink,
        }
    }

    pub fn register_factory(&self, type_name: &str, factory: Factory) -> EngineResult<()> {
        self.factories.write().register(type_name, factory)
    }

    pub fn handle(&self, command: Command) -> EngineResult<Reply> {
        match command {
            Command::Add { name, fb_type } => self.add(&name, &fb_type),
            Command::Set { name, key, value } => self.set(&name, &key, &value),
            Command::Rm { name } => self.rm(&name),
            Command::Bind { name1, name2 } => self.bind(&name1, &name2),
            Command::Unbind { name1, name2 } => self.unbind(&name1, &name2),
            Command::Replace { name1, name2, drop_priv } => self.replace(&name1, &name2, drop_priv),
            Command::Subscribe { name1, name2 } => {
                self.registry.subscribe(&name1, &name2)?;
                Ok(Reply::Ok)
            }
            Command::Unsubscribe { name1, name2 } => {
                self.registry.unsubscribe(&name1, &name2)?;
                Ok(Reply::Ok)
            }
        }
    }

    fn add(&self, name: &str, fb_type: &str) -> EngineResult<Reply> {
        let behavior: Box<dyn FunctionalBlock> = self.factories.read().build(fb_type, self.worker_count)?;
        let fb = self.registry.init_fb(name, fb_type, self.worker_count, behavior)?;
        let idp = fb.idp();
        self.registry.publish(fb)?;
        self.notify_vlink(fb_type, name);
        Ok(Reply::Idp(idp))
    }

    /// Mirrors `xt_vlink.c`'s `ADD_DEVICE`/`RM_DEVICE` netlink notifications:
    /// FB types that back a real link-layer device (today, just
    /// `"linklayer"`/Ethernet) announce themselves on the matching
    /// subsystem's callback chain. This is a side channel, not a gate --
    /// the FB is already live by the time this runs, so a `Stop`/`Emerg`
    /// verdict is logged, not acted on.
    fn notify_vlink(&self, fb_type: &str, name: &str) {
        let Some(subsystem) = vlink_subsystem_for(fb_type) else { return };
        let msg = VlinkMessage {
            virt_name: name.to_owned(),
            real_name: name.to_owned(),
            port: 0,
            flags: 0,
        };
        if let Ok(VlinkVerdict::Emerg) = self.vlink.dispatch(subsystem, &msg) {
            tracing::warn!(name, fb_type, "vlink subsystem flagged emergency on add/rm");
        }
    }

    fn set(&self, name: &str, key: &str, value: &str) -> EngineResult<Reply> {
        self.registry.apply_event(
            name,
            Event::SetOpt {
                key: key.to_owned(),
                value: value.to_owned(),
            },
        )?;
        Ok(Reply::Ok)
    }

    fn rm(&self, name: &str) -> EngineResult<Reply> {
        let fb_type = self.registry.lookup_by_name(name).map(|fb| fb.fb_type.clone());
        self.registry.remove(name)?;
        self.registry.collect_garbage();
        if let Some(fb_type) = fb_type {
            self.notify_vlink(&fb_type, name);
        }
        Ok(Reply::Ok)
    }

    /// `BIND name1 name2`: name2 learns name1's IDP on its egress port;
    /// name1 learns name2's IDP on its ingress port.
    fn bind(&self, name1: &str, name2: &str) -> EngineResult<Reply> {
        let idp1 = self.registry.lookup_by_name(name1).ok_or(EngineError::NotFound)?.idp();
        let idp2 = self.registry.lookup_by_name(name2).ok_or(EngineError::NotFound)?.idp();
        self.registry.apply_event(
            name2,
            Event::Bind {
                direction: Direction::Egress,
                idp: idp1,
            },
        )?;
        self.registry.apply_event(
            name1,
            Event::Bind {
                direction: Direction::Ingress,
                idp: idp2,
            },
        )?;
        Ok(Reply::Ok)
    }

    fn unbind(&self, name1: &str, name2: &str) -> EngineResult<Reply> {
        let idp1 = self.registry.lookup_by_name(name1).ok_or(EngineError::NotFound)?.idp();
        let idp2 = self.registry.lookup_by_name(name2).ok_or(EngineError::NotFound)?.idp();
        self.registry.apply_event(
            name2,
            Event::Unbind {
                direction: Direction::Egress,
                idp: idp1,
            },
        )?;
        self.registry.apply_event(
            name1,
            Event::Unbind {
                direction: Direction::Ingress,
                idp: idp2,
            },
        )?;
        Ok(Reply::Ok)
    }

    fn replace(&self, name1: &str, name2: &str, drop_priv: bool) -> EngineResult<Reply> {
        let new_fb = self.registry.lookup_by_name(name2).ok_or(EngineError::NotFound)?;
        if !drop_priv {
            if let Some(old_fb) = self.registry.lookup_by_name(name1) {
                if old_fb.fb_type == new_fb.fb_type {
                    new_fb.copy_ports_from(&old_fb);
                }
            }
        }
        self.registry.replace(name1, new_fb)?;
        self.registry.collect_garbage();
        Ok(Reply::Ok)
    }
}
