//! Interface table interface.
//!
//! The cross-connect does not own interfaces; it only needs to know whether
//! a receive interface is currently valid (detach validates this before
//! touching the attachment database).

use std::collections::HashSet;
use std::sync::Mutex;

use xc_types::IfIndex;

/// Read-only view of the system interface table.
pub trait InterfaceTable: Send + Sync {
    /// Returns true if `if_index` names a live interface.
    fn is_valid(&self, if_index: IfIndex) -> bool;
}

/// Map-backed interface table for the daemon and tests.
#[derive(Debug, Default)]
pub struct SwitchInterfaceTable {
    interfaces: Mutex<HashSet<IfIndex>>,
}

impl SwitchInterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, if_index: IfIndex) {
        self.interfaces.lock().unwrap().insert(if_index);
    }

    pub fn remove(&self, if_index: IfIndex) {
        self.interfaces.lock().unwrap().remove(&if_index);
    }
}

impl InterfaceTable for SwitchInterfaceTable {
    fn is_valid(&self, if_index: IfIndex) -> bool {
        self.interfaces.lock().unwrap().contains(&if_index)
    }
}
