//! xconnectd - ACL-driven L2/L3 cross-connect
//!
//! This crate implements an ACL-based cross-connect: packets arriving on an
//! interface are evaluated against attached policies in priority order, and
//! on a match are pulled off the regular forwarding path and sent directly
//! out the policy's egress interface, optionally with a destination-MAC
//! rewrite.
//!
//! # Architecture
//!
//! ```text
//! [control::dispatch] ──> [PolicyRegistry]
//!          │                    │ attach denormalizes ACL
//!          └──────────> [AttachmentStore] ──> ACL lookup contexts
//!                             │ Arc snapshots
//!                             ↓
//!                    [ForwardingEngine] ──> interface output / feature arc
//! ```
//!
//! # Key Components
//!
//! - [`policy::PolicyRegistry`]: live policies in a generation-tagged arena
//! - [`attach::AttachmentStore`]: per-interface priority-ordered bindings,
//!   kept in lockstep with the ACL engine's lookup contexts
//! - [`forward::ForwardingEngine`]: the batched per-packet decision path
//! - [`control`]: the declarative configuration surface
//!
//! The ACL engine, the interface table, and the packet runtime's feature
//! arc are collaborator traits; the daemon wires in-process implementations,
//! tests wire mocks.

pub mod acl;
pub mod arena;
pub mod attach;
pub mod audit;
pub mod control;
pub mod forward;
pub mod intf;
pub mod packet;
pub mod policy;

use std::sync::Arc;

pub use xc_types::{IfIndex, MacAddress};

pub use acl::{
    AclAction, AclEngine, AclMatch, AclRef, AclRule, AddressFamily, FiveTuple, LookupContextId,
    TableAclEngine,
};
pub use attach::{AttachError, Attachment, AttachmentStore, IfAttachments, Priority};
pub use control::{dispatch, AttachRecord, ControlError, ControlRequest, ControlResponse};
pub use forward::{ForwardStats, ForwardTrace, ForwardingEngine, TraceMatch};
pub use intf::{InterfaceTable, SwitchInterfaceTable};
pub use packet::{Continuation, FeatureArc, FeatureControl, Packet, TrafficClass};
pub use policy::{Policy, PolicyError, PolicyId, PolicyRegistry};

/// Subsystem version, reported by the daemon.
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 2;

/// Shared control-plane state: the policy registry and the attachment
/// store. Passed explicitly to [`control::dispatch`] and the forwarding
/// engine; there is no process-wide instance.
#[derive(Debug)]
pub struct XconnectContext {
    pub policies: PolicyRegistry,
    pub attachments: AttachmentStore,
}

impl XconnectContext {
    pub fn new(
        acl: Arc<dyn AclEngine>,
        features: Arc<dyn FeatureControl>,
        interfaces: Arc<dyn InterfaceTable>,
    ) -> Self {
        Self {
            policies: PolicyRegistry::new(),
            attachments: AttachmentStore::new(acl, features, interfaces),
        }
    }
}
