//! Attachment types.

use xc_types::IfIndex;

use crate::acl::{AclRef, LookupContextId};
use crate::arena::Handle;
use crate::policy::PolicyId;

/// Operator-assigned attachment priority. Lower value = evaluated first.
pub type Priority = u32;

/// A policy attached to a receive interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Handle of the attached policy (non-owning).
    pub policy: Handle,
    /// Identifier of the attached policy.
    pub policy_id: PolicyId,
    /// The policy's ACL reference, denormalized at attach time.
    pub acl: AclRef,
    /// Receive interface this attachment applies to.
    pub rx_if: IfIndex,
    /// Evaluation priority on `rx_if`.
    pub priority: Priority,
}

/// Per-interface attachment snapshot, read by the forwarding engine.
///
/// Snapshots are immutable: mutations build a fresh `Arc` and swap it in,
/// so a reader holds either the old complete state or the new one, never a
/// partially re-sorted list or a list out of step with its context.
#[derive(Debug, Clone)]
pub struct IfAttachments {
    /// Attachment handles, sorted ascending by priority. Equal priorities
    /// keep their relative attach order.
    pub attachments: Vec<Handle>,
    /// Lookup context whose ACL list mirrors `attachments` 1:1.
    pub context: LookupContextId,
}
