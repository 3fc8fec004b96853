//! Policy registry implementation.

use std::collections::HashMap;

use thiserror::Error;
use xc_types::{IfIndex, MacAddress};

use super::types::{Policy, PolicyId};
use crate::acl::AclRef;
use crate::arena::{Arena, Handle};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;

/// Error type for policy registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("policy not found: {0}")]
    NotFound(PolicyId),
}

/// Registry of live policies.
///
/// Policies live in a generation-tagged arena; a parallel map resolves the
/// client-assigned identifier to the arena handle. Attachments hold the
/// handle, not the identifier, so the per-packet path never hashes.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    pool: Arena<Policy>,
    by_id: HashMap<PolicyId, Handle>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites the policy `id`.
    ///
    /// All three attributes are applied together; a partial update is not
    /// observable. A rewrite MAC of `Some(ZERO)` is normalized to `None`.
    ///
    /// Updating a policy does not resynchronize attachments: an attachment
    /// created before the update keeps the ACL reference it denormalized at
    /// attach time until it is detached and re-attached. The egress
    /// interface and rewrite MAC are read through the policy slot and take
    /// effect immediately.
    pub fn upsert(&mut self, id: PolicyId, acl: AclRef, tx_if: IfIndex, mac: Option<MacAddress>) {
        let dst_mac = mac.filter(|m| !m.is_zero());

        let live = self
            .by_id
            .get(&id)
            .copied()
            .filter(|&handle| self.pool.contains(handle));

        let (action, category) = match live {
            Some(handle) => {
                // In-place slot mutation: attachments holding the handle
                // keep resolving to the same slot.
                if let Some(policy) = self.pool.get_mut(handle) {
                    policy.acl = acl;
                    policy.tx_if = tx_if;
                    policy.dst_mac = dst_mac;
                }
                ("update_policy", AuditCategory::ResourceModify)
            }
            None => {
                let handle = self.pool.insert(Policy {
                    id,
                    acl,
                    tx_if,
                    dst_mac,
                });
                self.by_id.insert(id, handle);
                ("create_policy", AuditCategory::ResourceCreate)
            }
        };

        audit_log!(AuditRecord::new(category, "PolicyRegistry", action)
            .with_outcome(AuditOutcome::Success)
            .with_object_id(id.to_string())
            .with_object_type("policy")
            .with_details(serde_json::json!({ "acl": acl, "tx_if": tx_if })));
    }

    /// Removes the policy `id`.
    ///
    /// Attachments referencing the policy are not checked or cleaned up;
    /// the caller is expected to detach them first. Their held handles stop
    /// resolving once the slot is freed.
    pub fn delete(&mut self, id: PolicyId) -> Result<(), PolicyError> {
        let Some(handle) = self.by_id.remove(&id) else {
            let err = PolicyError::NotFound(id);
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceDelete, "PolicyRegistry", "delete_policy")
                    .with_object_id(id.to_string())
                    .with_object_type("policy")
                    .with_error(err.to_string())
            );
            return Err(err);
        };
        self.pool.remove(handle);

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "PolicyRegistry", "delete_policy")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(id.to_string())
                .with_object_type("policy")
        );
        Ok(())
    }

    /// Resolves a policy identifier to its internal handle.
    pub fn find(&self, id: PolicyId) -> Option<Handle> {
        self.by_id.get(&id).copied()
    }

    /// Resolves a handle to the policy behind it.
    pub fn get(&self, handle: Handle) -> Option<&Policy> {
        self.pool.get(handle)
    }

    /// Iterates over all live policies. Stable but unordered.
    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.pool.iter().map(|(_, policy)| policy)
    }

    /// Number of live policies.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Returns true if no policies exist.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
