//! Attachment store implementation.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use xc_types::IfIndex;

use super::types::{Attachment, IfAttachments, Priority};
use crate::acl::{AclEngine, AclRef};
use crate::arena::{Arena, Handle};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::intf::InterfaceTable;
use crate::packet::{FeatureControl, TrafficClass};
use crate::policy::{PolicyId, PolicyRegistry};

/// Error type for attachment operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("policy not found: {0}")]
    PolicyNotFound(PolicyId),

    #[error("policy {0} already attached to interface {1}")]
    AlreadyAttached(PolicyId, IfIndex),

    #[error("invalid interface: {0}")]
    InvalidInterface(IfIndex),

    #[error("no attachment of policy {0} on interface {1}")]
    NotFound(PolicyId, IfIndex),
}

/// Store of all attachments plus the per-interface indices.
///
/// Control operations mutate the store; the forwarding engine only calls
/// [`resolve`](AttachmentStore::resolve) and [`get`](AttachmentStore::get).
pub struct AttachmentStore {
    pool: Arena<Attachment>,
    /// Duplicate detection: (policy, rx_if) -> attachment handle.
    by_key: HashMap<(PolicyId, IfIndex), Handle>,
    /// Sparse per-interface index. Only interfaces with >= 1 attachment
    /// have an entry; the lookup context is released when the entry goes.
    per_if: HashMap<IfIndex, Arc<IfAttachments>>,
    acl: Arc<dyn AclEngine>,
    features: Arc<dyn FeatureControl>,
    interfaces: Arc<dyn InterfaceTable>,
    /// Owner tag passed to the ACL engine when acquiring contexts.
    owner: String,
}

impl std::fmt::Debug for AttachmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentStore")
            .field("attachments", &self.pool.len())
            .field("interfaces", &self.per_if.len())
            .field("owner", &self.owner)
            .finish()
    }
}

impl AttachmentStore {
    pub fn new(
        acl: Arc<dyn AclEngine>,
        features: Arc<dyn FeatureControl>,
        interfaces: Arc<dyn InterfaceTable>,
    ) -> Self {
        Self {
            pool: Arena::new(),
            by_key: HashMap::new(),
            per_if: HashMap::new(),
            acl,
            features,
            interfaces,
            owner: "xconnect".to_string(),
        }
    }

    /// Attaches policy `policy_id` to `rx_if` at `priority`.
    ///
    /// The first attachment on an interface enables the cross-connect
    /// feature for all traffic classes and acquires a lookup context; every
    /// attach re-sorts the interface list and resynchronizes the context's
    /// ACL list to the new order.
    pub fn attach(
        &mut self,
        policies: &PolicyRegistry,
        policy_id: PolicyId,
        priority: Priority,
        rx_if: IfIndex,
    ) -> Result<(), AttachError> {
        let policy = policies
            .find(policy_id)
            .and_then(|handle| policies.get(handle).map(|p| (handle, p.acl)));
        let Some((policy_handle, acl)) = policy else {
            return self.fail_attach(AttachError::PolicyNotFound(policy_id), policy_id, rx_if);
        };

        if self.by_key.contains_key(&(policy_id, rx_if)) {
            return self.fail_attach(AttachError::AlreadyAttached(policy_id, rx_if), policy_id, rx_if);
        }

        let handle = self.pool.insert(Attachment {
            policy: policy_handle,
            policy_id,
            acl,
            rx_if,
            priority,
        });
        self.by_key.insert((policy_id, rx_if), handle);

        let (mut attachments, context) = match self.per_if.get(&rx_if) {
            Some(index) => (index.attachments.clone(), index.context),
            None => {
                // First policy on this interface: enable the feature and
                // acquire a lookup context.
                for class in TrafficClass::ALL {
                    self.features.enable(rx_if, class);
                }
                (Vec::new(), self.acl.acquire_context(&self.owner, rx_if))
            }
        };
        attachments.push(handle);
        self.publish(rx_if, attachments, context);

        audit_log!(
            AuditRecord::new(AuditCategory::NetworkConfig, "AttachmentStore", "attach")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(format!("{}/{}", policy_id, rx_if))
                .with_object_type("attachment")
                .with_details(serde_json::json!({ "priority": priority }))
        );
        Ok(())
    }

    /// Detaches policy `policy_id` from `rx_if`.
    ///
    /// Removing the last attachment on an interface disables the feature
    /// and releases the lookup context back to the ACL engine.
    pub fn detach(&mut self, policy_id: PolicyId, rx_if: IfIndex) -> Result<(), AttachError> {
        if !self.interfaces.is_valid(rx_if) {
            return self.fail_detach(AttachError::InvalidInterface(rx_if), policy_id, rx_if);
        }

        let Some(handle) = self.by_key.remove(&(policy_id, rx_if)) else {
            return self.fail_detach(AttachError::NotFound(policy_id, rx_if), policy_id, rx_if);
        };

        if let Some(index) = self.per_if.get(&rx_if) {
            let mut attachments = index.attachments.clone();
            let context = index.context;
            attachments.retain(|&h| h != handle);

            if attachments.is_empty() {
                for class in TrafficClass::ALL {
                    self.features.disable(rx_if, class);
                }
                self.acl.release_context(context);
                self.per_if.remove(&rx_if);
            } else {
                self.publish(rx_if, attachments, context);
            }
        }
        self.pool.remove(handle);

        audit_log!(
            AuditRecord::new(AuditCategory::NetworkConfig, "AttachmentStore", "detach")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(format!("{}/{}", policy_id, rx_if))
                .with_object_type("attachment")
        );
        Ok(())
    }

    /// Read path: the current snapshot for `rx_if`, or `None` when the
    /// interface has no attachments (and thus no lookup context).
    pub fn resolve(&self, rx_if: IfIndex) -> Option<Arc<IfAttachments>> {
        self.per_if.get(&rx_if).cloned()
    }

    /// Resolves an attachment handle.
    pub fn get(&self, handle: Handle) -> Option<&Attachment> {
        self.pool.get(handle)
    }

    /// Iterates over all live attachments. Stable but unordered.
    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.pool.iter().map(|(_, attachment)| attachment)
    }

    /// Interfaces that currently have at least one attachment, ascending.
    pub fn attached_interfaces(&self) -> Vec<IfIndex> {
        let mut interfaces: Vec<IfIndex> = self.per_if.keys().copied().collect();
        interfaces.sort_unstable();
        interfaces
    }

    /// Number of live attachments.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Returns true if no attachments exist.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Sorts, resynchronizes the lookup context, and swaps in the new
    /// per-interface snapshot.
    fn publish(
        &mut self,
        rx_if: IfIndex,
        mut attachments: Vec<Handle>,
        context: crate::acl::LookupContextId,
    ) {
        // Stable sort: equal priorities keep their relative attach order.
        attachments.sort_by_key(|&h| self.pool.get(h).map_or(Priority::MAX, |a| a.priority));

        let acls: Vec<AclRef> = attachments
            .iter()
            .filter_map(|&h| self.pool.get(h).map(|a| a.acl))
            .collect();
        self.acl.set_context_acls(context, &acls);

        self.per_if.insert(
            rx_if,
            Arc::new(IfAttachments {
                attachments,
                context,
            }),
        );
    }

    fn fail_attach(
        &self,
        err: AttachError,
        policy_id: PolicyId,
        rx_if: IfIndex,
    ) -> Result<(), AttachError> {
        audit_log!(
            AuditRecord::new(AuditCategory::NetworkConfig, "AttachmentStore", "attach")
                .with_object_id(format!("{}/{}", policy_id, rx_if))
                .with_object_type("attachment")
                .with_error(err.to_string())
        );
        Err(err)
    }

    fn fail_detach(
        &self,
        err: AttachError,
        policy_id: PolicyId,
        rx_if: IfIndex,
    ) -> Result<(), AttachError> {
        audit_log!(
            AuditRecord::new(AuditCategory::NetworkConfig, "AttachmentStore", "detach")
                .with_object_id(format!("{}/{}", policy_id, rx_if))
                .with_object_type("attachment")
                .with_error(err.to_string())
        );
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::TableAclEngine;
    use crate::intf::SwitchInterfaceTable;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingFeatures {
        // (rx_if, class, enabled)
        events: Mutex<Vec<(IfIndex, TrafficClass, bool)>>,
    }

    impl RecordingFeatures {
        fn enabled_classes(&self, rx_if: IfIndex) -> usize {
            let events = self.events.lock().unwrap();
            let mut on = std::collections::HashSet::new();
            for (i, class, enabled) in events.iter() {
                if *i != rx_if {
                    continue;
                }
                if *enabled {
                    on.insert(*class);
                } else {
                    on.remove(class);
                }
            }
            on.len()
        }
    }

    impl FeatureControl for RecordingFeatures {
        fn enable(&self, rx_if: IfIndex, class: TrafficClass) {
            self.events.lock().unwrap().push((rx_if, class, true));
        }

        fn disable(&self, rx_if: IfIndex, class: TrafficClass) {
            self.events.lock().unwrap().push((rx_if, class, false));
        }
    }

    struct Fixture {
        policies: PolicyRegistry,
        store: AttachmentStore,
        acl: Arc<TableAclEngine>,
        features: Arc<RecordingFeatures>,
    }

    fn fixture() -> Fixture {
        let acl = Arc::new(TableAclEngine::new());
        let features = Arc::new(RecordingFeatures::default());
        let interfaces = Arc::new(SwitchInterfaceTable::new());
        for if_index in 1..=8 {
            interfaces.add(if_index);
        }

        let store = AttachmentStore::new(acl.clone(), features.clone(), interfaces);

        let mut policies = PolicyRegistry::new();
        policies.upsert(10, 3, 5, None);
        policies.upsert(11, 4, 6, None);
        policies.upsert(12, 5, 7, None);

        Fixture {
            policies,
            store,
            acl,
            features,
        }
    }

    fn resolved_policy_ids(fx: &Fixture, rx_if: IfIndex) -> Vec<PolicyId> {
        fx.store
            .resolve(rx_if)
            .map(|index| {
                index
                    .attachments
                    .iter()
                    .filter_map(|&h| fx.store.get(h).map(|a| a.policy_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_attach_unknown_policy() {
        let mut fx = fixture();
        assert_eq!(
            fx.store.attach(&fx.policies, 99, 100, 2),
            Err(AttachError::PolicyNotFound(99))
        );
        assert!(fx.store.resolve(2).is_none());
    }

    #[test]
    fn test_duplicate_attach_rejected() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();

        assert_eq!(
            fx.store.attach(&fx.policies, 10, 50, 2),
            Err(AttachError::AlreadyAttached(10, 2))
        );
        assert_eq!(fx.store.resolve(2).unwrap().attachments.len(), 1);
        assert_eq!(fx.store.len(), 1);
    }

    #[test]
    fn test_priority_orders_attachments() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        fx.store.attach(&fx.policies, 11, 50, 2).unwrap();

        assert_eq!(resolved_policy_ids(&fx, 2), vec![11, 10]);
    }

    #[test]
    fn test_equal_priority_keeps_attach_order() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 12, 100, 2).unwrap();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        fx.store.attach(&fx.policies, 11, 100, 2).unwrap();

        assert_eq!(resolved_policy_ids(&fx, 2), vec![12, 10, 11]);
    }

    #[test]
    fn test_context_acls_track_attachment_order() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        fx.store.attach(&fx.policies, 11, 50, 2).unwrap();

        let context = fx.store.resolve(2).unwrap().context;
        // acl-of-11 first, acl-of-10 second.
        assert_eq!(fx.acl.context_acls(context), Some(vec![4, 3]));

        fx.store.detach(11, 2).unwrap();
        let context = fx.store.resolve(2).unwrap().context;
        assert_eq!(fx.acl.context_acls(context), Some(vec![3]));
    }

    #[test]
    fn test_first_attach_enables_feature_and_acquires_context() {
        let mut fx = fixture();
        assert_eq!(fx.acl.context_count(), 0);

        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        assert_eq!(fx.acl.context_count(), 1);
        assert_eq!(fx.features.enabled_classes(2), 4);

        // Second attach on the same interface changes neither.
        fx.store.attach(&fx.policies, 11, 50, 2).unwrap();
        assert_eq!(fx.acl.context_count(), 1);
        assert_eq!(fx.features.enabled_classes(2), 4);
    }

    #[test]
    fn test_last_detach_releases_context_and_disables_feature() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        let first = fx.store.resolve(2).unwrap().context;

        fx.store.detach(10, 2).unwrap();
        assert!(fx.store.resolve(2).is_none());
        assert_eq!(fx.acl.context_count(), 0);
        assert_eq!(fx.features.enabled_classes(2), 0);

        // Re-attach acquires a fresh context.
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        let second = fx.store.resolve(2).unwrap().context;
        assert_ne!(first, second);
        assert_eq!(fx.acl.context_count(), 1);
    }

    #[test]
    fn test_detach_invalid_interface() {
        let mut fx = fixture();
        assert_eq!(
            fx.store.detach(10, 999),
            Err(AttachError::InvalidInterface(999))
        );
    }

    #[test]
    fn test_detach_missing_attachment() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();

        assert_eq!(fx.store.detach(11, 2), Err(AttachError::NotFound(11, 2)));
        assert_eq!(resolved_policy_ids(&fx, 2), vec![10]);
    }

    #[test]
    fn test_attach_denormalizes_acl_at_attach_time() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();

        // Updating the policy's ACL does not touch the attachment.
        fx.policies.upsert(10, 42, 5, None);
        let index = fx.store.resolve(2).unwrap();
        let attachment = fx.store.get(index.attachments[0]).unwrap();
        assert_eq!(attachment.acl, 3);
        assert_eq!(fx.acl.context_acls(index.context), Some(vec![3]));
    }

    #[test]
    fn test_iter_covers_all_live_attachments() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        fx.store.attach(&fx.policies, 11, 50, 2).unwrap();
        fx.store.attach(&fx.policies, 10, 100, 3).unwrap();
        fx.store.detach(11, 2).unwrap();

        let mut keys: Vec<(PolicyId, IfIndex)> =
            fx.store.iter().map(|a| (a.policy_id, a.rx_if)).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![(10, 2), (10, 3)]);
        assert_eq!(fx.store.attached_interfaces(), vec![2, 3]);
    }

    #[test]
    fn test_independent_interfaces() {
        let mut fx = fixture();
        fx.store.attach(&fx.policies, 10, 100, 2).unwrap();
        fx.store.attach(&fx.policies, 10, 100, 3).unwrap();

        assert_eq!(fx.acl.context_count(), 2);
        fx.store.detach(10, 2).unwrap();
        assert_eq!(fx.acl.context_count(), 1);
        assert_eq!(resolved_policy_ids(&fx, 3), vec![10]);
    }
}
