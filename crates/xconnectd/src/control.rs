//! Control Surface - the configuration entry point.
//!
//! A single dispatch function maps declarative requests onto the policy
//! registry and the attachment store. Every request either succeeds or
//! returns the underlying store's error; dumps return serializable records
//! for the daemon to print.

use serde::Serialize;
use thiserror::Error;
use xc_types::{IfIndex, MacAddress};

use crate::acl::AclRef;
use crate::attach::{AttachError, Priority};
use crate::policy::{Policy, PolicyError, PolicyId};
use crate::XconnectContext;

/// A configuration or show request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Create or overwrite a policy.
    PolicyUpsert {
        id: PolicyId,
        acl: AclRef,
        tx_if: IfIndex,
        dst_mac: Option<MacAddress>,
    },
    /// Remove a policy.
    PolicyDelete { id: PolicyId },
    /// Show one policy.
    PolicyGet { id: PolicyId },
    /// Show all policies.
    PolicyDump,
    /// Attach a policy to a receive interface.
    Attach {
        policy_id: PolicyId,
        rx_if: IfIndex,
        priority: Priority,
    },
    /// Detach a policy from a receive interface.
    Detach { policy_id: PolicyId, rx_if: IfIndex },
    /// Show attachments, optionally restricted to one interface.
    AttachDump { rx_if: Option<IfIndex> },
}

/// One attachment row in a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachRecord {
    pub policy_id: PolicyId,
    pub rx_if: IfIndex,
    pub priority: Priority,
    pub acl: AclRef,
}

/// Outcome of a successful request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ControlResponse {
    /// Mutation applied.
    Done,
    Policies(Vec<Policy>),
    Attachments(Vec<AttachRecord>),
}

/// Error type for control requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Attach(#[from] AttachError),
}

/// Applies one request to the context.
pub fn dispatch(
    ctx: &mut XconnectContext,
    req: ControlRequest,
) -> Result<ControlResponse, ControlError> {
    match req {
        ControlRequest::PolicyUpsert {
            id,
            acl,
            tx_if,
            dst_mac,
        } => {
            ctx.policies.upsert(id, acl, tx_if, dst_mac);
            Ok(ControlResponse::Done)
        }
        ControlRequest::PolicyDelete { id } => {
            ctx.policies.delete(id)?;
            Ok(ControlResponse::Done)
        }
        ControlRequest::PolicyGet { id } => {
            let policy = ctx
                .policies
                .find(id)
                .and_then(|handle| ctx.policies.get(handle))
                .cloned()
                .ok_or(PolicyError::NotFound(id))?;
            Ok(ControlResponse::Policies(vec![policy]))
        }
        ControlRequest::PolicyDump => {
            let mut policies: Vec<Policy> = ctx.policies.iter().cloned().collect();
            policies.sort_by_key(|p| p.id);
            Ok(ControlResponse::Policies(policies))
        }
        ControlRequest::Attach {
            policy_id,
            rx_if,
            priority,
        } => {
            ctx.attachments
                .attach(&ctx.policies, policy_id, priority, rx_if)?;
            Ok(ControlResponse::Done)
        }
        ControlRequest::Detach { policy_id, rx_if } => {
            ctx.attachments.detach(policy_id, rx_if)?;
            Ok(ControlResponse::Done)
        }
        ControlRequest::AttachDump { rx_if } => Ok(ControlResponse::Attachments(match rx_if {
            Some(rx_if) => dump_interface(ctx, rx_if),
            None => dump_all(ctx),
        })),
    }
}

/// One interface's attachments, in evaluation order.
fn dump_interface(ctx: &XconnectContext, rx_if: IfIndex) -> Vec<AttachRecord> {
    let Some(index) = ctx.attachments.resolve(rx_if) else {
        return Vec::new();
    };
    index
        .attachments
        .iter()
        .filter_map(|&handle| ctx.attachments.get(handle))
        .map(record)
        .collect()
}

/// All attachments, grouped by interface in evaluation order. Built from
/// the per-interface snapshots so the order agrees with the filtered dump
/// and the forwarding path, including equal-priority tie-breaks.
fn dump_all(ctx: &XconnectContext) -> Vec<AttachRecord> {
    ctx.attachments
        .attached_interfaces()
        .into_iter()
        .flat_map(|rx_if| dump_interface(ctx, rx_if))
        .collect()
}

fn record(attachment: &crate::attach::Attachment) -> AttachRecord {
    AttachRecord {
        policy_id: attachment.policy_id,
        rx_if: attachment.rx_if,
        priority: attachment.priority,
        acl: attachment.acl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::TableAclEngine;
    use crate::intf::SwitchInterfaceTable;
    use crate::packet::{FeatureControl, TrafficClass};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct NoopFeatures;

    impl FeatureControl for NoopFeatures {
        fn enable(&self, _rx_if: IfIndex, _class: TrafficClass) {}
        fn disable(&self, _rx_if: IfIndex, _class: TrafficClass) {}
    }

    fn context() -> XconnectContext {
        let interfaces = Arc::new(SwitchInterfaceTable::new());
        for if_index in 1..=8 {
            interfaces.add(if_index);
        }
        XconnectContext::new(
            Arc::new(TableAclEngine::new()),
            Arc::new(NoopFeatures),
            interfaces,
        )
    }

    fn upsert(id: PolicyId, acl: AclRef, tx_if: IfIndex) -> ControlRequest {
        ControlRequest::PolicyUpsert {
            id,
            acl,
            tx_if,
            dst_mac: None,
        }
    }

    #[test]
    fn test_policy_roundtrip() {
        let mut ctx = context();
        assert_eq!(
            dispatch(&mut ctx, upsert(10, 3, 5)),
            Ok(ControlResponse::Done)
        );

        let got = dispatch(&mut ctx, ControlRequest::PolicyGet { id: 10 }).unwrap();
        let ControlResponse::Policies(policies) = got else {
            panic!("expected policies");
        };
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].acl, 3);
        assert_eq!(policies[0].tx_if, 5);
    }

    #[test]
    fn test_policy_get_missing() {
        let mut ctx = context();
        assert_eq!(
            dispatch(&mut ctx, ControlRequest::PolicyGet { id: 99 }),
            Err(ControlError::Policy(PolicyError::NotFound(99)))
        );
    }

    #[test]
    fn test_policy_dump_sorted_by_id() {
        let mut ctx = context();
        dispatch(&mut ctx, upsert(12, 5, 7)).unwrap();
        dispatch(&mut ctx, upsert(10, 3, 5)).unwrap();
        dispatch(&mut ctx, upsert(11, 4, 6)).unwrap();

        let got = dispatch(&mut ctx, ControlRequest::PolicyDump).unwrap();
        let ControlResponse::Policies(policies) = got else {
            panic!("expected policies");
        };
        let ids: Vec<PolicyId> = policies.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn test_attach_errors_pass_through() {
        let mut ctx = context();
        assert_eq!(
            dispatch(
                &mut ctx,
                ControlRequest::Attach {
                    policy_id: 99,
                    rx_if: 2,
                    priority: 100
                }
            ),
            Err(ControlError::Attach(AttachError::PolicyNotFound(99)))
        );
        assert_eq!(
            dispatch(
                &mut ctx,
                ControlRequest::Detach {
                    policy_id: 10,
                    rx_if: 2
                }
            ),
            Err(ControlError::Attach(AttachError::NotFound(10, 2)))
        );
    }

    #[test]
    fn test_attach_dump_filtered_is_evaluation_order() {
        let mut ctx = context();
        dispatch(&mut ctx, upsert(10, 3, 5)).unwrap();
        dispatch(&mut ctx, upsert(11, 4, 6)).unwrap();
        dispatch(
            &mut ctx,
            ControlRequest::Attach {
                policy_id: 10,
                rx_if: 2,
                priority: 100,
            },
        )
        .unwrap();
        dispatch(
            &mut ctx,
            ControlRequest::Attach {
                policy_id: 11,
                rx_if: 2,
                priority: 50,
            },
        )
        .unwrap();
        dispatch(
            &mut ctx,
            ControlRequest::Attach {
                policy_id: 10,
                rx_if: 3,
                priority: 10,
            },
        )
        .unwrap();

        let got = dispatch(&mut ctx, ControlRequest::AttachDump { rx_if: Some(2) }).unwrap();
        let ControlResponse::Attachments(records) = got else {
            panic!("expected attachments");
        };
        let ids: Vec<PolicyId> = records.iter().map(|r| r.policy_id).collect();
        assert_eq!(ids, vec![11, 10]);

        // Unknown interface dumps empty, not an error.
        let got = dispatch(&mut ctx, ControlRequest::AttachDump { rx_if: Some(7) }).unwrap();
        assert_eq!(got, ControlResponse::Attachments(vec![]));

        let got = dispatch(&mut ctx, ControlRequest::AttachDump { rx_if: None }).unwrap();
        let ControlResponse::Attachments(records) = got else {
            panic!("expected attachments");
        };
        assert_eq!(records.len(), 3);
        assert_eq!((records[0].rx_if, records[0].policy_id), (2, 11));
        assert_eq!((records[2].rx_if, records[2].policy_id), (3, 10));
    }

    #[test]
    fn test_attach_dump_equal_priorities_agree_with_filtered_dump() {
        let mut ctx = context();
        dispatch(&mut ctx, upsert(10, 3, 5)).unwrap();
        dispatch(&mut ctx, upsert(11, 4, 6)).unwrap();
        dispatch(&mut ctx, upsert(12, 5, 7)).unwrap();
        // Equal priorities: evaluation order is attach order, not id order.
        for policy_id in [12, 10, 11] {
            dispatch(
                &mut ctx,
                ControlRequest::Attach {
                    policy_id,
                    rx_if: 2,
                    priority: 100,
                },
            )
            .unwrap();
        }

        let got = dispatch(&mut ctx, ControlRequest::AttachDump { rx_if: None }).unwrap();
        let ControlResponse::Attachments(all) = got else {
            panic!("expected attachments");
        };
        let got = dispatch(&mut ctx, ControlRequest::AttachDump { rx_if: Some(2) }).unwrap();
        let ControlResponse::Attachments(filtered) = got else {
            panic!("expected attachments");
        };

        let ids: Vec<PolicyId> = all.iter().map(|r| r.policy_id).collect();
        assert_eq!(ids, vec![12, 10, 11]);
        assert_eq!(all, filtered);
    }
}
