//! Policy types.

use serde::Serialize;
use xc_types::{IfIndex, MacAddress};

use crate::acl::AclRef;

/// Client-assigned policy identifier, unique among live policies.
pub type PolicyId = u32;

/// A cross-connect policy.
///
/// Matching traffic is forwarded out `tx_if`; if `dst_mac` is set, the
/// destination MAC of the packet is rewritten first (unless the packet's
/// network-layer destination is multicast, see the forwarding engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    /// Policy identifier. Never changes after creation.
    pub id: PolicyId,
    /// ACL selecting the traffic this policy applies to.
    pub acl: AclRef,
    /// Egress interface for cross-connected packets.
    pub tx_if: IfIndex,
    /// Optional destination-MAC rewrite. `None` = no rewrite.
    pub dst_mac: Option<MacAddress>,
}
