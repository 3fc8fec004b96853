//! ACL engine interface.
//!
//! The cross-connect consumes ACL matching as a black box: rule sets are
//! compiled elsewhere and exposed as opaque per-interface lookup contexts.
//! [`AclEngine`] is the seam; the attachment store keeps each context's ACL
//! list in lockstep with its priority-ordered attachment list, and the
//! forwarding engine evaluates one 5-tuple per packet against it.
//!
//! [`TableAclEngine`] is a plain in-process implementation used by the
//! daemon and the tests. It does linear evaluation over optional match
//! fields and makes no claim to being a compiler.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use xc_types::IfIndex;

/// Opaque ACL identifier, owned by the ACL engine.
pub type AclRef = u32;

/// Handle to a compiled per-interface lookup context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupContextId(pub u32);

/// Address family of a packet batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// Action configured on a matching ACL rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclAction {
    Deny,
    Permit,
    PermitReflect,
}

/// Canonical classification key for ACL matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiveTuple {
    pub proto: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Result of a successful context evaluation.
///
/// `position` indexes the matching ACL within the context's ordered list.
/// The attachment store keeps that list in lockstep with the per-interface
/// attachment order, so the position indexes the attachment list directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclMatch {
    pub position: usize,
    pub acl: AclRef,
    pub rule_index: u32,
    pub action: AclAction,
}

/// External ACL matching engine.
pub trait AclEngine: Send + Sync {
    /// Acquires a fresh lookup context for `if_index` on behalf of `owner`.
    fn acquire_context(&self, owner: &str, if_index: IfIndex) -> LookupContextId;

    /// Releases a context. The handle must not be used afterwards.
    fn release_context(&self, context: LookupContextId);

    /// Replaces the ordered ACL list evaluated by `context`.
    fn set_context_acls(&self, context: LookupContextId, acls: &[AclRef]);

    /// Evaluates `key` against `context`, returning the first match in
    /// list order, or `None`.
    fn match_five_tuple(
        &self,
        context: LookupContextId,
        key: &FiveTuple,
        af: AddressFamily,
    ) -> Option<AclMatch>;
}

/// A single software ACL rule. Absent fields match anything.
#[derive(Debug, Clone, Default)]
pub struct AclRule {
    pub proto: Option<u8>,
    pub src: Option<(IpAddr, u8)>,
    pub dst: Option<(IpAddr, u8)>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub action: Option<AclAction>,
}

impl AclRule {
    fn matches(&self, key: &FiveTuple) -> bool {
        if let Some(proto) = self.proto {
            if proto != key.proto {
                return false;
            }
        }
        if let Some((addr, len)) = self.src {
            if !prefix_contains(addr, len, key.src) {
                return false;
            }
        }
        if let Some((addr, len)) = self.dst {
            if !prefix_contains(addr, len, key.dst) {
                return false;
            }
        }
        if let Some(port) = self.src_port {
            if port != key.src_port {
                return false;
            }
        }
        if let Some(port) = self.dst_port {
            if port != key.dst_port {
                return false;
            }
        }
        true
    }
}

fn prefix_contains(prefix: IpAddr, len: u8, addr: IpAddr) -> bool {
    fn masked_eq(a: &[u8], b: &[u8], len: u8) -> bool {
        let full = (len / 8) as usize;
        if a[..full] != b[..full] {
            return false;
        }
        let rem = len % 8;
        if rem == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rem);
        a[full] & mask == b[full] & mask
    }

    match (prefix, addr) {
        (IpAddr::V4(p), IpAddr::V4(a)) => masked_eq(&p.octets(), &a.octets(), len.min(32)),
        (IpAddr::V6(p), IpAddr::V6(a)) => masked_eq(&p.octets(), &a.octets(), len.min(128)),
        _ => false,
    }
}

#[derive(Debug, Default)]
struct TableAclEngineInner {
    next_context: u32,
    /// ACL id -> rule list.
    acls: HashMap<AclRef, Vec<AclRule>>,
    /// Live contexts and their ordered ACL lists.
    contexts: HashMap<LookupContextId, Vec<AclRef>>,
}

/// In-process table-driven ACL engine.
#[derive(Debug, Default)]
pub struct TableAclEngine {
    inner: Mutex<TableAclEngineInner>,
}

impl TableAclEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) the rule list for an ACL.
    pub fn set_acl(&self, acl: AclRef, rules: Vec<AclRule>) {
        let mut inner = self.inner.lock().unwrap();
        inner.acls.insert(acl, rules);
    }

    /// Number of live lookup contexts.
    pub fn context_count(&self) -> usize {
        self.inner.lock().unwrap().contexts.len()
    }

    /// The ordered ACL list of `context`, if it is live.
    pub fn context_acls(&self, context: LookupContextId) -> Option<Vec<AclRef>> {
        self.inner.lock().unwrap().contexts.get(&context).cloned()
    }
}

impl AclEngine for TableAclEngine {
    fn acquire_context(&self, _owner: &str, _if_index: IfIndex) -> LookupContextId {
        let mut inner = self.inner.lock().unwrap();
        let id = LookupContextId(inner.next_context);
        inner.next_context += 1;
        inner.contexts.insert(id, Vec::new());
        id
    }

    fn release_context(&self, context: LookupContextId) {
        let mut inner = self.inner.lock().unwrap();
        inner.contexts.remove(&context);
    }

    fn set_context_acls(&self, context: LookupContextId, acls: &[AclRef]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.contexts.get_mut(&context) {
            list.clear();
            list.extend_from_slice(acls);
        }
    }

    fn match_five_tuple(
        &self,
        context: LookupContextId,
        key: &FiveTuple,
        af: AddressFamily,
    ) -> Option<AclMatch> {
        let inner = self.inner.lock().unwrap();
        let list = inner.contexts.get(&context)?;

        let af_matches = |addr: &IpAddr| match af {
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        };
        if !af_matches(&key.src) || !af_matches(&key.dst) {
            return None;
        }

        for (position, acl) in list.iter().enumerate() {
            let Some(rules) = inner.acls.get(acl) else {
                continue;
            };
            for (rule_index, rule) in rules.iter().enumerate() {
                if rule.matches(key) {
                    return Some(AclMatch {
                        position,
                        acl: *acl,
                        rule_index: rule_index as u32,
                        action: rule.action.unwrap_or(AclAction::Permit),
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(src: [u8; 4], dst: [u8; 4], proto: u8) -> FiveTuple {
        FiveTuple {
            proto,
            src: IpAddr::V4(Ipv4Addr::from(src)),
            dst: IpAddr::V4(Ipv4Addr::from(dst)),
            src_port: 1234,
            dst_port: 80,
        }
    }

    #[test]
    fn test_context_lifecycle() {
        let engine = TableAclEngine::new();
        let ctx = engine.acquire_context("test", 1);
        assert_eq!(engine.context_count(), 1);
        assert_eq!(engine.context_acls(ctx), Some(vec![]));

        engine.set_context_acls(ctx, &[3, 7]);
        assert_eq!(engine.context_acls(ctx), Some(vec![3, 7]));

        engine.release_context(ctx);
        assert_eq!(engine.context_count(), 0);
        assert_eq!(engine.context_acls(ctx), None);
    }

    #[test]
    fn test_first_position_wins() {
        let engine = TableAclEngine::new();
        // Both ACLs match everything; position 0 must win.
        engine.set_acl(3, vec![AclRule::default()]);
        engine.set_acl(7, vec![AclRule::default()]);

        let ctx = engine.acquire_context("test", 1);
        engine.set_context_acls(ctx, &[7, 3]);

        let m = engine
            .match_five_tuple(ctx, &key([10, 0, 0, 1], [10, 0, 0, 2], 17), AddressFamily::Ipv4)
            .unwrap();
        assert_eq!(m.position, 0);
        assert_eq!(m.acl, 7);
    }

    #[test]
    fn test_prefix_match() {
        let engine = TableAclEngine::new();
        engine.set_acl(
            1,
            vec![AclRule {
                dst: Some((IpAddr::V4(Ipv4Addr::new(10, 1, 0, 0)), 16)),
                ..Default::default()
            }],
        );
        let ctx = engine.acquire_context("test", 1);
        engine.set_context_acls(ctx, &[1]);

        assert!(engine
            .match_five_tuple(ctx, &key([10, 0, 0, 1], [10, 1, 2, 3], 6), AddressFamily::Ipv4)
            .is_some());
        assert!(engine
            .match_five_tuple(ctx, &key([10, 0, 0, 1], [10, 2, 2, 3], 6), AddressFamily::Ipv4)
            .is_none());
    }

    #[test]
    fn test_prefix_match_v6() {
        let engine = TableAclEngine::new();
        engine.set_acl(
            1,
            vec![AclRule {
                dst: Some(("ff00::".parse().unwrap(), 8)),
                ..Default::default()
            }],
        );
        let ctx = engine.acquire_context("test", 1);
        engine.set_context_acls(ctx, &[1]);

        let key6 = |dst: &str| FiveTuple {
            proto: 17,
            src: "2000::1".parse().unwrap(),
            dst: dst.parse().unwrap(),
            src_port: 1234,
            dst_port: 80,
        };
        assert!(engine
            .match_five_tuple(ctx, &key6("ff05::1"), AddressFamily::Ipv6)
            .is_some());
        assert!(engine
            .match_five_tuple(ctx, &key6("fe80::1"), AddressFamily::Ipv6)
            .is_none());
    }

    #[test]
    fn test_address_family_gate() {
        let engine = TableAclEngine::new();
        engine.set_acl(1, vec![AclRule::default()]);
        let ctx = engine.acquire_context("test", 1);
        engine.set_context_acls(ctx, &[1]);

        // An IPv4 key never matches an IPv6 evaluation pass.
        assert!(engine
            .match_five_tuple(ctx, &key([10, 0, 0, 1], [10, 0, 0, 2], 6), AddressFamily::Ipv6)
            .is_none());
    }
}
