//! Forwarding engine implementation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use xc_types::IfIndex;

use crate::acl::{AclEngine, AddressFamily};
use crate::packet::{Continuation, FeatureArc, Packet};
use crate::policy::PolicyId;
use crate::XconnectContext;

/// Counters kept by the forwarding engine, shared across workers.
#[derive(Debug, Default)]
pub struct ForwardStats {
    forwarded: AtomicU64,
}

impl ForwardStats {
    /// Packets cross-connected to interface output so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

/// Match detail recorded in a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceMatch {
    /// Position of the matching ACL in the lookup context (and thus of
    /// the attachment in the interface list).
    pub acl_pos: usize,
    /// Receive interface of the matching attachment.
    pub attach_rx_if: IfIndex,
    /// Identifier of the policy applied.
    pub policy_id: PolicyId,
}

/// Per-packet trace record, diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardTrace {
    pub rx_if: IfIndex,
    pub next: Continuation,
    pub matched: bool,
    pub match_info: Option<TraceMatch>,
}

impl fmt::Display for ForwardTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "xconnect: {}, rx_if {}, next {:?}",
            if self.matched { "match" } else { "no-match" },
            self.rx_if,
            self.next
        )?;
        if let Some(m) = self.match_info {
            write!(
                f,
                ", acl_pos {}, attached_if {}, policy_id {}",
                m.acl_pos, m.attach_rx_if, m.policy_id
            )?;
        }
        Ok(())
    }
}

/// The batched cross-connect decision pipeline.
///
/// Reads the policy registry and attachment store through the context
/// object; never mutates them. All per-iteration scratch state is
/// stack-local, and nothing on this path allocates unless tracing is
/// enabled.
pub struct ForwardingEngine {
    acl: Arc<dyn AclEngine>,
    feature_arc: Arc<dyn FeatureArc>,
    stats: ForwardStats,
}

impl ForwardingEngine {
    pub fn new(acl: Arc<dyn AclEngine>, feature_arc: Arc<dyn FeatureArc>) -> Self {
        Self {
            acl,
            feature_arc,
            stats: ForwardStats::default(),
        }
    }

    pub fn stats(&self) -> &ForwardStats {
        &self.stats
    }

    /// Processes one batch of packets of address family `af`.
    ///
    /// Every packet is committed to exactly one continuation: interface
    /// output on an ACL hit, the feature arc's default otherwise. Returns
    /// the number of packets cross-connected in this batch.
    pub fn process_batch(
        &self,
        ctx: &XconnectContext,
        packets: &mut [Packet],
        af: AddressFamily,
        mut trace: Option<&mut Vec<ForwardTrace>>,
    ) -> u64 {
        let mut forwarded = 0u64;

        for packet in packets.iter_mut() {
            let rx_if = packet.rx_if();
            let mut next = Continuation::Feature(self.feature_arc.feature_next(rx_if));
            let mut match_info = None;
            let mut matched = false;

            // Interfaces without attachments have no lookup context and
            // skip matching entirely.
            if let Some(index) = ctx.attachments.resolve(rx_if) {
                let hit = packet
                    .five_tuple(af)
                    .and_then(|key| self.acl.match_five_tuple(index.context, &key, af));

                if let Some(hit) = hit {
                    matched = true;
                    packet.collapse_vlan();
                    next = Continuation::InterfaceOutput;

                    // The context ACL list and the attachment list are in
                    // lockstep, so the match position indexes the
                    // attachment list directly.
                    let attachment = index
                        .attachments
                        .get(hit.position)
                        .and_then(|&handle| ctx.attachments.get(handle));
                    let policy =
                        attachment.and_then(|a| ctx.policies.get(a.policy).map(|p| (a, p)));

                    if let Some((attachment, policy)) = policy {
                        if let Some(mac) = policy.dst_mac {
                            // Never rewrite toward a multicast group.
                            if !packet.ip_dst_is_multicast(af) {
                                packet.set_dst_mac(mac);
                            }
                        }
                        packet.set_tx_if(policy.tx_if);
                        forwarded += 1;
                        match_info = Some(TraceMatch {
                            acl_pos: hit.position,
                            attach_rx_if: attachment.rx_if,
                            policy_id: policy.id,
                        });
                    }
                }
            }

            if let Some(sink) = trace.as_deref_mut() {
                sink.push(ForwardTrace {
                    rx_if,
                    next,
                    matched,
                    match_info,
                });
            }

            packet.commit(next);
        }

        self.stats.forwarded.fetch_add(forwarded, Ordering::Relaxed);
        forwarded
    }
}
