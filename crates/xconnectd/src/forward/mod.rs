//! Forwarding Engine - the per-packet cross-connect hot path.
//!
//! One entry point, invoked per inbound batch. Each packet resolves its
//! receive interface's attachment snapshot, is evaluated against the
//! interface's lookup context, and on a hit gets its headers rewritten and
//! its continuation switched to interface output. No-match packets stay on
//! the feature arc's default continuation. There is no per-packet error
//! path: every packet is committed to exactly one continuation.

mod engine;

pub use engine::{ForwardStats, ForwardTrace, ForwardingEngine, TraceMatch};
