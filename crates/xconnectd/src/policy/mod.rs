//! Policy Registry - named cross-connect policies.
//!
//! A policy binds a client-assigned identifier to an ACL reference, an
//! egress interface, and an optional destination-MAC rewrite. Attachments
//! (see [`crate::attach`]) bind policies to receive interfaces; the
//! registry itself has no dependency on them.

mod registry;
mod types;

pub use registry::{PolicyError, PolicyRegistry};
pub use types::{Policy, PolicyId};
