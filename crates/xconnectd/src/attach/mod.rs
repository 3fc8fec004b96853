//! Attachment Store - policy-to-interface bindings.
//!
//! An attachment binds one policy to one receive interface at an operator
//! priority. Per interface, attachments form a priority-ordered list that
//! is mirrored 1:1 into the ACL engine's lookup context for that
//! interface: after every attach/detach the context's ACL list equals, in
//! order, the ACL references of the current attachment list. The
//! forwarding engine relies on this lockstep to map a match position
//! straight back to an attachment.

mod store;
mod types;

pub use store::{AttachError, AttachmentStore};
pub use types::{Attachment, IfAttachments, Priority};
