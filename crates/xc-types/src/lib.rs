//! Common network primitive types for the xconnect dataplane.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`IfIndex`]: software interface identifiers
//! - [`ParseError`]: parsing failures for the above

mod mac;

pub use mac::MacAddress;

/// Software interface index, as assigned by the interface table.
pub type IfIndex = u32;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),
}
