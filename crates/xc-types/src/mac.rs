//! MAC address type with safe parsing and formatting.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// The zero address doubles as "no address" in rewrite configuration: a
/// policy whose rewrite MAC is zero performs no rewrite.
///
/// # Examples
///
/// ```
/// use xc_types::MacAddress;
///
/// let mac: MacAddress = "02:00:00:00:00:01".parse().unwrap();
/// assert_eq!(mac.to_string(), "02:00:00:00:00:01");
/// assert!(!mac.is_zero());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The zero/null MAC address (00:00:00:00:00:00).
    pub const ZERO: MacAddress = MacAddress([0, 0, 0, 0, 0, 0]);

    /// Creates a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if this is a multicast address (I/G bit set).
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Returns true if this is the zero address.
    pub const fn is_zero(&self) -> bool {
        self.0[0] == 0
            && self.0[1] == 0
            && self.0[2] == 0
            && self.0[3] == 0
            && self.0[4] == 0
            && self.0[5] == 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both colon- and hyphen-separated forms.
        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

impl From<MacAddress> for [u8; 6] {
    fn from(mac: MacAddress) -> [u8; 6] {
        mac.0
    }
}
