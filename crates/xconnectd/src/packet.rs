//! Packet handle and header primitives.
//!
//! [`Packet`] is the unit the forwarding engine works on: an owned frame
//! buffer plus receive/egress metadata and the continuation chosen for it.
//! Header accessors are bounds-checked throughout; a frame too short for
//! the header being located yields `None` rather than a read past the
//! buffer.
//!
//! The surrounding feature-arc machinery is abstracted behind
//! [`FeatureArc`] (default next stage per receive interface) and
//! [`FeatureControl`] (enable/disable of this feature per traffic class),
//! both owned by the packet runtime collaborator.

use xc_types::{IfIndex, MacAddress};

use crate::acl::{AddressFamily, FiveTuple};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETH_HDR_LEN: usize = 14;
const ETH_ADDR_LEN: usize = 6;

const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const ETHERTYPE_QINQ_LEGACY: u16 = 0x9100;

const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;

/// Where a packet goes after this feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Continue on the feature arc at the given next stage.
    Feature(u32),
    /// Cross-connect: enqueue to interface output.
    InterfaceOutput,
}

/// Traffic classes the cross-connect feature is enabled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    Ipv4Unicast,
    Ipv4Multicast,
    Ipv6Unicast,
    Ipv6Multicast,
}

impl TrafficClass {
    /// All classes the feature participates in.
    pub const ALL: [TrafficClass; 4] = [
        TrafficClass::Ipv4Unicast,
        TrafficClass::Ipv4Multicast,
        TrafficClass::Ipv6Unicast,
        TrafficClass::Ipv6Multicast,
    ];
}

/// Default-continuation source: the feature arc of the receive interface.
pub trait FeatureArc: Send + Sync {
    /// Next stage for a packet received on `rx_if` when this feature does
    /// not claim it.
    fn feature_next(&self, rx_if: IfIndex) -> u32;
}

/// Feature enable/disable on an interface, per traffic class.
pub trait FeatureControl: Send + Sync {
    fn enable(&self, rx_if: IfIndex, class: TrafficClass);
    fn disable(&self, rx_if: IfIndex, class: TrafficClass);
}

/// An owned packet buffer with forwarding metadata.
///
/// `l3_offset` is the start of the network header, as delivered by the
/// preceding arc stages; `l2_offset` tracks the Ethernet header, and moves
/// forward when a VLAN tag is collapsed.
#[derive(Debug, Clone)]
pub struct Packet {
    data: Vec<u8>,
    rx_if: IfIndex,
    tx_if: Option<IfIndex>,
    l2_offset: usize,
    l3_offset: usize,
    next: Option<Continuation>,
}

impl Packet {
    /// Wraps a full Ethernet frame received on `rx_if`.
    ///
    /// Walks the ethertype chain over 802.1Q/QinQ tags to locate the
    /// network header. Returns `None` for frames too short to carry an
    /// Ethernet header.
    pub fn from_ethernet(rx_if: IfIndex, data: Vec<u8>) -> Option<Self> {
        if data.len() < ETH_HDR_LEN {
            return None;
        }
        let mut l3_offset = ETH_HDR_LEN;
        let mut ethertype = u16::from_be_bytes([data[12], data[13]]);
        while is_vlan_ethertype(ethertype) {
            let tag_end = l3_offset + 4;
            if data.len() < tag_end {
                return None;
            }
            ethertype = u16::from_be_bytes([data[tag_end - 2], data[tag_end - 1]]);
            l3_offset = tag_end;
        }
        Some(Self {
            data,
            rx_if,
            tx_if: None,
            l2_offset: 0,
            l3_offset,
            next: None,
        })
    }

    pub fn rx_if(&self) -> IfIndex {
        self.rx_if
    }

    pub fn tx_if(&self) -> Option<IfIndex> {
        self.tx_if
    }

    pub fn set_tx_if(&mut self, tx_if: IfIndex) {
        self.tx_if = Some(tx_if);
    }

    /// The continuation committed for this packet, once processed.
    pub fn next(&self) -> Option<Continuation> {
        self.next
    }

    pub fn commit(&mut self, next: Continuation) {
        self.next = Some(next);
    }

    /// Returns true if the frame carries at least one 802.1Q/QinQ tag.
    pub fn is_tagged(&self) -> bool {
        self.l3_offset > self.l2_offset + ETH_HDR_LEN
    }

    /// Collapses VLAN tags: shifts the MAC addresses forward so an
    /// untagged Ethernet header sits immediately before the network
    /// header, and records the new L2 offset. No-op shift for untagged
    /// frames.
    pub fn collapse_vlan(&mut self) {
        let new_l2 = self.l3_offset - ETH_HDR_LEN;
        if self.is_tagged() {
            self.data
                .copy_within(self.l2_offset..self.l2_offset + 2 * ETH_ADDR_LEN, new_l2);
        }
        self.l2_offset = new_l2;
    }

    /// Destination MAC of the (possibly collapsed) Ethernet header.
    pub fn dst_mac(&self) -> MacAddress {
        let mut bytes = [0u8; ETH_ADDR_LEN];
        bytes.copy_from_slice(&self.data[self.l2_offset..self.l2_offset + ETH_ADDR_LEN]);
        MacAddress::new(bytes)
    }

    /// Overwrites the destination MAC of the Ethernet header.
    pub fn set_dst_mac(&mut self, mac: MacAddress) {
        self.data[self.l2_offset..self.l2_offset + ETH_ADDR_LEN].copy_from_slice(mac.as_bytes());
    }

    /// Source MAC of the (possibly collapsed) Ethernet header.
    pub fn src_mac(&self) -> MacAddress {
        let start = self.l2_offset + ETH_ADDR_LEN;
        let mut bytes = [0u8; ETH_ADDR_LEN];
        bytes.copy_from_slice(&self.data[start..start + ETH_ADDR_LEN]);
        MacAddress::new(bytes)
    }

    /// Returns true if the network-layer destination is multicast.
    ///
    /// IPv4: top nibble of the first destination octet is 0xE.
    /// IPv6: first destination octet is 0xff.
    /// Short headers answer false.
    pub fn ip_dst_is_multicast(&self, af: AddressFamily) -> bool {
        match af {
            AddressFamily::Ipv4 => self
                .data
                .get(self.l3_offset + 16)
                .is_some_and(|b| b >> 4 == 0xe),
            AddressFamily::Ipv6 => self
                .data
                .get(self.l3_offset + 24)
                .is_some_and(|b| *b == 0xff),
        }
    }

    /// Extracts the canonical 5-tuple for ACL matching.
    ///
    /// Returns `None` if the buffer is too short for the network header of
    /// the requested family. Missing transport headers yield zero ports.
    pub fn five_tuple(&self, af: AddressFamily) -> Option<FiveTuple> {
        match af {
            AddressFamily::Ipv4 => self.five_tuple_v4(),
            AddressFamily::Ipv6 => self.five_tuple_v6(),
        }
    }

    fn five_tuple_v4(&self) -> Option<FiveTuple> {
        let ip = self.data.get(self.l3_offset..)?;
        if ip.len() < 20 {
            return None;
        }
        let ihl = ((ip[0] & 0x0f) as usize) * 4;
        if ihl < 20 {
            return None;
        }
        let proto = ip[9];
        let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
        let dst = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);
        let (src_port, dst_port) = transport_ports(ip, ihl, proto);
        Some(FiveTuple {
            proto,
            src: IpAddr::V4(src),
            dst: IpAddr::V4(dst),
            src_port,
            dst_port,
        })
    }

    fn five_tuple_v6(&self) -> Option<FiveTuple> {
        let ip = self.data.get(self.l3_offset..)?;
        if ip.len() < 40 {
            return None;
        }
        let proto = ip[6];
        let mut src = [0u8; 16];
        src.copy_from_slice(&ip[8..24]);
        let mut dst = [0u8; 16];
        dst.copy_from_slice(&ip[24..40]);
        let (src_port, dst_port) = transport_ports(ip, 40, proto);
        Some(FiveTuple {
            proto,
            src: IpAddr::V6(Ipv6Addr::from(src)),
            dst: IpAddr::V6(Ipv6Addr::from(dst)),
            src_port,
            dst_port,
        })
    }

    /// Raw frame bytes, for diagnostics and tests.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

fn is_vlan_ethertype(ethertype: u16) -> bool {
    matches!(
        ethertype,
        ETHERTYPE_VLAN | ETHERTYPE_QINQ | ETHERTYPE_QINQ_LEGACY
    )
}

fn transport_ports(ip: &[u8], l4_offset: usize, proto: u8) -> (u16, u16) {
    if proto != IP_PROTO_TCP && proto != IP_PROTO_UDP {
        return (0, 0);
    }
    match ip.get(l4_offset..l4_offset + 4) {
        Some(l4) => (
            u16::from_be_bytes([l4[0], l4[1]]),
            u16::from_be_bytes([l4[2], l4[3]]),
        ),
        None => (0, 0),
    }
}
