//! Ingress packet classification.
//!
//! The decision logic lives here, away from any BPF machinery, so the
//! same code runs inside the kernel program and under host tests. Every
//! header layer is length-gated before any of its fields is read; the
//! BPF verifier requires the check to dominate the access, and the host
//! side gets the identical fail-open behaviour for free.

use core::mem::offset_of;

use network_types::eth::{EthHdr, EtherType};
use network_types::ip::{IpProto, Ipv4Hdr};
use network_types::tcp::TcpHdr;

/// TCP destination port dropped by the ingress filter.
///
/// Illustrative policy: block plain HTTP. The port is a parameter of
/// [`classify`] so callers can carry a different value.
pub const BLOCKED_TCP_PORT: u16 = 80;

/// `EtherType` keeps its discriminants in network byte order.
const ETHERTYPE_IPV4: u16 = u16::from_be(EtherType::Ipv4 as u16);

const IP_PROTO_OFFSET: usize = EthHdr::LEN + offset_of!(Ipv4Hdr, proto);
const TCP_DEST_OFFSET: usize = EthHdr::LEN + Ipv4Hdr::LEN + offset_of!(TcpHdr, dest);

/// Pass/drop outcome of one classifier invocation.
///
/// The discriminants are the cgroup-skb return contract: non-zero lets
/// the packet through, zero drops it.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Drop = 0,
    Allow = 1,
}

/// A bounded, read-only window over one packet.
///
/// Reads past `len()` must return `None`. The BPF crate implements this
/// over the skb context, tests over plain byte slices.
pub trait PacketView {
    fn len(&self) -> usize;

    fn read_u8(&self, offset: usize) -> Option<u8>;

    /// Reads two bytes in network byte order, converted to host order.
    fn read_u16_be(&self, offset: usize) -> Option<u16>;
}

impl PacketView for [u8] {
    #[inline(always)]
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    #[inline(always)]
    fn read_u8(&self, offset: usize) -> Option<u8> {
        self.get(offset).copied()
    }

    #[inline(always)]
    fn read_u16_be(&self, offset: usize) -> Option<u16> {
        let bytes = self.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

/// Classifies one frame: Ethernet → IPv4 → TCP, dropping traffic whose
/// TCP destination port equals `blocked_port`.
///
/// Fails open: truncated frames and unsupported protocols pass. The
/// filter enforces policy on well-formed traffic, it does not validate
/// framing.
#[inline(always)]
pub fn classify<P: PacketView + ?Sized>(packet: &P, blocked_port: u16) -> Verdict {
    if packet.len() < EthHdr::LEN {
        return Verdict::Allow;
    }
    let ether_type = match packet.read_u16_be(offset_of!(EthHdr, ether_type)) {
        Some(value) => value,
        None => return Verdict::Allow,
    };
    if ether_type != ETHERTYPE_IPV4 {
        return Verdict::Allow;
    }

    if packet.len() < EthHdr::LEN + Ipv4Hdr::LEN {
        return Verdict::Allow;
    }
    let proto = match packet.read_u8(IP_PROTO_OFFSET) {
        Some(value) => value,
        None => return Verdict::Allow,
    };
    if proto != IpProto::Tcp as u8 {
        return Verdict::Allow;
    }

    if packet.len() < EthHdr::LEN + Ipv4Hdr::LEN + TcpHdr::LEN {
        return Verdict::Allow;
    }
    let dest_port = match packet.read_u16_be(TCP_DEST_OFFSET) {
        Some(value) => value,
        None => return Verdict::Allow,
    };

    if dest_port == blocked_port {
        Verdict::Drop
    } else {
        Verdict::Allow
    }
}
