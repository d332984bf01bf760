//! Test fixtures and conversion helpers.
//!
//! Everything here panics on failure; it exists to keep tests terse and
//! is compiled only for tests or under the `testils` feature.

use crate::net::MacAddr;
use crate::packets::{protocols, Ethernet, HmacTlv, Ipv6, Packet, PotTlv, SegmentRouting};
use crate::runtime::Context;
use crate::settings::{AppSettings, Role};
use crate::Mbuf;
use std::net::Ipv6Addr;

/// The source address the deployment's ingress authenticates under.
pub fn ingress_addr() -> Ipv6Addr {
    "2a05:d014:dc7:127a:fe22:97ab:a0a8:ff18".parse().unwrap()
}

pub fn transit_sid() -> Ipv6Addr {
    "2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3".parse().unwrap()
}

pub fn egress_sid() -> Ipv6Addr {
    "2a05:d014:dc7:12dc:9648:6bf3:e182:c7b4".parse().unwrap()
}

/// The server behind the egress.
pub fn server_mac() -> MacAddr {
    MacAddr::new(0x02, 0xcc, 0xef, 0x38, 0x4b, 0x25)
}

pub fn default_settings(role: Role) -> AppSettings {
    let mut settings = AppSettings::default();
    settings.role = role;
    settings
}

pub fn test_context(role: Role) -> Context {
    Context::build(&default_settings(role)).unwrap()
}

/// Builds an Ethernet/IPv6 frame with the given payload behind a UDP
/// next-header, the shape of traffic the ingress sees.
pub fn v6_udp_frame(src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8]) -> Mbuf {
    let mbuf = Mbuf::new().unwrap();

    let mut ethernet = mbuf.push::<Ethernet>().unwrap();
    ethernet.set_dst(MacAddr::new(0x02, 0x7b, 0x09, 0xae, 0x11, 0x01));
    ethernet.set_src(MacAddr::new(0x02, 0x4d, 0x77, 0xf0, 0x23, 0x02));

    let mut ipv6 = ethernet.push::<Ipv6>().unwrap();
    ipv6.set_src(src);
    ipv6.set_dst(dst);
    ipv6.set_next_header(protocols::UDP);
    ipv6.set_payload_length(payload.len() as u16);

    let offset = ipv6.payload_offset();
    let mut mbuf = ipv6.reset();
    if !payload.is_empty() {
        mbuf.extend(offset, payload.len()).unwrap();
        mbuf.write_data_slice(offset, payload).unwrap();
    }
    mbuf
}

/// Copies the whole frame out of the buffer.
pub fn frame_bytes(mbuf: &Mbuf) -> Vec<u8> {
    let len = mbuf.data_len();
    if len == 0 {
        return Vec::new();
    }
    let slice = mbuf.read_data_slice::<u8>(0, len).unwrap();
    unsafe { slice.as_ref() }.to_vec()
}

/// Parses down to the segment routing header.
pub fn parse_srh(mbuf: Mbuf) -> SegmentRouting {
    mbuf.parse::<Ethernet>()
        .unwrap()
        .parse::<Ipv6>()
        .unwrap()
        .parse::<SegmentRouting>()
        .unwrap()
}

/// Parses down to the transit-proof TLV.
pub fn parse_pot(mbuf: Mbuf) -> PotTlv {
    parse_srh(mbuf)
        .parse::<HmacTlv>()
        .unwrap()
        .parse::<PotTlv>()
        .unwrap()
}
