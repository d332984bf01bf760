use crate::packets::{ether_types, Ethernet, Packet, ParseError};
use crate::{Mbuf, Result, SizeOf};
use std::fmt;
use std::net::Ipv6Addr;
use std::ptr::NonNull;

/// IPv6 header.
///
/// Addresses are stored as raw octets; conversion to `Ipv6Addr` happens
/// at the accessor boundary.
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct Ipv6Header {
    version_tc_flow: u32,
    payload_length: u16,
    next_header: u8,
    hop_limit: u8,
    src: [u8; 16],
    dst: [u8; 16],
}

impl Default for Ipv6Header {
    fn default() -> Ipv6Header {
        Ipv6Header {
            version_tc_flow: u32::to_be(6 << 28),
            payload_length: 0,
            next_header: 0,
            hop_limit: 64,
            src: [0; 16],
            dst: [0; 16],
        }
    }
}

pub struct Ipv6 {
    envelope: Ethernet,
    header: NonNull<Ipv6Header>,
    offset: usize,
}

impl Ipv6 {
    #[inline]
    fn header(&self) -> &Ipv6Header {
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut Ipv6Header {
        unsafe { self.header.as_mut() }
    }

    #[inline]
    pub fn version(&self) -> u8 {
        (u32::from_be(self.header().version_tc_flow) >> 28) as u8
    }

    /// Length of everything after the fixed IPv6 header, extensions
    /// included. Writers must keep this in sync when extensions are added
    /// or removed.
    #[inline]
    pub fn payload_length(&self) -> u16 {
        u16::from_be(self.header().payload_length)
    }

    #[inline]
    pub fn set_payload_length(&mut self, payload_length: u16) {
        self.header_mut().payload_length = u16::to_be(payload_length);
    }

    #[inline]
    pub fn next_header(&self) -> u8 {
        self.header().next_header
    }

    #[inline]
    pub fn set_next_header(&mut self, next_header: u8) {
        self.header_mut().next_header = next_header;
    }

    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.header().hop_limit
    }

    #[inline]
    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.header_mut().hop_limit = hop_limit;
    }

    #[inline]
    pub fn src(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.header().src)
    }

    #[inline]
    pub fn set_src(&mut self, src: Ipv6Addr) {
        self.header_mut().src = src.octets();
    }

    #[inline]
    pub fn dst(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.header().dst)
    }

    #[inline]
    pub fn set_dst(&mut self, dst: Ipv6Addr) {
        self.header_mut().dst = dst.octets();
    }
}

impl fmt::Debug for Ipv6 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ipv6")
            .field("src", &format!("{}", self.src()))
            .field("dst", &format!("{}", self.dst()))
            .field("payload_length", &self.payload_length())
            .field("next_header", &self.next_header())
            .field("hop_limit", &self.hop_limit())
            .field("$offset", &self.offset())
            .finish()
    }
}

impl Packet for Ipv6 {
    type Envelope = Ethernet;

    #[inline]
    fn envelope(&self) -> &Self::Envelope {
        &self.envelope
    }

    #[inline]
    fn envelope_mut(&mut self) -> &mut Self::Envelope {
        &mut self.envelope
    }

    #[inline]
    fn mbuf(&self) -> &Mbuf {
        self.envelope.mbuf()
    }

    #[inline]
    fn mbuf_mut(&mut self) -> &mut Mbuf {
        self.envelope.mbuf_mut()
    }

    #[inline]
    fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    fn header_len(&self) -> usize {
        Ipv6Header::size_of()
    }

    #[inline]
    fn do_parse(envelope: Self::Envelope) -> Result<Self> {
        if envelope.ether_type() != ether_types::IPV6 {
            return Err(ParseError::new("Envelope is not IPv6.").into());
        }

        let offset = envelope.payload_offset();
        let header = envelope.mbuf().read_data(offset)?;

        Ok(Ipv6 {
            envelope,
            header,
            offset,
        })
    }

    #[inline]
    fn do_push(mut envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let mbuf = envelope.mbuf_mut();

        mbuf.extend(offset, Ipv6Header::size_of())?;
        let header = mbuf.write_data(offset, &Ipv6Header::default())?;

        envelope.set_ether_type(ether_types::IPV6);

        Ok(Ipv6 {
            envelope,
            header,
            offset,
        })
    }

    #[inline]
    fn remove(mut self) -> Result<Self::Envelope> {
        let offset = self.offset;
        self.mbuf_mut().shrink(offset, Ipv6Header::size_of())?;
        Ok(self.envelope)
    }

    #[inline]
    fn deparse(self) -> Self::Envelope {
        self.envelope
    }

    #[inline]
    fn reset(self) -> Mbuf {
        self.deparse().reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::srh::POT_FRAME;
    use crate::packets::protocols;

    #[test]
    fn size_of_ipv6_header() {
        assert_eq!(40, Ipv6Header::size_of());
    }

    #[test]
    fn parse_ipv6_packet() {
        let packet = Mbuf::from_bytes(&POT_FRAME).unwrap();
        let ethernet = packet.parse::<Ethernet>().unwrap();
        let ipv6 = ethernet.parse::<Ipv6>().unwrap();

        assert_eq!(6, ipv6.version());
        assert_eq!(144, ipv6.payload_length());
        assert_eq!(protocols::IPV6_ROUTE, ipv6.next_header());
        assert_eq!(64, ipv6.hop_limit());
        assert_eq!(
            "2a05:d014:dc7:127a:fe22:97ab:a0a8:ff18",
            ipv6.src().to_string()
        );
        assert_eq!(
            "2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3",
            ipv6.dst().to_string()
        );
    }

    #[test]
    fn parse_non_ipv6_ether_type() {
        let mut bytes = POT_FRAME.to_vec();
        bytes[12] = 0x08;
        bytes[13] = 0x00;
        let packet = Mbuf::from_bytes(&bytes).unwrap();
        let ethernet = packet.parse::<Ethernet>().unwrap();
        assert!(ethernet.parse::<Ipv6>().is_err());
    }

    #[test]
    fn rewrite_destination() {
        let packet = Mbuf::from_bytes(&POT_FRAME).unwrap();
        let ethernet = packet.parse::<Ethernet>().unwrap();
        let mut ipv6 = ethernet.parse::<Ipv6>().unwrap();

        let next: Ipv6Addr = "2a05:d014:dc7:12dc:9648:6bf3:e182:c7b4".parse().unwrap();
        ipv6.set_dst(next);
        assert_eq!(next, ipv6.dst());
    }
}
