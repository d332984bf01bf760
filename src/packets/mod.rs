//! Typed views over packet buffers.
//!
//! Each protocol layer wraps the one beneath it (its envelope) and exposes
//! bounds-checked field accessors over the buffer. Multi-byte fields are
//! big-endian on the wire and converted at the accessor boundary. The
//! parse chain for stamped traffic is Ethernet, IPv6, segment routing
//! header, HMAC TLV, transit-proof TLV.

pub mod ipv6;
pub mod srh;
pub mod tlv;

pub use self::ipv6::{Ipv6, Ipv6Header};
pub use self::srh::{SegmentRouting, SegmentRoutingHeader};
pub use self::tlv::{HmacTlv, HmacTlvHeader, PotTlv, PotTlvHeader};

use crate::net::MacAddr;
use crate::{Mbuf, Result, SizeOf};
use failure::Fail;
use std::fmt;
use std::ptr::NonNull;

pub mod ether_types {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86DD;
}

pub mod protocols {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const IPV6_ROUTE: u8 = 43;
    /// SRH next-header value signalling that the proof-of-transit TLVs
    /// follow the segment list.
    pub const POT_TLVS: u8 = 61;
}

/// Error when the packet does not conform to expectations.
#[derive(Debug, Fail)]
#[fail(display = "{}", _0)]
pub struct ParseError(String);

impl ParseError {
    pub fn new(msg: &str) -> Self {
        ParseError(msg.to_owned())
    }
}

/// A packet layer with a typed header view into the underlying buffer.
///
/// `parse` peels the next layer off the payload, `push` inserts a new
/// layer in front of the payload, `remove` strips the layer and returns
/// its envelope, `reset` unwinds all the way back to the `Mbuf`.
pub trait Packet: Sized {
    type Envelope: Packet;

    fn envelope(&self) -> &Self::Envelope;

    fn envelope_mut(&mut self) -> &mut Self::Envelope;

    fn mbuf(&self) -> &Mbuf;

    fn mbuf_mut(&mut self) -> &mut Mbuf;

    /// Offset of this layer's header from the start of the frame.
    fn offset(&self) -> usize;

    fn header_len(&self) -> usize;

    #[inline]
    fn payload_offset(&self) -> usize {
        self.offset() + self.header_len()
    }

    #[doc(hidden)]
    fn do_parse(envelope: Self::Envelope) -> Result<Self>;

    #[doc(hidden)]
    fn do_push(envelope: Self::Envelope) -> Result<Self>;

    /// Strips this layer off the buffer and returns the envelope.
    fn remove(self) -> Result<Self::Envelope>;

    /// Discards the view without touching the buffer.
    fn deparse(self) -> Self::Envelope;

    /// Unwinds the view chain and returns the raw buffer.
    fn reset(self) -> Mbuf;

    #[inline]
    fn parse<T: Packet<Envelope = Self>>(self) -> Result<T> {
        T::do_parse(self)
    }

    #[inline]
    fn push<T: Packet<Envelope = Self>>(self) -> Result<T> {
        T::do_push(self)
    }
}

impl Packet for Mbuf {
    type Envelope = Mbuf;

    #[inline]
    fn envelope(&self) -> &Self::Envelope {
        self
    }

    #[inline]
    fn envelope_mut(&mut self) -> &mut Self::Envelope {
        self
    }

    #[inline]
    fn mbuf(&self) -> &Mbuf {
        self
    }

    #[inline]
    fn mbuf_mut(&mut self) -> &mut Mbuf {
        self
    }

    #[inline]
    fn offset(&self) -> usize {
        0
    }

    #[inline]
    fn header_len(&self) -> usize {
        0
    }

    #[inline]
    fn do_parse(envelope: Self::Envelope) -> Result<Self> {
        Ok(envelope)
    }

    #[inline]
    fn do_push(envelope: Self::Envelope) -> Result<Self> {
        Ok(envelope)
    }

    #[inline]
    fn remove(self) -> Result<Self::Envelope> {
        Ok(self)
    }

    #[inline]
    fn deparse(self) -> Self::Envelope {
        self
    }

    #[inline]
    fn reset(self) -> Mbuf {
        self
    }
}

/// Ethernet header.
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct EthernetHeader {
    dst: MacAddr,
    src: MacAddr,
    ether_type: u16,
}

impl Default for EthernetHeader {
    fn default() -> EthernetHeader {
        EthernetHeader {
            dst: MacAddr::UNSPECIFIED,
            src: MacAddr::UNSPECIFIED,
            ether_type: 0,
        }
    }
}

pub struct Ethernet {
    envelope: Mbuf,
    header: NonNull<EthernetHeader>,
    offset: usize,
}

impl Ethernet {
    #[inline]
    fn header(&self) -> &EthernetHeader {
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut EthernetHeader {
        unsafe { self.header.as_mut() }
    }

    #[inline]
    pub fn dst(&self) -> MacAddr {
        self.header().dst
    }

    #[inline]
    pub fn set_dst(&mut self, dst: MacAddr) {
        self.header_mut().dst = dst;
    }

    #[inline]
    pub fn src(&self) -> MacAddr {
        self.header().src
    }

    #[inline]
    pub fn set_src(&mut self, src: MacAddr) {
        self.header_mut().src = src;
    }

    #[inline]
    pub fn ether_type(&self) -> u16 {
        u16::from_be(self.header().ether_type)
    }

    #[inline]
    pub fn set_ether_type(&mut self, ether_type: u16) {
        self.header_mut().ether_type = u16::to_be(ether_type);
    }
}

impl fmt::Debug for Ethernet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ethernet")
            .field("dst", &format!("{}", self.dst()))
            .field("src", &format!("{}", self.src()))
            .field("ether_type", &format!("{:#06x}", self.ether_type()))
            .field("$offset", &self.offset())
            .finish()
    }
}

impl Packet for Ethernet {
    type Envelope = Mbuf;

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
        &self.envelope
    }

    #[inline]
    fn mbuf_mut(&mut self) -> &mut Mbuf {
        &mut self.envelope
    }

    #[inline]
    fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    fn header_len(&self) -> usize {
        EthernetHeader::size_of()
    }

    #[inline]
    fn do_parse(envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let header = envelope.mbuf().read_data(offset)?;

        Ok(Ethernet {
            envelope,
            header,
            offset,
        })
    }

    #[inline]
    fn do_push(mut envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let mbuf = envelope.mbuf_mut();

        mbuf.extend(offset, EthernetHeader::size_of())?;
        let header = mbuf.write_data(offset, &EthernetHeader::default())?;

        Ok(Ethernet {
            envelope,
            header,
            offset,
        })
    }

    #[inline]
    fn remove(mut self) -> Result<Self::Envelope> {
        let offset = self.offset;
        self.mbuf_mut().shrink(offset, EthernetHeader::size_of())?;
        Ok(self.envelope)
    }

    #[inline]
    fn deparse(self) -> Self::Envelope {
        self.envelope
    }

    #[inline]
    fn reset(self) -> Mbuf {
        self.envelope
    }
}

/// Inserts the segment routing header and the two proof-of-transit TLVs
/// between the IPv6 header and its payload.
///
/// The inner payload protocol moves into the HMAC-covered SRH reserved
/// byte so `remove_extensions` can restore the IPv6 next-header chain.
/// Segment entries and the TLV value fields start out zeroed; the ingress
/// fills them in before sealing.
pub fn add_extensions(ipv6: Ipv6) -> Result<PotTlv> {
    let mut srh = ipv6.push::<SegmentRouting>()?;
    let inner = srh.next_header();
    srh.set_inner_protocol(inner);
    srh.set_next_header(protocols::POT_TLVS);

    let hmac = srh.push::<HmacTlv>()?;
    hmac.push::<PotTlv>()
}

/// Strips the proof-of-transit extensions, restoring the IPv6 header to
/// the inner payload protocol and length. The inverse of
/// [`add_extensions`].
pub fn remove_extensions(pot: PotTlv) -> Result<Ipv6> {
    let hmac = pot.remove()?;
    let mut srh = hmac.remove()?;
    let inner = srh.inner_protocol();
    srh.set_next_header(inner);
    srh.remove()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::srh::POT_FRAME;
    use crate::testils;
    use proptest::prelude::*;

    #[test]
    fn size_of_ethernet_header() {
        assert_eq!(14, EthernetHeader::size_of());
    }

    #[test]
    fn parse_ethernet_packet() {
        let packet = Mbuf::from_bytes(&POT_FRAME).unwrap();
        let ethernet = packet.parse::<Ethernet>().unwrap();

        assert_eq!("02:7b:09:ae:11:01", ethernet.dst().to_string());
        assert_eq!("02:4d:77:f0:23:02", ethernet.src().to_string());
        assert_eq!(ether_types::IPV6, ethernet.ether_type());
    }

    #[test]
    fn parse_ethernet_too_short() {
        let packet = Mbuf::from_bytes(&[0x02, 0x00, 0x00]).unwrap();
        assert!(packet.parse::<Ethernet>().is_err());
    }

    #[test]
    fn truncated_ipv6_header_fails() {
        // a full ethernet header but only 8 bytes of IPv6
        let mut bytes = POT_FRAME[..22].to_vec();
        bytes[12] = 0x86;
        bytes[13] = 0xdd;
        let packet = Mbuf::from_bytes(&bytes).unwrap();
        let ethernet = packet.parse::<Ethernet>().unwrap();
        assert!(ethernet.parse::<Ipv6>().is_err());
    }

    #[test]
    fn add_then_remove_restores_frame() {
        let payload = [0x13, 0x8d, 0x00, 0x21, 0xfe, 0x00];
        let frame = testils::v6_udp_frame(
            testils::ingress_addr(),
            testils::egress_sid(),
            &payload,
        );
        let before = testils::frame_bytes(&frame);

        let ipv6 = frame.parse::<Ethernet>().unwrap().parse::<Ipv6>().unwrap();
        let pot = add_extensions(ipv6).unwrap();

        // the chain is in place
        let srh = pot.envelope().envelope();
        assert_eq!(protocols::IPV6_ROUTE, srh.envelope().next_header());
        assert_eq!(protocols::POT_TLVS, srh.next_header());
        assert_eq!(protocols::UDP, srh.inner_protocol());

        let ipv6 = remove_extensions(pot).unwrap();
        assert_eq!(protocols::UDP, ipv6.next_header());

        let after = testils::frame_bytes(&ipv6.reset());
        assert_eq!(before, after);
    }

    proptest! {
        #[test]
        fn add_remove_round_trips_any_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let frame =
                testils::v6_udp_frame(testils::ingress_addr(), testils::egress_sid(), &payload);
            let before = testils::frame_bytes(&frame);

            let ipv6 = frame.parse::<Ethernet>().unwrap().parse::<Ipv6>().unwrap();
            let pot = add_extensions(ipv6).unwrap();
            let ipv6 = remove_extensions(pot).unwrap();

            prop_assert_eq!(before, testils::frame_bytes(&ipv6.reset()));
        }
    }

    #[test]
    fn extensions_grow_payload_length() {
        let frame = testils::v6_udp_frame(testils::ingress_addr(), testils::egress_sid(), &[0; 32]);
        let ipv6 = frame.parse::<Ethernet>().unwrap().parse::<Ipv6>().unwrap();
        assert_eq!(32, ipv6.payload_length());

        let pot = add_extensions(ipv6).unwrap();
        let v6 = pot.envelope().envelope().envelope();
        assert_eq!(32 + 136, v6.payload_length() as usize);
    }
}
