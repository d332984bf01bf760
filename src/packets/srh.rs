use crate::packets::{protocols, Ipv6, Packet, ParseError};
use crate::{Mbuf, Result, SizeOf};
use std::fmt;
use std::net::Ipv6Addr;
use std::ptr::NonNull;
use std::slice;

/*  From https://tools.ietf.org/html/rfc8754#section-2
    Segment Routing Extension Header (SRH)

     0                   1                   2                   3
     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    | Next Header   |  Hdr Ext Len  | Routing Type  | Segments Left |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |  Last Entry   |     Flags     |           Reserved            |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |                                                               |
    |            Segment List[0] (128 bits IPv6 address)            |
    |                                                               |
    |                                                               |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    |                                                               |
    |            Segment List[1] (128 bits IPv6 address)            |
    |                                                               |
    |                                                               |
    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

    This node carries a fixed two-entry segment list: segment 0 is the
    first transit, segment 1 the egress. Hdr Ext Len covers the segment
    list only; the HMAC and transit-proof TLVs that follow are signalled
    by Next Header = 61 rather than the SRH length. The first reserved
    byte records the inner payload protocol so the egress can restore the
    IPv6 next-header chain when it strips the extensions; the byte is
    covered by the HMAC preimage.
*/

/// IPv6 segment routing header with its two-entry segment list.
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct SegmentRoutingHeader {
    next_header: u8,
    hdr_ext_len: u8,
    routing_type: u8,
    segments_left: u8,
    last_entry: u8,
    flags: u8,
    reserved: [u8; 2],
    segments: [[u8; 16]; 2],
}

impl SegmentRoutingHeader {
    /// The header bytes fed into the transit HMAC: the fixed part with
    /// `segments_left` zeroed (the field mutates in flight, the preimage
    /// must not), followed by the segment list.
    pub fn preimage_bytes(&self) -> [u8; 40] {
        let mut copy = *self;
        copy.segments_left = 0;

        let mut out = [0u8; 40];
        out.copy_from_slice(unsafe {
            slice::from_raw_parts(&copy as *const _ as *const u8, Self::size_of())
        });
        out
    }
}

impl Default for SegmentRoutingHeader {
    fn default() -> SegmentRoutingHeader {
        SegmentRoutingHeader {
            next_header: 0,
            hdr_ext_len: 4,
            routing_type: 4,
            segments_left: 0,
            last_entry: 1,
            flags: 0,
            reserved: [0; 2],
            segments: [[0; 16]; 2],
        }
    }
}

pub struct SegmentRouting {
    envelope: Ipv6,
    header: NonNull<SegmentRoutingHeader>,
    offset: usize,
}

impl SegmentRouting {
    #[inline]
    fn header(&self) -> &SegmentRoutingHeader {
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut SegmentRoutingHeader {
        unsafe { self.header.as_mut() }
    }

    /// A copy of the on-wire header, for HMAC computation.
    #[inline]
    pub fn wire_header(&self) -> SegmentRoutingHeader {
        *self.header()
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
    pub fn hdr_ext_len(&self) -> u8 {
        self.header().hdr_ext_len
    }

    #[inline]
    pub fn routing_type(&self) -> u8 {
        self.header().routing_type
    }

    #[inline]
    pub fn segments_left(&self) -> u8 {
        self.header().segments_left
    }

    /// Sets segments left.
    ///
    /// # Remarks
    ///
    /// Should also call `set_dst` on the IPv6 envelope to keep the
    /// packet's destination in sync with the segment being traversed.
    #[inline]
    pub fn set_segments_left(&mut self, segments_left: u8) {
        self.header_mut().segments_left = segments_left;
    }

    #[inline]
    pub fn last_entry(&self) -> u8 {
        self.header().last_entry
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.header().flags
    }

    /// The stashed protocol number of the inner payload.
    #[inline]
    pub fn inner_protocol(&self) -> u8 {
        self.header().reserved[0]
    }

    #[inline]
    pub fn set_inner_protocol(&mut self, protocol: u8) {
        self.header_mut().reserved[0] = protocol;
    }

    #[inline]
    pub fn segment(&self, index: usize) -> Ipv6Addr {
        Ipv6Addr::from(self.header().segments[index])
    }

    #[inline]
    pub fn set_segment(&mut self, index: usize, segment: Ipv6Addr) {
        self.header_mut().segments[index] = segment.octets();
    }

    #[inline]
    pub fn segments(&self) -> [Ipv6Addr; 2] {
        let raw = self.header().segments;
        [Ipv6Addr::from(raw[0]), Ipv6Addr::from(raw[1])]
    }

    /// Index of the segment the packet advances to next:
    /// `last_entry - segments_left + 1`, evaluated before the decrement.
    ///
    /// Out of range when `segments_left` is 0; callers reject that state
    /// before advancing.
    #[inline]
    pub fn next_sid_index(&self) -> usize {
        self.last_entry() as usize + 1 - self.segments_left() as usize
    }
}

impl fmt::Debug for SegmentRouting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("segment routing")
            .field("next_header", &self.next_header())
            .field("hdr_ext_len", &self.hdr_ext_len())
            .field("routing_type", &self.routing_type())
            .field("segments_left", &self.segments_left())
            .field("last_entry", &self.last_entry())
            .field("segments", &self.segments())
            .field("$offset", &self.offset())
            .finish()
    }
}

impl Packet for SegmentRouting {
    type Envelope = Ipv6;

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
        SegmentRoutingHeader::size_of()
    }

    #[inline]
    fn do_parse(envelope: Self::Envelope) -> Result<Self> {
        if envelope.next_header() != protocols::IPV6_ROUTE {
            return Err(ParseError::new("IPv6 next header is not Routing.").into());
        }

        let offset = envelope.payload_offset();
        let header: NonNull<SegmentRoutingHeader> = envelope.mbuf().read_data(offset)?;

        let (routing_type, hdr_ext_len, segments_left, last_entry) = unsafe {
            let h = header.as_ref();
            (h.routing_type, h.hdr_ext_len, h.segments_left, h.last_entry)
        };

        if routing_type != 4 {
            return Err(ParseError::new("Routing type is not segment routing.").into());
        }
        if last_entry != 1 || hdr_ext_len != 2 * (last_entry + 1) {
            return Err(ParseError::new("Packet has inconsistent segment list length.").into());
        }
        if segments_left > last_entry + 1 {
            return Err(ParseError::new("Segments left exceeds the segment list.").into());
        }

        Ok(SegmentRouting {
            envelope,
            header,
            offset,
        })
    }

    #[inline]
    fn do_push(mut envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let mbuf = envelope.mbuf_mut();

        mbuf.extend(offset, SegmentRoutingHeader::size_of())?;
        let header = mbuf.write_data(offset, &SegmentRoutingHeader::default())?;

        let mut packet = SegmentRouting {
            envelope,
            header,
            offset,
        };

        packet.set_next_header(packet.envelope().next_header());
        packet
            .envelope_mut()
            .set_next_header(protocols::IPV6_ROUTE);

        let payload_length = packet.envelope().payload_length();
        packet
            .envelope_mut()
            .set_payload_length(payload_length + SegmentRoutingHeader::size_of() as u16);

        Ok(packet)
    }

    #[inline]
    fn remove(mut self) -> Result<Self::Envelope> {
        let offset = self.offset;
        let next_header = self.next_header();
        self.mbuf_mut()
            .shrink(offset, SegmentRoutingHeader::size_of())?;

        self.envelope.set_next_header(next_header);
        let payload_length = self.envelope.payload_length();
        self.envelope
            .set_payload_length(payload_length - SegmentRoutingHeader::size_of() as u16);

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

/// An in-flight proof-of-transit frame, one hop past the ingress:
/// IPv6 destination already rewritten to segment 0, segments left 1,
/// both TLVs attached, 8 bytes of inner UDP payload.
#[cfg(any(test, feature = "testils"))]
#[rustfmt::skip]
pub const POT_FRAME: [u8; 198] = [
    // ** ethernet header
    0x02, 0x7b, 0x09, 0xae, 0x11, 0x01,
    0x02, 0x4d, 0x77, 0xf0, 0x23, 0x02,
    0x86, 0xdd,
    // ** IPv6 header
    0x60, 0x00, 0x00, 0x00,
    // payload length
    0x00, 0x90,
    // next header (routing)
    0x2b,
    // hop limit
    0x40,
    // src 2a05:d014:dc7:127a:fe22:97ab:a0a8:ff18
    0x2a, 0x05, 0xd0, 0x14, 0x0d, 0xc7, 0x12, 0x7a,
    0xfe, 0x22, 0x97, 0xab, 0xa0, 0xa8, 0xff, 0x18,
    // dst 2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3
    0x2a, 0x05, 0xd0, 0x14, 0x0d, 0xc7, 0x12, 0x09,
    0x81, 0x69, 0xd7, 0xd9, 0x3b, 0xcb, 0xd2, 0xb3,
    // ** segment routing header
    // next header (PoT TLVs follow)
    0x3d,
    // hdr ext len (2 segments, units of 8 octets)
    0x04,
    // routing type
    0x04,
    // segments left
    0x01,
    // last entry
    0x01,
    // flags
    0x00,
    // reserved, [0] stashes the inner protocol (udp)
    0x11, 0x00,
    // segments[0] 2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3
    0x2a, 0x05, 0xd0, 0x14, 0x0d, 0xc7, 0x12, 0x09,
    0x81, 0x69, 0xd7, 0xd9, 0x3b, 0xcb, 0xd2, 0xb3,
    // segments[1] 2a05:d014:dc7:12dc:9648:6bf3:e182:c7b4
    0x2a, 0x05, 0xd0, 0x14, 0x0d, 0xc7, 0x12, 0xdc,
    0x96, 0x48, 0x6b, 0xf3, 0xe1, 0x82, 0xc7, 0xb4,
    // ** HMAC TLV
    // type, length
    0x05, 0x26,
    // d flag + reserved
    0x00, 0x00,
    // key id
    0x00, 0x00, 0x00, 0x01,
    // hmac value
    0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7,
    0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad, 0xae, 0xaf,
    0xb0, 0xb1, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7,
    0xb8, 0xb9, 0xba, 0xbb, 0xbc, 0xbd, 0xbe, 0xbf,
    // ** PoT TLV
    // type, length
    0x06, 0x36,
    // reserved
    0x00,
    // nonce length
    0x10,
    // key set id
    0x00, 0x00, 0x00, 0x01,
    // nonce
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37,
    0x38, 0x39, 0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f,
    // encrypted hmac
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47,
    0x48, 0x49, 0x4a, 0x4b, 0x4c, 0x4d, 0x4e, 0x4f,
    0x50, 0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57,
    0x58, 0x59, 0x5a, 0x5b, 0x5c, 0x5d, 0x5e, 0x5f,
    // ** inner payload
    0xc0, 0x01, 0x13, 0x8d, 0x00, 0x08, 0x00, 0x00,
];
