use crate::packets::{Packet, ParseError, SegmentRouting};
use crate::{Mbuf, Result, SizeOf};
use std::fmt;
use std::ptr::NonNull;
use std::slice;

/// SRH HMAC TLV type (RFC 8754).
pub const HMAC_TLV_TYPE: u8 = 5;

/// Transit-proof TLV type.
pub const POT_TLV_TYPE: u8 = 6;

const NONCE_LENGTH: u8 = 16;

/// HMAC TLV.
///
/// The value authenticates the IPv6 source address, the SRH and the TLV
/// metadata itself (the first 8 bytes of this struct).
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct HmacTlvHeader {
    tlv_type: u8,
    length: u8,
    // 1-bit D flag, 15 bits reserved
    d_res: u16,
    key_id: u32,
    hmac_value: [u8; 32],
}

impl HmacTlvHeader {
    /// The TLV bytes covered by the HMAC preimage: everything up to but
    /// not including the value itself.
    pub fn meta_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(unsafe { slice::from_raw_parts(self as *const _ as *const u8, 8) });
        out
    }
}

impl Default for HmacTlvHeader {
    fn default() -> HmacTlvHeader {
        HmacTlvHeader {
            tlv_type: HMAC_TLV_TYPE,
            length: (HmacTlvHeader::size_of() - 2) as u8,
            d_res: 0,
            key_id: 0,
            hmac_value: [0; 32],
        }
    }
}

pub struct HmacTlv {
    envelope: SegmentRouting,
    header: NonNull<HmacTlvHeader>,
    offset: usize,
}

impl HmacTlv {
    #[inline]
    fn header(&self) -> &HmacTlvHeader {
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut HmacTlvHeader {
        unsafe { self.header.as_mut() }
    }

    /// A copy of the on-wire TLV, for HMAC computation.
    #[inline]
    pub fn wire_header(&self) -> HmacTlvHeader {
        *self.header()
    }

    #[inline]
    pub fn tlv_type(&self) -> u8 {
        self.header().tlv_type
    }

    #[inline]
    pub fn length(&self) -> u8 {
        self.header().length
    }

    #[inline]
    pub fn d_flag(&self) -> bool {
        u16::from_be(self.header().d_res) & 0x8000 != 0
    }

    #[inline]
    pub fn key_id(&self) -> u32 {
        u32::from_be(self.header().key_id)
    }

    #[inline]
    pub fn set_key_id(&mut self, key_id: u32) {
        self.header_mut().key_id = u32::to_be(key_id);
    }

    #[inline]
    pub fn hmac_value(&self) -> [u8; 32] {
        self.header().hmac_value
    }

    #[inline]
    pub fn set_hmac_value(&mut self, value: &[u8; 32]) {
        self.header_mut().hmac_value = *value;
    }
}

impl fmt::Debug for HmacTlv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("hmac tlv")
            .field("tlv_type", &self.tlv_type())
            .field("length", &self.length())
            .field("d_flag", &self.d_flag())
            .field("key_id", &self.key_id())
            .field("$offset", &self.offset())
            .finish()
    }
}

impl Packet for HmacTlv {
    type Envelope = SegmentRouting;

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
        HmacTlvHeader::size_of()
    }

    #[inline]
    fn do_parse(envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let header: NonNull<HmacTlvHeader> = envelope.mbuf().read_data(offset)?;

        let (tlv_type, length) = unsafe {
            let h = header.as_ref();
            (h.tlv_type, h.length)
        };
        if tlv_type != HMAC_TLV_TYPE || length != (HmacTlvHeader::size_of() - 2) as u8 {
            return Err(ParseError::new("Not an HMAC TLV.").into());
        }

        Ok(HmacTlv {
            envelope,
            header,
            offset,
        })
    }

    #[inline]
    fn do_push(mut envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let mbuf = envelope.mbuf_mut();

        mbuf.extend(offset, HmacTlvHeader::size_of())?;
        let header = mbuf.write_data(offset, &HmacTlvHeader::default())?;

        let mut packet = HmacTlv {
            envelope,
            header,
            offset,
        };

        let ipv6 = packet.envelope_mut().envelope_mut();
        let payload_length = ipv6.payload_length();
        ipv6.set_payload_length(payload_length + HmacTlvHeader::size_of() as u16);

        Ok(packet)
    }

    #[inline]
    fn remove(mut self) -> Result<Self::Envelope> {
        let offset = self.offset;
        self.mbuf_mut().shrink(offset, HmacTlvHeader::size_of())?;

        let ipv6 = self.envelope.envelope_mut();
        let payload_length = ipv6.payload_length();
        ipv6.set_payload_length(payload_length - HmacTlvHeader::size_of() as u16);

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

/// Transit-proof TLV carrying the per-packet nonce and the encrypted
/// verification field each node on the path updates.
#[derive(Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct PotTlvHeader {
    tlv_type: u8,
    length: u8,
    reserved: u8,
    nonce_length: u8,
    key_set_id: u32,
    nonce: [u8; 16],
    encrypted_hmac: [u8; 32],
}

impl Default for PotTlvHeader {
    fn default() -> PotTlvHeader {
        PotTlvHeader {
            tlv_type: POT_TLV_TYPE,
            length: (PotTlvHeader::size_of() - 2) as u8,
            reserved: 0,
            nonce_length: NONCE_LENGTH,
            key_set_id: 0,
            nonce: [0; 16],
            encrypted_hmac: [0; 32],
        }
    }
}

pub struct PotTlv {
    envelope: HmacTlv,
    header: NonNull<PotTlvHeader>,
    offset: usize,
}

impl PotTlv {
    #[inline]
    fn header(&self) -> &PotTlvHeader {
        unsafe { self.header.as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut PotTlvHeader {
        unsafe { self.header.as_mut() }
    }

    #[inline]
    pub fn tlv_type(&self) -> u8 {
        self.header().tlv_type
    }

    #[inline]
    pub fn length(&self) -> u8 {
        self.header().length
    }

    #[inline]
    pub fn nonce_length(&self) -> u8 {
        self.header().nonce_length
    }

    #[inline]
    pub fn key_set_id(&self) -> u32 {
        u32::from_be(self.header().key_set_id)
    }

    #[inline]
    pub fn set_key_set_id(&mut self, key_set_id: u32) {
        self.header_mut().key_set_id = u32::to_be(key_set_id);
    }

    #[inline]
    pub fn nonce(&self) -> [u8; 16] {
        self.header().nonce
    }

    #[inline]
    pub fn set_nonce(&mut self, nonce: &[u8; 16]) {
        self.header_mut().nonce = *nonce;
    }

    #[inline]
    pub fn encrypted_hmac(&self) -> [u8; 32] {
        self.header().encrypted_hmac
    }

    #[inline]
    pub fn set_encrypted_hmac(&mut self, value: &[u8; 32]) {
        self.header_mut().encrypted_hmac = *value;
    }
}

impl fmt::Debug for PotTlv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("pot tlv")
            .field("tlv_type", &self.tlv_type())
            .field("length", &self.length())
            .field("nonce_length", &self.nonce_length())
            .field("key_set_id", &self.key_set_id())
            .field("$offset", &self.offset())
            .finish()
    }
}

impl Packet for PotTlv {
    type Envelope = HmacTlv;

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
        PotTlvHeader::size_of()
    }

    #[inline]
    fn do_parse(envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let header: NonNull<PotTlvHeader> = envelope.mbuf().read_data(offset)?;

        let (tlv_type, length, nonce_length) = unsafe {
            let h = header.as_ref();
            (h.tlv_type, h.length, h.nonce_length)
        };
        if tlv_type != POT_TLV_TYPE || length != (PotTlvHeader::size_of() - 2) as u8 {
            return Err(ParseError::new("Not a transit-proof TLV.").into());
        }
        if nonce_length != NONCE_LENGTH {
            return Err(ParseError::new("Unsupported nonce length.").into());
        }

        Ok(PotTlv {
            envelope,
            header,
            offset,
        })
    }

    #[inline]
    fn do_push(mut envelope: Self::Envelope) -> Result<Self> {
        let offset = envelope.payload_offset();
        let mbuf = envelope.mbuf_mut();

        mbuf.extend(offset, PotTlvHeader::size_of())?;
        let header = mbuf.write_data(offset, &PotTlvHeader::default())?;

        let mut packet = PotTlv {
            envelope,
            header,
            offset,
        };

        let ipv6 = packet.envelope_mut().envelope_mut().envelope_mut();
        let payload_length = ipv6.payload_length();
        ipv6.set_payload_length(payload_length + PotTlvHeader::size_of() as u16);

        Ok(packet)
    }

    #[inline]
    fn remove(mut self) -> Result<Self::Envelope> {
        let offset = self.offset;
        self.mbuf_mut().shrink(offset, PotTlvHeader::size_of())?;

        let ipv6 = self.envelope.envelope_mut().envelope_mut();
        let payload_length = ipv6.payload_length();
        ipv6.set_payload_length(payload_length - PotTlvHeader::size_of() as u16);

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
