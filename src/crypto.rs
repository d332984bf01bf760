//! Per-packet cryptography for the transit proof.
//!
//! The proof chain: the ingress computes an HMAC over the path-defining
//! fields and seals it into the packet verification field under the key
//! shared with the egress; each transit peels and re-applies its own key
//! layer; the egress unseals and compares against a fresh computation.

use crate::packets::{HmacTlvHeader, SegmentRoutingHeader};
use crate::Result;
use ctr::cipher::{KeyIvInit, StreamCipher};
use failure::Fail;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::net::Ipv6Addr;
use std::ptr;
use std::sync::atomic::{compiler_fence, Ordering};

pub const KEY_LENGTH: usize = 32;
pub const HMAC_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 16;

type HmacSha256 = Hmac<Sha256>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

#[derive(Debug, Fail)]
pub enum CryptoError {
    #[fail(display = "HMAC key rejected by the primitive library.")]
    BadKey,

    #[fail(display = "Entropy source unavailable.")]
    EntropyUnavailable,
}

/// Computes the transit HMAC: HMAC-SHA256 over the IPv6 source address,
/// the SRH with `segments_left` zeroed in the preimage only, the segment
/// list, and the HMAC TLV metadata up to but not including the value.
///
/// Deterministic: the same preimage and key always produce the same
/// digest, regardless of how far the packet has advanced.
pub fn compute_hmac(
    src: &Ipv6Addr,
    srh: &SegmentRoutingHeader,
    tlv: &HmacTlvHeader,
    key: &[u8; KEY_LENGTH],
) -> Result<[u8; HMAC_LENGTH]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::BadKey)?;

    mac.update(&src.octets());
    mac.update(&srh.preimage_bytes());
    mac.update(&tlv.meta_bytes());

    let mut digest = [0u8; HMAC_LENGTH];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Ok(digest)
}

/// Seals the 32-byte verification field in place under `(key, nonce)`,
/// AES-256-CTR with the nonce as the initial counter block. Nonce
/// uniqueness per key is the caller's responsibility; the ingress draws a
/// fresh one per packet.
pub fn encrypt_pvf(key: &[u8; KEY_LENGTH], nonce: &[u8; NONCE_LENGTH], pvf: &mut [u8; HMAC_LENGTH]) {
    let mut cipher = Aes256Ctr::new(key.into(), nonce.into());
    cipher.apply_keystream(pvf);
}

/// The exact inverse of [`encrypt_pvf`] under the same `(key, nonce)`.
pub fn decrypt_pvf(key: &[u8; KEY_LENGTH], nonce: &[u8; NONCE_LENGTH], pvf: &mut [u8; HMAC_LENGTH]) {
    let mut cipher = Aes256Ctr::new(key.into(), nonce.into());
    cipher.apply_keystream(pvf);
}

/// Draws a fresh 16-byte nonce from the system CSPRNG. Safe to call from
/// any worker concurrently. Callers drop the packet on failure.
pub fn generate_nonce() -> Result<[u8; NONCE_LENGTH]> {
    let mut nonce = [0u8; NONCE_LENGTH];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CryptoError::EntropyUnavailable)?;
    Ok(nonce)
}

/// The pre-provisioned symmetric keys: index 0 is shared between ingress
/// and egress, indices 1..=n are the per-transit key shares. Immutable
/// for the process lifetime, zeroised on drop.
pub struct KeySet {
    keys: Vec<[u8; KEY_LENGTH]>,
}

impl KeySet {
    pub fn new(keys: Vec<[u8; KEY_LENGTH]>) -> KeySet {
        debug_assert!(!keys.is_empty());
        KeySet { keys }
    }

    /// The ingress/egress pair key.
    #[inline]
    pub fn shared(&self) -> &[u8; KEY_LENGTH] {
        &self.keys[0]
    }

    /// The key share for position `index` on the path.
    #[inline]
    pub fn key(&self, index: usize) -> Option<&[u8; KEY_LENGTH]> {
        self.keys.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeySet({} keys)", self.keys.len())
    }
}

impl Drop for KeySet {
    fn drop(&mut self) {
        for key in self.keys.iter_mut() {
            for byte in key.iter_mut() {
                unsafe { ptr::write_volatile(byte, 0) };
            }
        }
        compiler_fence(Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::srh::POT_FRAME;
    use crate::packets::{Ethernet, HmacTlv, Ipv6, Packet, SegmentRouting};
    use crate::Mbuf;
    use proptest::prelude::*;

    fn wire_headers() -> (Ipv6Addr, SegmentRoutingHeader, HmacTlvHeader) {
        let packet = Mbuf::from_bytes(&POT_FRAME).unwrap();
        let srh = packet
            .parse::<Ethernet>()
            .unwrap()
            .parse::<Ipv6>()
            .unwrap()
            .parse::<SegmentRouting>()
            .unwrap();
        let src = srh.envelope().src();
        let srh_header = srh.wire_header();
        let tlv = srh.parse::<HmacTlv>().unwrap();
        (src, srh_header, tlv.wire_header())
    }

    #[test]
    fn hmac_is_deterministic() {
        let (src, srh, tlv) = wire_headers();
        let key = [0x42u8; KEY_LENGTH];

        let first = compute_hmac(&src, &srh, &tlv, &key).unwrap();
        let second = compute_hmac(&src, &srh, &tlv, &key).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hmac_ignores_segments_left() {
        let key = [0x42u8; KEY_LENGTH];
        let (src, stamped_srh, tlv) = wire_headers();

        // same frame, two hops further along
        let mut advanced = POT_FRAME.to_vec();
        advanced[57] = 0x02;
        let packet = Mbuf::from_bytes(&advanced).unwrap();
        let srh = packet
            .parse::<Ethernet>()
            .unwrap()
            .parse::<Ipv6>()
            .unwrap()
            .parse::<SegmentRouting>()
            .unwrap();
        let advanced_srh = srh.wire_header();

        let a = compute_hmac(&src, &stamped_srh, &tlv, &key).unwrap();
        let b = compute_hmac(&src, &advanced_srh, &tlv, &key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hmac_depends_on_key_and_source() {
        let (src, srh, tlv) = wire_headers();

        let a = compute_hmac(&src, &srh, &tlv, &[0x01; KEY_LENGTH]).unwrap();
        let b = compute_hmac(&src, &srh, &tlv, &[0x02; KEY_LENGTH]).unwrap();
        assert_ne!(a, b);

        let other: Ipv6Addr = "::1".parse().unwrap();
        let c = compute_hmac(&other, &srh, &tlv, &[0x01; KEY_LENGTH]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn pvf_seal_unseal_identity() {
        let key = [0x11u8; KEY_LENGTH];
        let nonce = [0x22u8; NONCE_LENGTH];
        let original = [0x33u8; HMAC_LENGTH];

        let mut pvf = original;
        encrypt_pvf(&key, &nonce, &mut pvf);
        assert_ne!(original, pvf);

        decrypt_pvf(&key, &nonce, &mut pvf);
        assert_eq!(original, pvf);
    }

    #[test]
    fn nonce_draws_differ() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn key_set_indexing() {
        let keys = KeySet::new(vec![[0x01; KEY_LENGTH], [0x02; KEY_LENGTH]]);

        assert_eq!(2, keys.len());
        assert_eq!(&[0x01; KEY_LENGTH], keys.shared());
        assert_eq!(Some(&[0x02; KEY_LENGTH]), keys.key(1));
        assert_eq!(None, keys.key(2));
    }

    proptest! {
        #[test]
        fn pvf_round_trips(key in any::<[u8; 32]>(), nonce in any::<[u8; 16]>(), pvf in any::<[u8; 32]>()) {
            let mut sealed = pvf;
            encrypt_pvf(&key, &nonce, &mut sealed);
            decrypt_pvf(&key, &nonce, &mut sealed);
            prop_assert_eq!(pvf, sealed);
        }
    }
}
