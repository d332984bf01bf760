//! Egress: unseals the verification field, recomputes the transit HMAC
//! from the on-wire fields, compares in constant time, strips the
//! extensions and delivers the inner packet to the local server.

use crate::crypto;
use crate::node::{self, DropReason};
use crate::packets::{self, protocols, HmacTlv, Ipv6, Packet, PotTlv, SegmentRouting};
use crate::runtime::Context;
use crate::settings::Bypass;
use crate::Mbuf;
use subtle::ConstantTimeEq;
use tracing::debug;

pub fn process(ctx: &Context, mbuf: Mbuf) -> Option<Mbuf> {
    let ethernet = node::check_l2(ctx, mbuf)?;

    match ctx.bypass {
        Bypass::Off => {}
        Bypass::All => return node::forward_plain(ctx, ethernet),
        Bypass::StripOnly => {
            ctx.counters.record(DropReason::ReservedMode);
            return None;
        }
    }

    let ipv6 = match ethernet.parse::<Ipv6>() {
        Ok(ipv6) => ipv6,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };
    let srh = match ipv6.parse::<SegmentRouting>() {
        Ok(srh) => srh,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };

    if srh.next_header() != protocols::POT_TLVS {
        ctx.counters.record(DropReason::Malformed);
        return None;
    }

    let pot = match srh.parse::<HmacTlv>().and_then(|tlv| tlv.parse::<PotTlv>()) {
        Ok(pot) => pot,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };

    // unseal the verification field under the pair key
    let pair_key = ctx.keys.shared();
    let mut candidate = pot.encrypted_hmac();
    crypto::decrypt_pvf(pair_key, &pot.nonce(), &mut candidate);

    // recompute from the on-wire fields, source address included
    let src = pot.envelope().envelope().envelope().src();
    let (srh_header, tlv_header) = {
        let hmac_tlv = pot.envelope();
        (hmac_tlv.envelope().wire_header(), hmac_tlv.wire_header())
    };
    let expected = match crypto::compute_hmac(&src, &srh_header, &tlv_header, pair_key) {
        Ok(expected) => expected,
        Err(err) => {
            debug!(%err, "hmac computation failed");
            ctx.counters.record(DropReason::Crypto);
            return None;
        }
    };

    if !bool::from(candidate.ct_eq(&expected)) {
        // suspect tampering; nothing is ever reported to the sender
        ctx.counters.record(DropReason::HmacMismatch);
        return None;
    }

    let ipv6 = match packets::remove_extensions(pot) {
        Ok(ipv6) => ipv6,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };

    // local delivery: the server MAC stands in for a delivery table
    let mut ethernet = ipv6.deparse();
    node::direct_to(&mut ethernet, ctx.server_mac);
    Some(ethernet.reset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node;
    use crate::packets::Ethernet;
    use crate::settings::Role;
    use crate::testils;

    fn sealed_frame() -> Mbuf {
        let ingress = testils::test_context(Role::Ingress);
        let frame = testils::v6_udp_frame(testils::ingress_addr(), testils::egress_sid(), b"data");
        node::process(&ingress, frame).unwrap()
    }

    #[test]
    fn verifies_and_strips() {
        let ctx = testils::test_context(Role::Egress);

        let out = process(&ctx, sealed_frame()).expect("delivers");
        let ipv6 = out.parse::<Ethernet>().unwrap().parse::<Ipv6>().unwrap();
        assert_eq!(protocols::UDP, ipv6.next_header());
        assert_eq!(4, ipv6.payload_length());
    }

    #[test]
    fn tampered_nonce_fails_verification() {
        let ctx = testils::test_context(Role::Egress);

        let sealed = sealed_frame();
        let mut pot = testils::parse_pot(sealed);
        let mut nonce = pot.nonce();
        nonce[7] ^= 0x80;
        pot.set_nonce(&nonce);

        assert!(process(&ctx, pot.reset()).is_none());
        assert_eq!(1, ctx.counters.count(DropReason::HmacMismatch));
    }

    #[test]
    fn rewritten_segment_fails_verification() {
        let ctx = testils::test_context(Role::Egress);

        let sealed = sealed_frame();
        let mut srh = testils::parse_srh(sealed);
        srh.set_segment(0, "::dead:beef".parse().unwrap());

        assert!(process(&ctx, srh.reset()).is_none());
        assert_eq!(1, ctx.counters.count(DropReason::HmacMismatch));
    }

    #[test]
    fn wrong_srh_next_header_is_rejected() {
        let ctx = testils::test_context(Role::Egress);

        let sealed = sealed_frame();
        let mut srh = testils::parse_srh(sealed);
        srh.set_next_header(protocols::TCP);

        assert!(process(&ctx, srh.reset()).is_none());
        assert_eq!(1, ctx.counters.count(DropReason::Malformed));
    }

    #[test]
    fn delivery_is_addressed_to_the_server() {
        let ctx = testils::test_context(Role::Egress);

        let out = process(&ctx, sealed_frame()).unwrap();
        let ethernet = out.parse::<Ethernet>().unwrap();
        assert_eq!(testils::server_mac(), ethernet.dst());
    }
}
