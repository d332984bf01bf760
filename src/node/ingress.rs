//! Ingress: stamps the segment routing header and the proof TLVs onto
//! IPv6 traffic entering the domain, seals the verification field under
//! the egress pair key and forwards to the first segment.

use crate::crypto;
use crate::node::{self, DropReason};
use crate::packets::{self, Ipv6, Packet};
use crate::runtime::Context;
use crate::settings::Bypass;
use crate::Mbuf;
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

    let mut pot = match packets::add_extensions(ipv6) {
        Ok(pot) => pot,
        Err(err) => {
            debug!(%err, "failed to attach extensions");
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };

    {
        let srh = pot.envelope_mut().envelope_mut();
        srh.set_segment(0, ctx.sid_list[0]);
        srh.set_segment(1, ctx.sid_list[1]);
        srh.set_segments_left(2);
    }

    // seal: HMAC over the path-defining fields, then encrypt it into the
    // verification field under a fresh nonce
    let seal_key = ctx.keys.shared();
    let (srh_header, tlv_header) = {
        let hmac_tlv = pot.envelope();
        (hmac_tlv.envelope().wire_header(), hmac_tlv.wire_header())
    };
    let digest = match crypto::compute_hmac(&ctx.ingress_addr, &srh_header, &tlv_header, seal_key) {
        Ok(digest) => digest,
        Err(err) => {
            debug!(%err, "hmac computation failed");
            ctx.counters.record(DropReason::Crypto);
            return None;
        }
    };
    pot.envelope_mut().set_hmac_value(&digest);

    let nonce = match crypto::generate_nonce() {
        Ok(nonce) => nonce,
        Err(err) => {
            debug!(%err, "nonce generation failed");
            ctx.counters.record(DropReason::Crypto);
            return None;
        }
    };
    let mut pvf = digest;
    crypto::encrypt_pvf(seal_key, &nonce, &mut pvf);
    pot.set_nonce(&nonce);
    pot.set_encrypted_hmac(&pvf);

    // advance to the first segment
    let next_sid = {
        let srh = pot.envelope_mut().envelope_mut();
        let next = srh.next_sid_index();
        let dst = srh.segment(next);
        let segments_left = srh.segments_left();
        srh.set_segments_left(segments_left - 1);
        srh.envelope_mut().set_dst(dst);
        dst
    };

    node::forward_to(ctx, pot.reset(), &next_sid)
}
