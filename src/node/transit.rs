//! Transit: peels and re-applies this node's key layer on the
//! verification field, then advances the packet to the next segment.

use crate::crypto;
use crate::node::{self, DropReason};
use crate::packets::{HmacTlv, Ipv6, Packet, PotTlv, SegmentRouting};
use crate::runtime::Context;
use crate::settings::Bypass;
use crate::Mbuf;

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

    let segments_left = srh.segments_left();
    if segments_left == 0 {
        // this node should not be on the path
        ctx.counters.record(DropReason::UnexpectedSegment);
        return None;
    }

    // this node's key share sits at num_transit_nodes - segments_left + 1
    let key = match (ctx.num_transit_nodes + 1)
        .checked_sub(segments_left as usize)
        .filter(|index| (1..=ctx.num_transit_nodes).contains(index))
        .and_then(|index| ctx.keys.key(index))
    {
        Some(key) => key,
        None => {
            ctx.counters.record(DropReason::UnexpectedSegment);
            return None;
        }
    };

    let mut pot = match srh.parse::<HmacTlv>().and_then(|tlv| tlv.parse::<PotTlv>()) {
        Ok(pot) => pot,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };

    // peel this hop's layer off the chained seal, then re-seal so the
    // egress sees the composition it expects
    let nonce = pot.nonce();
    let mut pvf = pot.encrypted_hmac();
    crypto::decrypt_pvf(key, &nonce, &mut pvf);
    crypto::encrypt_pvf(key, &nonce, &mut pvf);
    pot.set_encrypted_hmac(&pvf);

    let next_sid = {
        let srh = pot.envelope_mut().envelope_mut();
        let next = srh.next_sid_index();
        if next > srh.last_entry() as usize {
            ctx.counters.record(DropReason::UnexpectedSegment);
            return None;
        }
        let dst = srh.segment(next);
        srh.set_segments_left(segments_left - 1);
        srh.envelope_mut().set_dst(dst);
        dst
    };

    node::forward_to(ctx, pot.reset(), &next_sid)
}
