//! Role-specific packet processors.
//!
//! A processor takes exclusive ownership of the buffer and either returns
//! it ready for transmit (L2 already rewritten for the next hop) or
//! returns `None`, in which case dropping the buffer releases it back to
//! the pool. No error escapes a worker; every branch ends in one of the
//! two outcomes.

pub mod egress;
pub mod ingress;
pub mod transit;

use crate::net::MacAddr;
use crate::packets::{ether_types, Ethernet, Ipv6, Packet};
use crate::runtime::Context;
use crate::settings::Role;
use crate::Mbuf;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Why a packet left the pipeline early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    Multicast,
    UnexpectedSegment,
    HmacMismatch,
    NoRoute,
    Crypto,
    ReservedMode,
}

/// Per-worker-visible drop and throughput counters. Relaxed atomics;
/// workers only ever increment, readers aggregate at shutdown or in
/// tests.
#[derive(Debug, Default)]
pub struct Counters {
    rx: AtomicU64,
    tx: AtomicU64,
    malformed: AtomicU64,
    multicast: AtomicU64,
    unexpected_segment: AtomicU64,
    hmac_mismatch: AtomicU64,
    no_route: AtomicU64,
    crypto: AtomicU64,
    reserved_mode: AtomicU64,
}

impl Counters {
    /// Records a drop with its disposition-mandated log level.
    pub fn record(&self, reason: DropReason) {
        match reason {
            DropReason::Malformed => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("malformed packet, dropping");
            }
            DropReason::Multicast => {
                self.multicast.fetch_add(1, Ordering::Relaxed);
                debug!("multicast/broadcast destination, dropping");
            }
            DropReason::UnexpectedSegment => {
                self.unexpected_segment.fetch_add(1, Ordering::Relaxed);
                info!("segment state does not include this node, dropping");
            }
            DropReason::HmacMismatch => {
                self.hmac_mismatch.fetch_add(1, Ordering::Relaxed);
                warn!("transit proof verification failed, dropping");
            }
            DropReason::NoRoute => {
                self.no_route.fetch_add(1, Ordering::Relaxed);
                warn!("no next hop for destination, dropping");
            }
            DropReason::Crypto => {
                self.crypto.fetch_add(1, Ordering::Relaxed);
                error!("crypto primitive failure, dropping");
            }
            DropReason::ReservedMode => {
                self.reserved_mode.fetch_add(1, Ordering::Relaxed);
                debug!("strip-only mode is reserved, dropping");
            }
        }
    }

    pub fn count(&self, reason: DropReason) -> u64 {
        let counter = match reason {
            DropReason::Malformed => &self.malformed,
            DropReason::Multicast => &self.multicast,
            DropReason::UnexpectedSegment => &self.unexpected_segment,
            DropReason::HmacMismatch => &self.hmac_mismatch,
            DropReason::NoRoute => &self.no_route,
            DropReason::Crypto => &self.crypto,
            DropReason::ReservedMode => &self.reserved_mode,
        };
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn add_rx(&self, count: u64) {
        self.rx.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_tx(&self, count: u64) {
        self.tx.fetch_add(count, Ordering::Relaxed);
    }

    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }
}

/// Dispatches a packet to the processor for the node's role.
pub fn process(ctx: &Context, mbuf: Mbuf) -> Option<Mbuf> {
    match ctx.role {
        Role::Ingress => ingress::process(ctx, mbuf),
        Role::Transit => transit::process(ctx, mbuf),
        Role::Egress => egress::process(ctx, mbuf),
    }
}

/// The L2 gate every role applies before touching anything past the
/// Ethernet header: IPv6 unicast only.
pub(crate) fn check_l2(ctx: &Context, mbuf: Mbuf) -> Option<Ethernet> {
    let ethernet = match mbuf.parse::<Ethernet>() {
        Ok(ethernet) => ethernet,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };

    if ethernet.ether_type() != ether_types::IPV6 {
        ctx.counters.record(DropReason::Malformed);
        return None;
    }
    if ethernet.dst().is_multicast() {
        ctx.counters.record(DropReason::Multicast);
        return None;
    }

    Some(ethernet)
}

/// Points the frame at the resolved next hop: the previous destination
/// becomes the source and the next hop the destination. Broadcast frames
/// are left untouched.
pub(crate) fn direct_to(ethernet: &mut Ethernet, next_hop: MacAddr) {
    if !ethernet.dst().is_broadcast() {
        let previous = ethernet.dst();
        ethernet.set_src(previous);
        ethernet.set_dst(next_hop);
    }
}

/// Resolves `next_sid` against the next-hop table and readies the frame
/// for transmit.
pub(crate) fn forward_to(ctx: &Context, mbuf: Mbuf, next_sid: &Ipv6Addr) -> Option<Mbuf> {
    let mac = match ctx.next_hops.lookup(next_sid) {
        Some(mac) => mac,
        None => {
            ctx.counters.record(DropReason::NoRoute);
            return None;
        }
    };

    let mut ethernet = match mbuf.parse::<Ethernet>() {
        Ok(ethernet) => ethernet,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };
    direct_to(&mut ethernet, mac);
    Some(ethernet.reset())
}

/// Bypass forwarding: resolve against the outer destination and transmit
/// the frame unmodified above L2.
pub(crate) fn forward_plain(ctx: &Context, ethernet: Ethernet) -> Option<Mbuf> {
    let ipv6 = match ethernet.parse::<Ipv6>() {
        Ok(ipv6) => ipv6,
        Err(_) => {
            ctx.counters.record(DropReason::Malformed);
            return None;
        }
    };
    let dst = ipv6.dst();
    forward_to(ctx, ipv6.reset(), &dst)
}
