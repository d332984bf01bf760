//! Worker scheduling and the immutable runtime context.
//!
//! One worker per queue pair, strictly sequential, no locks and no
//! allocation on the hot path. All configuration is resolved once into a
//! `Context` at start-up and shared by reference; nothing mutates after
//! the pipeline starts.

use crate::crypto::KeySet;
use crate::mempool::{self, Mempool, DEFAULT_BUF_SIZE, NUM_MBUFS};
use crate::net::MacAddr;
use crate::nexthop::NextHopTable;
use crate::node::{self, Counters};
use crate::port::{PacketRx, PacketTx, BURST_SIZE};
use crate::settings::{self, AppSettings, Bypass, ConfigError, Role};
use crate::Result;
use failure::format_err;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything the processors read per packet. Built once by
/// [`Runtime::build`], immutable thereafter.
pub struct Context {
    pub role: Role,
    pub bypass: Bypass,
    pub num_transit_nodes: usize,
    pub ingress_addr: Ipv6Addr,
    /// segment 0 = first transit, segment 1 = egress.
    pub sid_list: [Ipv6Addr; 2],
    pub server_mac: MacAddr,
    pub keys: KeySet,
    pub next_hops: NextHopTable,
    pub counters: Counters,
}

impl Context {
    /// Resolves and validates the textual settings. Any failure here is
    /// fatal; the process exits non-zero without starting the pipeline.
    pub fn build(settings: &AppSettings) -> Result<Context> {
        let bypass = Bypass::from_bit(settings.bypass)?;

        let ingress_addr = settings
            .ingress_addr
            .parse::<Ipv6Addr>()
            .map_err(|_| ConfigError(format!("bad ingress address '{}'", settings.ingress_addr)))?;

        if settings.sid_list.len() != 2 {
            return Err(ConfigError(format!(
                "sid list must name the transit and the egress, got {} entries",
                settings.sid_list.len()
            ))
            .into());
        }
        let mut sid_list = [Ipv6Addr::UNSPECIFIED; 2];
        for (slot, sid) in sid_list.iter_mut().zip(settings.sid_list.iter()) {
            *slot = sid
                .parse::<Ipv6Addr>()
                .map_err(|_| ConfigError(format!("bad segment '{}'", sid)))?;
        }

        let server_mac = settings
            .server_mac
            .parse::<MacAddr>()
            .map_err(|err| ConfigError(err.to_string()))?;

        if settings.keys.len() != settings.num_transit_nodes + 1 {
            return Err(ConfigError(format!(
                "expected {} keys for {} transit nodes, got {}",
                settings.num_transit_nodes + 1,
                settings.num_transit_nodes,
                settings.keys.len()
            ))
            .into());
        }
        let keys = settings
            .keys
            .iter()
            .map(|hex| settings::parse_key(hex))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut next_hops = NextHopTable::new();
        for hop in &settings.next_hops {
            next_hops.add(&hop.ipv6, &hop.mac)?;
        }

        Ok(Context {
            role: settings.role,
            bypass,
            num_transit_nodes: settings.num_transit_nodes,
            ingress_addr,
            sid_list,
            server_mac,
            keys: KeySet::new(keys),
            next_hops,
            counters: Counters::default(),
        })
    }
}

/// One poll of the RX queue: burst receive, dispatch, burst transmit.
/// Returns the number of packets received.
pub(crate) fn poll_once<R: PacketRx, T: PacketTx>(
    ctx: &Context,
    rx: &mut R,
    tx: &mut T,
    epoch: Instant,
) -> usize {
    let packets = rx.receive(BURST_SIZE);
    if packets.is_empty() {
        return 0;
    }

    let received = packets.len();
    ctx.counters.add_rx(received as u64);

    let mut outbound = Vec::with_capacity(received);
    for mut mbuf in packets {
        mbuf.set_tsc(epoch.elapsed().as_nanos() as u64);
        if let Some(out) = node::process(ctx, mbuf) {
            outbound.push(out);
        }
    }

    if !outbound.is_empty() {
        let accepted = tx.transmit(outbound);
        ctx.counters.add_tx(accepted as u64);
    }

    received
}

fn worker<R, T>(ctx: Arc<Context>, pool: Mempool, mut rx: R, mut tx: T, shutdown: Arc<AtomicBool>)
where
    R: PacketRx,
    T: PacketTx,
{
    mempool::set_thread_pool(&pool);
    let epoch = Instant::now();

    // in-flight packets of the current burst always finish processing
    while !shutdown.load(Ordering::Relaxed) {
        if poll_once(&ctx, &mut rx, &mut tx, epoch) == 0 {
            thread::yield_now();
        }
    }

    debug!("worker exiting");
}

static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: libc::c_int) {
    TERMINATE.store(true, Ordering::Relaxed);
}

pub struct Runtime {
    context: Arc<Context>,
    pool: Mempool,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Runtime {
    pub fn build(settings: AppSettings) -> Result<Runtime> {
        let context = Arc::new(Context::build(&settings)?);

        info!(
            role = %context.role,
            bypass = ?context.bypass,
            transit_nodes = context.num_transit_nodes,
            next_hops = context.next_hops.len(),
            "node initialised"
        );

        Ok(Runtime {
            context,
            pool: Mempool::new("pktmbuf", NUM_MBUFS, DEFAULT_BUF_SIZE),
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        })
    }

    pub fn context(&self) -> Arc<Context> {
        Arc::clone(&self.context)
    }

    pub fn pool(&self) -> &Mempool {
        &self.pool
    }

    /// Spawns a worker pinned to the given queue pair.
    pub fn add_worker<R, T>(&mut self, rx: R, tx: T) -> Result<()>
    where
        R: PacketRx + Send + 'static,
        T: PacketTx + Send + 'static,
    {
        let ctx = Arc::clone(&self.context);
        let pool = self.pool.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let name = format!("pot-worker-{}", self.workers.len());

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker(ctx, pool, rx, tx, shutdown))?;
        self.workers.push(handle);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Joins all workers and reports the aggregated counters.
    pub fn wait(mut self) -> Result<()> {
        for handle in self.workers.drain(..) {
            handle
                .join()
                .map_err(|_| format_err!("worker thread panicked"))?;
        }

        let c = &self.context.counters;
        info!(
            rx = c.rx(),
            tx = c.tx(),
            malformed = c.count(node::DropReason::Malformed),
            multicast = c.count(node::DropReason::Multicast),
            unexpected_segment = c.count(node::DropReason::UnexpectedSegment),
            hmac_mismatch = c.count(node::DropReason::HmacMismatch),
            no_route = c.count(node::DropReason::NoRoute),
            crypto = c.count(node::DropReason::Crypto),
            "shutdown counters"
        );
        Ok(())
    }

    /// Runs until SIGINT/SIGTERM, then drains the workers.
    pub fn execute(self) -> Result<()> {
        unsafe {
            libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
            libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
        }

        info!("forwarding; send SIGINT to stop");
        while !TERMINATE.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(50));
        }

        self.shutdown();
        self.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DropReason;
    use crate::packets::{ether_types, Ethernet, Packet};
    use crate::testils;
    use crate::Mbuf;

    #[test]
    fn context_rejects_bad_settings() {
        let mut settings = testils::default_settings(Role::Ingress);
        settings.bypass = 3;
        assert!(Context::build(&settings).is_err());

        let mut settings = testils::default_settings(Role::Ingress);
        settings.keys.pop();
        assert!(Context::build(&settings).is_err());

        let mut settings = testils::default_settings(Role::Ingress);
        settings.keys[0] = "zz".repeat(32);
        assert!(Context::build(&settings).is_err());

        let mut settings = testils::default_settings(Role::Ingress);
        settings.sid_list.pop();
        assert!(Context::build(&settings).is_err());

        let mut settings = testils::default_settings(Role::Ingress);
        settings.next_hops[0].mac = "junk".to_owned();
        assert!(Context::build(&settings).is_err());
    }

    #[test]
    fn burst_preserves_order_and_conserves_buffers() {
        let pool = Mempool::new("conserve", 32, DEFAULT_BUF_SIZE);
        mempool::set_thread_pool(&pool);

        let ctx = testils::test_context(Role::Ingress);

        let mut rx: Vec<Mbuf> = Vec::new();
        for marker in &[0xa1u8, 0xa2] {
            rx.push(testils::v6_udp_frame(
                testils::ingress_addr(),
                testils::egress_sid(),
                &[*marker],
            ));
        }
        // a frame that gets dropped mid-burst
        let mut bad = testils::v6_udp_frame(testils::ingress_addr(), testils::egress_sid(), &[0]);
        {
            let mut ethernet = bad.parse::<Ethernet>().unwrap();
            ethernet.set_ether_type(ether_types::IPV4);
            bad = ethernet.reset();
        }
        rx.insert(1, bad);

        let mut tx: Vec<Mbuf> = Vec::new();
        let received = poll_once(&ctx, &mut rx, &mut tx, Instant::now());

        assert_eq!(3, received);
        assert_eq!(2, tx.len());
        assert_eq!(3, ctx.counters.rx());
        assert_eq!(2, ctx.counters.tx());
        assert_eq!(1, ctx.counters.count(DropReason::Malformed));

        // relative order of the survivors is the arrival order
        let first = testils::frame_bytes(&tx[0]);
        let second = testils::frame_bytes(&tx[1]);
        assert_eq!(0xa1, *first.last().unwrap());
        assert_eq!(0xa2, *second.last().unwrap());

        // alloc - release - tx_accepted balances at quiescence
        drop(rx);
        drop(tx);
        assert_eq!(0, pool.in_use());
    }

    #[test]
    fn workers_drain_on_shutdown() {
        let mut runtime = Runtime::build(testils::default_settings(Role::Ingress)).unwrap();
        let (_ingest, rx) = crate::port::RingPort::with_capacity(4);
        let (tx, _drain) = crate::port::RingPort::with_capacity(4);
        runtime.add_worker(rx, tx).unwrap();

        runtime.shutdown();
        assert!(runtime.wait().is_ok());
    }
}
