//! Receive and transmit contracts.
//!
//! The NIC driver lives behind these two traits. `Vec<Mbuf>` implements
//! both so it can be used as the batch source and sink in tests; the
//! `RingPort` pair is the in-memory reference implementation the binary
//! wires up when no hardware is attached.

use crate::Mbuf;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Packets popped off the RX queue per poll.
pub const BURST_SIZE: usize = 256;

pub const RX_RING_SIZE: usize = 2048;
pub const TX_RING_SIZE: usize = 2048;

pub trait PacketRx {
    /// Non-blocking burst receive; returns 0..=max packets immediately.
    fn receive(&mut self, max: usize) -> Vec<Mbuf>;
}

pub trait PacketTx {
    /// Burst transmit. Returns the number of packets the driver accepted;
    /// ownership of accepted packets transfers to the driver, the rest
    /// are released.
    fn transmit(&mut self, packets: Vec<Mbuf>) -> usize;
}

impl PacketRx for Vec<Mbuf> {
    fn receive(&mut self, max: usize) -> Vec<Mbuf> {
        let count = self.len().min(max);
        self.drain(..count).collect()
    }
}

impl PacketTx for Vec<Mbuf> {
    fn transmit(&mut self, packets: Vec<Mbuf>) -> usize {
        let count = packets.len();
        self.extend(packets);
        count
    }
}

struct Ring {
    queue: Mutex<VecDeque<Mbuf>>,
    capacity: usize,
}

/// An in-memory queue pair standing in for a port queue.
pub struct RingPort;

impl RingPort {
    /// Creates a bounded ring and returns its producer and consumer
    /// halves.
    pub fn with_capacity(capacity: usize) -> (RingTx, RingRx) {
        let ring = Arc::new(Ring {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        });
        (
            RingTx {
                ring: Arc::clone(&ring),
            },
            RingRx { ring },
        )
    }
}

pub struct RingRx {
    ring: Arc<Ring>,
}

impl PacketRx for RingRx {
    fn receive(&mut self, max: usize) -> Vec<Mbuf> {
        let mut queue = self.ring.queue.lock().unwrap();
        let count = queue.len().min(max);
        queue.drain(..count).collect()
    }
}

pub struct RingTx {
    ring: Arc<Ring>,
}

impl PacketTx for RingTx {
    fn transmit(&mut self, packets: Vec<Mbuf>) -> usize {
        let mut queue = self.ring.queue.lock().unwrap();
        let room = self.ring.capacity - queue.len();
        let accepted = packets.len().min(room);

        let mut packets = packets;
        for mbuf in packets.drain(..accepted) {
            queue.push_back(mbuf);
        }
        // the remainder is dropped here, releasing the buffers
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::{self, Mempool};

    fn small_mbuf(marker: u8) -> Mbuf {
        Mbuf::from_bytes(&[marker; 4]).unwrap()
    }

    #[test]
    fn vec_burst_respects_max() {
        let mut source: Vec<Mbuf> = (0u8..5).map(small_mbuf).collect();

        let burst = source.receive(3);
        assert_eq!(3, burst.len());
        assert_eq!(2, source.len());
    }

    #[test]
    fn ring_hands_packets_through_in_order() {
        let (mut tx, mut rx) = RingPort::with_capacity(8);

        let accepted = tx.transmit(vec![small_mbuf(1), small_mbuf(2)]);
        assert_eq!(2, accepted);

        let burst = rx.receive(BURST_SIZE);
        assert_eq!(2, burst.len());
        let first = burst[0].read_data::<u8>(0).unwrap();
        assert_eq!(1, unsafe { *first.as_ref() });
    }

    #[test]
    fn full_ring_releases_the_overflow() {
        let pool = Mempool::new("overflow", 8, 256);
        mempool::set_thread_pool(&pool);

        let (mut tx, _rx) = RingPort::with_capacity(1);
        let accepted = tx.transmit(vec![small_mbuf(1), small_mbuf(2), small_mbuf(3)]);

        assert_eq!(1, accepted);
        // two rejected buffers went back to the pool immediately
        assert_eq!(1, pool.in_use());
    }
}
