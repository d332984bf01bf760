//! Static IPv6-to-MAC resolution, used in lieu of neighbour discovery.

use crate::net::MacAddr;
use crate::settings::ConfigError;
use crate::Result;
use std::net::Ipv6Addr;

/// Table capacity; the deployment seeds two entries at start-up.
pub const MAX_NEXT_HOPS: usize = 8;

#[derive(Clone, Copy, Debug)]
struct NextHop {
    ipv6: Ipv6Addr,
    mac: MacAddr,
}

/// Append-only during start-up, read-only on the hot path. Lookup is a
/// linear scan; first insertion wins on duplicates. Adequate at this
/// size; a larger table would go behind the same `lookup` contract.
#[derive(Debug, Default)]
pub struct NextHopTable {
    entries: Vec<NextHop>,
}

impl NextHopTable {
    pub fn new() -> NextHopTable {
        NextHopTable {
            entries: Vec::with_capacity(MAX_NEXT_HOPS),
        }
    }

    /// Parses and appends an entry. Fails if either textual form is
    /// invalid or the table is full.
    pub fn add(&mut self, ipv6: &str, mac: &str) -> Result<()> {
        if self.entries.len() >= MAX_NEXT_HOPS {
            return Err(ConfigError(format!(
                "next-hop table full ({} entries)",
                MAX_NEXT_HOPS
            ))
            .into());
        }

        let ipv6 = ipv6
            .parse::<Ipv6Addr>()
            .map_err(|_| ConfigError(format!("bad next-hop address '{}'", ipv6)))?;
        let mac = mac
            .parse::<MacAddr>()
            .map_err(|err| ConfigError(err.to_string()))?;

        self.entries.push(NextHop { ipv6, mac });
        Ok(())
    }

    /// Exact-match scan.
    #[inline]
    pub fn lookup(&self, ipv6: &Ipv6Addr) -> Option<MacAddr> {
        self.entries
            .iter()
            .find(|entry| entry.ipv6 == *ipv6)
            .map(|entry| entry.mac)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup() {
        let mut table = NextHopTable::new();
        table
            .add("2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3", "02:5f:68:c7:cc:cd")
            .unwrap();
        table
            .add("2a05:d014:dc7:12dc:9648:6bf3:e182:c7b4", "02:f5:27:51:bc:1d")
            .unwrap();

        let sid: Ipv6Addr = "2a05:d014:dc7:1209:8169:d7d9:3bcb:d2b3".parse().unwrap();
        assert_eq!(
            MacAddr::new(0x02, 0x5f, 0x68, 0xc7, 0xcc, 0xcd),
            table.lookup(&sid).unwrap()
        );

        let unknown: Ipv6Addr = "::1".parse().unwrap();
        assert_eq!(None, table.lookup(&unknown));
    }

    #[test]
    fn first_insertion_wins() {
        let mut table = NextHopTable::new();
        table.add("::2", "02:00:00:00:00:01").unwrap();
        table.add("::2", "02:00:00:00:00:02").unwrap();

        let addr: Ipv6Addr = "::2".parse().unwrap();
        assert_eq!(
            MacAddr::new(0x02, 0, 0, 0, 0, 0x01),
            table.lookup(&addr).unwrap()
        );
    }

    #[test]
    fn ninth_entry_rejected() {
        let mut table = NextHopTable::new();
        for i in 0..MAX_NEXT_HOPS {
            table
                .add(&format!("::{:x}", i + 1), "02:00:00:00:00:01")
                .unwrap();
        }
        assert!(table.add("::ff", "02:00:00:00:00:01").is_err());
        assert_eq!(MAX_NEXT_HOPS, table.len());
    }

    #[test]
    fn bad_textual_forms_rejected() {
        let mut table = NextHopTable::new();
        assert!(table.add("not-an-address", "02:00:00:00:00:01").is_err());
        assert!(table.add("::1", "not-a-mac").is_err());
        assert!(table.is_empty());
    }
}
