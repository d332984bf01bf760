//! An IPv6 / SRv6 proof-of-transit dataplane node.
//!
//! One binary, three roles: the ingress stamps a segment routing header plus
//! HMAC and transit-proof TLVs onto packets entering the domain, transits
//! update the proof, and the egress verifies it, strips the extensions and
//! releases the packet. NIC driver, mempool creation and lcore launch live
//! behind the `port` and `mempool` contracts.

mod mbuf;

pub mod crypto;
pub mod mempool;
pub mod net;
pub mod nexthop;
pub mod node;
pub mod packets;
pub mod port;
pub mod runtime;
pub mod settings;
#[cfg(any(test, feature = "testils"))]
pub mod testils;

pub use crate::mbuf::{BufferError, Mbuf, SizeOf};
pub use crate::mempool::Mempool;
pub use crate::runtime::{Context, Runtime};

use failure::Error;
use std::result;

/// A type alias of `std:result::Result` for convenience.
pub type Result<T> = result::Result<T, Error>;
