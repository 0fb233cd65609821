//! Access to the raw socket behind a client connection.
//!
//! The HTTP stack owns the accepted stream, so the listener keeps a
//! duplicate of every descriptor in a [`DescriptorCache`]. A subtest claims
//! its descriptor exactly once through [`SocketAccessor::take`] and samples
//! it through [`SocketStats`].

pub mod bbr;
pub mod cache;
pub mod listener;
pub mod tcpinfo;

use std::net::SocketAddr;

use socket2::Socket;

use crate::error::Error;
use crate::model::{BbrInfo, TcpInfo};

pub use cache::DescriptorCache;
pub use listener::MeasuredListener;

/// Endpoints of an accepted connection; doubles as the handle used to claim
/// its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionAddrs {
    pub client: SocketAddr,
    pub server: SocketAddr,
}

/// One-shot hand-off of the descriptor underlying a connection.
pub trait SocketAccessor: Send + Sync {
    /// Returns the descriptor for `conn` at most once. Any later call for the
    /// same connection, or a call after eviction, yields `None`.
    fn take(&self, conn: &ConnectionAddrs) -> Option<Socket>;
}

/// Best-effort socket instrumentation.
pub trait SocketStats: Send + Sync {
    fn enable_congestion_control(&self, sock: &Socket) -> Result<(), Error>;
    fn congestion_info(&self, sock: &Socket) -> Result<BbrInfo, Error>;
    fn tcp_info(&self, sock: &Socket) -> Result<TcpInfo, Error>;
}

/// Reads statistics straight from the kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelStats;

impl SocketStats for KernelStats {
    fn enable_congestion_control(&self, sock: &Socket) -> Result<(), Error> {
        bbr::enable(sock)
    }

    fn congestion_info(&self, sock: &Socket) -> Result<BbrInfo, Error> {
        bbr::max_bandwidth_and_min_rtt(sock)
    }

    fn tcp_info(&self, sock: &Socket) -> Result<TcpInfo, Error> {
        tcpinfo::get(sock)
    }
}
