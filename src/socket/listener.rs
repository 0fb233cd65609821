use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

use super::{ConnectionAddrs, DescriptorCache};

/// TCP listener that registers every accepted socket with a
/// [`DescriptorCache`] before handing it to the HTTP stack.
pub struct MeasuredListener {
    inner: TcpListener,
    cache: Arc<DescriptorCache>,
}

impl MeasuredListener {
    pub fn new(inner: TcpListener, cache: Arc<DescriptorCache>) -> Self {
        Self { inner, cache }
    }
}

impl Listener for MeasuredListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        let (io, addr) = Listener::accept(&mut self.inner).await;
        // Without a cached descriptor the subtest still runs, it just
        // produces no measurements.
        if let Err(err) = self.cache.register(addr, &io) {
            warn!(client = %addr, error = %err, "cannot register socket descriptor");
        }
        (io, addr)
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

impl Connected<IncomingStream<'_, MeasuredListener>> for ConnectionAddrs {
    fn connect_info(stream: IncomingStream<'_, MeasuredListener>) -> Self {
        let client = *stream.remote_addr();
        let server = stream
            .io()
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        Self { client, server }
    }
}
