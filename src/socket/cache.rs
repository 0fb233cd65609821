use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::{SockRef, Socket};
use tracing::debug;

use super::{ConnectionAddrs, SocketAccessor};

/// Duplicated descriptors of accepted connections, keyed by client address.
///
/// `take` and eviction both remove under the same lock, so whichever runs
/// first wins and the other observes an absent entry.
pub struct DescriptorCache {
    entries: Mutex<HashMap<SocketAddr, Entry>>,
    stale_after: Duration,
}

struct Entry {
    socket: Socket,
    registered: Instant,
}

impl DescriptorCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    /// Duplicate the descriptor of `stream` and remember it under `client`.
    /// A previous entry for the same address is replaced and closed.
    pub fn register<S: AsFd>(&self, client: SocketAddr, stream: &S) -> io::Result<()> {
        let socket = SockRef::from(stream).try_clone()?;
        let now = Instant::now();

        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, now, self.stale_after);
        entries.insert(
            client,
            Entry {
                socket,
                registered: now,
            },
        );
        Ok(())
    }

    /// Drop entries nobody claimed in time. Returns how many were evicted.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::prune_locked(&mut entries, Instant::now(), self.stale_after)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn prune_locked(
        entries: &mut HashMap<SocketAddr, Entry>,
        now: Instant,
        stale_after: Duration,
    ) -> usize {
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.registered) < stale_after);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "descriptor cache: pruned stale entries");
        }
        evicted
    }
}

impl SocketAccessor for DescriptorCache {
    fn take(&self, conn: &ConnectionAddrs) -> Option<Socket> {
        self.entries.lock().remove(&conn.client).map(|e| e.socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn addrs(server: &TcpStream) -> ConnectionAddrs {
        ConnectionAddrs {
            client: server.peer_addr().unwrap(),
            server: server.local_addr().unwrap(),
        }
    }

    #[test]
    fn take_is_one_shot() {
        let cache = DescriptorCache::new(Duration::from_secs(60));
        let (_client, server) = connected_pair();
        let conn = addrs(&server);

        cache.register(conn.client, &server).unwrap();
        assert_eq!(cache.len(), 1);

        let sock = cache.take(&conn).expect("first take");
        assert_eq!(sock.peer_addr().unwrap().as_socket(), Some(conn.client));
        assert!(cache.take(&conn).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn unknown_connection_yields_nothing() {
        let cache = DescriptorCache::new(Duration::from_secs(60));
        let (_client, server) = connected_pair();
        assert!(cache.take(&addrs(&server)).is_none());
    }

    #[test]
    fn stale_entries_are_evicted_before_take() {
        let cache = DescriptorCache::new(Duration::ZERO);
        let (_client, server) = connected_pair();
        let conn = addrs(&server);

        cache.register(conn.client, &server).unwrap();
        assert_eq!(cache.prune(), 1);
        assert!(cache.take(&conn).is_none());
    }

    #[test]
    fn taken_descriptor_outlives_original_stream() {
        let cache = DescriptorCache::new(Duration::from_secs(60));
        let (_client, server) = connected_pair();
        let conn = addrs(&server);

        cache.register(conn.client, &server).unwrap();
        drop(server);

        let sock = cache.take(&conn).unwrap();
        assert_eq!(sock.local_addr().unwrap().as_socket(), Some(conn.server));
    }
}
