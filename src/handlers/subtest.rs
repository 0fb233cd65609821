use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::Response,
    Extension,
};
use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::metrics::sender;
use crate::middleware::admission::Permit;
use crate::model::{ArchivalData, Measurement};
use crate::policy::{SubtestKind, MAX_MESSAGE_SIZE, MAX_RUNTIME, SEC_WEBSOCKET_PROTOCOL};
use crate::socket::ConnectionAddrs;
use crate::ws::{bulk, receiver, receiver::Received};
use crate::AppState;

use super::{require_protocol, AppError};

// ─── GET /ndt/v7/download ────────────────────────────────────────

pub async fn download(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addrs): ConnectInfo<ConnectionAddrs>,
    Extension(permit): Extension<Arc<Permit>>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    upgrade(SubtestKind::Download, ws, &headers, addrs, permit, state)
}

// ─── GET /ndt/v7/upload ──────────────────────────────────────────

pub async fn upload(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addrs): ConnectInfo<ConnectionAddrs>,
    Extension(permit): Extension<Arc<Permit>>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    upgrade(SubtestKind::Upload, ws, &headers, addrs, permit, state)
}

fn upgrade(
    kind: SubtestKind,
    ws: WebSocketUpgrade,
    headers: &HeaderMap,
    addrs: ConnectionAddrs,
    permit: Arc<Permit>,
    state: Arc<AppState>,
) -> Result<Response, AppError> {
    require_protocol(headers)?;
    Ok(ws
        .protocols([SEC_WEBSOCKET_PROTOCOL])
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            // The admission slot lives as long as the subtest.
            let _permit = permit;
            run(kind, state, addrs, socket).await;
        }))
}

// ─── Subtest body ────────────────────────────────────────────────

/// Run one subtest on an upgraded connection: sample the socket, send to
/// the client, read from the client, then keep the results.
async fn run(kind: SubtestKind, state: Arc<AppState>, addrs: ConnectionAddrs, socket: WebSocket) {
    let uuid = uuid::Uuid::new_v4().to_string();
    let span = info_span!("subtest", %kind, %uuid, client = %addrs.client);

    async move {
        info!("subtest: start");
        let mut data = ArchivalData::new(uuid.clone(), kind);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let src = state.collector.start(cancel_rx, addrs, uuid);

        let (mut sink, mut stream) = socket.split();
        let received = exchange(kind, &mut sink, &mut stream, src, &cancel_tx, &mut data).await;

        data.client_measurements = received.client_measurements;
        info!(
            sent = data.server_measurements.len(),
            client_bytes = received.bytes,
            "subtest: done"
        );
        state.results.save(data);
    }
    .instrument(span)
    .await
}

/// Drive both directions of a subtest at once. The sending side ends the
/// exchange; a failing receiving side cancels the collector so the sending
/// side winds down early.
async fn exchange<Si, St, E>(
    kind: SubtestKind,
    sink: &mut Si,
    stream: &mut St,
    src: mpsc::Receiver<Measurement>,
    cancel: &watch::Sender<bool>,
    data: &mut ArchivalData,
) -> Received
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let deadline = Instant::now() + MAX_RUNTIME;

    let sending = async {
        match kind {
            SubtestKind::Download => bulk::run(sink, src, data).await,
            SubtestKind::Upload => sender::run(sink, src, data).await,
        }
    };
    let receiving = async {
        let received = receiver::drain(stream, deadline).await;
        if let Err(err) = &received {
            warn!(error = %err, "receiver: stopped");
            let _ = cancel.send(true);
        }
        received.unwrap_or_default()
    };
    let ((), received) = tokio::join!(sending, receiving);
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::policy::{DEFAULT_RUNTIME, MIN_MEASUREMENT_INTERVAL};
    use crate::results::ResultsStore;
    use crate::socket::{KernelStats, SocketAccessor};
    use crate::ws::testing::RecordingSink;
    use parking_lot::Mutex;
    use socket2::{Domain, Socket, Type};
    use std::io;
    use std::net::SocketAddr;

    struct OneSocket(Mutex<Option<Socket>>);

    impl SocketAccessor for OneSocket {
        fn take(&self, _conn: &ConnectionAddrs) -> Option<Socket> {
            self.0.lock().take()
        }
    }

    fn collector(results: Arc<ResultsStore>) -> MetricsCollector {
        let sock = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        MetricsCollector::new(
            Arc::new(OneSocket(Mutex::new(Some(sock)))),
            Arc::new(KernelStats),
            results,
        )
    }

    fn addrs() -> ConnectionAddrs {
        ConnectionAddrs {
            client: SocketAddr::from(([10, 0, 0, 1], 40000)),
            server: SocketAddr::from(([10, 0, 0, 2], 443)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn client_reset_cancels_sampling() {
        let results = Arc::new(ResultsStore::new(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let src = collector(results.clone()).start(cancel_rx, addrs(), "u".into());

        let mut sink = RecordingSink::default();
        let mut stream = futures::stream::iter(vec![Err::<Message, _>(io::Error::from(
            io::ErrorKind::ConnectionReset,
        ))]);
        let mut data = ArchivalData::new("u".into(), SubtestKind::Upload);
        let started = Instant::now();

        let received =
            exchange(SubtestKind::Upload, &mut sink, &mut stream, src, &cancel_tx, &mut data).await;

        assert!(started.elapsed() < MIN_MEASUREMENT_INTERVAL * 2);
        assert!(started.elapsed() < DEFAULT_RUNTIME);
        assert!(*cancel_tx.borrow());
        assert!(received.client_measurements.is_empty());
        assert!(matches!(sink.sent.last(), Some(Message::Close(_))));
        assert!(data.server_measurements.len() <= 2);
        assert!(data.end_time.is_some());
        assert_eq!(results.snapshot().active_tests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn client_close_lets_sampling_run_its_course() {
        let results = Arc::new(ResultsStore::new(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let src = collector(results.clone()).start(cancel_rx, addrs(), "u".into());

        let mut sink = RecordingSink::default();
        let mut stream =
            futures::stream::iter(vec![Ok::<_, io::Error>(Message::Close(None))]);
        let mut data = ArchivalData::new("u".into(), SubtestKind::Upload);
        let started = Instant::now();

        exchange(SubtestKind::Upload, &mut sink, &mut stream, src, &cancel_tx, &mut data).await;

        assert!(!*cancel_tx.borrow());
        assert!(started.elapsed() >= DEFAULT_RUNTIME);
        assert!(data.server_measurements.len() > 2);
    }
}
