use std::sync::Arc;
use std::time::Duration;

use socket2::Socket;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::model::{ConnectionInfo, Measurement};
use crate::policy::{DEFAULT_RUNTIME, MEASUREMENT_BUFFER, MIN_MEASUREMENT_INTERVAL};
use crate::results::ResultRecorder;
use crate::socket::{ConnectionAddrs, SocketAccessor, SocketStats};

// ─── Public types ────────────────────────────────────────────────

/// Samples socket statistics of a connection in the background.
/// One instance serves every subtest; each `start` spawns its own loop.
pub struct MetricsCollector {
    sockets: Arc<dyn SocketAccessor>,
    stats: Arc<dyn SocketStats>,
    recorder: Arc<dyn ResultRecorder>,
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new(
        sockets: Arc<dyn SocketAccessor>,
        stats: Arc<dyn SocketStats>,
        recorder: Arc<dyn ResultRecorder>,
    ) -> Self {
        Self {
            sockets,
            stats,
            recorder,
        }
    }

    /// Spawn the sampling loop for `conn` and return its measurements.
    ///
    /// The channel yields one measurement with connection info, then one
    /// sample every `MIN_MEASUREMENT_INTERVAL`, and is closed within
    /// `DEFAULT_RUNTIME` of this call or as soon as `cancel` turns true.
    /// It is buffered for the whole runtime, so a slow reader does not stall
    /// sampling. A reader that stalls past that capacity blocks the loop on
    /// its next send; the runtime bound is not enforced while it waits.
    pub fn start(
        &self,
        cancel: watch::Receiver<bool>,
        conn: ConnectionAddrs,
        uuid: String,
    ) -> mpsc::Receiver<Measurement> {
        let (tx, rx) = mpsc::channel(MEASUREMENT_BUFFER);
        let run = Run {
            sockets: self.sockets.clone(),
            stats: self.stats.clone(),
            recorder: self.recorder.clone(),
            conn,
            uuid,
        };
        tokio::spawn(run.sample(cancel, tx));
        rx
    }
}

// ─── Sampling loop ───────────────────────────────────────────────

struct Run {
    sockets: Arc<dyn SocketAccessor>,
    stats: Arc<dyn SocketStats>,
    recorder: Arc<dyn ResultRecorder>,
    conn: ConnectionAddrs,
    uuid: String,
}

impl Run {
    /// `dst`, the socket and the ticker are owned by this future, so each is
    /// released on every exit path.
    async fn sample(self, mut cancel: watch::Receiver<bool>, dst: mpsc::Sender<Measurement>) {
        debug!(uuid = %self.uuid, "collector: start");
        let deadline = Instant::now() + DEFAULT_RUNTIME;

        let Some(sock) = self.sockets.take(&self.conn) else {
            warn!(uuid = %self.uuid, client = %self.conn.client, "collector: no socket for connection");
            return;
        };
        if let Err(err) = self.stats.enable_congestion_control(&sock) {
            warn!(uuid = %self.uuid, error = %err, "collector: cannot enable BBR");
        }

        let t0 = Instant::now();
        self.recorder.start_test(&self.uuid);
        let _bracket = EndTest {
            recorder: &*self.recorder,
            uuid: &self.uuid,
        };

        let info = ConnectionInfo {
            client: self.conn.client.to_string(),
            server: self.conn.server.to_string(),
            uuid: self.uuid.clone(),
        };
        // Buffered for the whole runtime, so this does not block.
        if dst.send(self.measure(&sock, Duration::ZERO, Some(info))).await.is_err() {
            return;
        }

        let mut ticker = interval_at(t0 + MIN_MEASUREMENT_INTERVAL, MIN_MEASUREMENT_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(ticker);
        let expired = sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;
                _ = &mut expired => {
                    debug!(uuid = %self.uuid, "collector: runtime elapsed");
                    return;
                }
                _ = cancelled(&mut cancel) => {
                    debug!(uuid = %self.uuid, "collector: cancelled");
                    return;
                }
                Some(_) = ticks.next() => {
                    let m = self.measure(&sock, Instant::now().duration_since(t0), None);
                    if dst.send(m).await.is_err() {
                        debug!(uuid = %self.uuid, "collector: reader gone");
                        return;
                    }
                }
            }
        }
    }

    fn measure(
        &self,
        sock: &Socket,
        elapsed: Duration,
        connection_info: Option<ConnectionInfo>,
    ) -> Measurement {
        Measurement {
            connection_info,
            elapsed: elapsed.as_secs_f64(),
            bbr_info: self.stats.congestion_info(sock).ok(),
            tcp_info: self.stats.tcp_info(sock).ok(),
        }
    }
}

/// Resolves once `cancel` holds `true`. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|&c| c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

struct EndTest<'a> {
    recorder: &'a dyn ResultRecorder,
    uuid: &'a str,
}

impl Drop for EndTest<'_> {
    fn drop(&mut self) {
        self.recorder.end_test(self.uuid);
    }
}
