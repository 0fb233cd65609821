use std::fmt::Display;

use axum::extract::ws::Message;
use futures::Sink;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Error;
use crate::model::{ArchivalData, Measurement};
use crate::policy::MAX_RUNTIME;
use crate::ws;

/// Relay the collector's measurements to the client until the collector
/// closes its channel, then start the close handshake.
///
/// Every write, probes included, must finish within `MAX_RUNTIME` of the
/// call. The first failed write ends the loop; whatever was delivered
/// until then stays in `data.server_measurements`. `data.start_time` and
/// `data.end_time` are always set.
pub async fn run<S>(conn: &mut S, mut src: mpsc::Receiver<Measurement>, data: &mut ArchivalData)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    debug!("sender: start");
    let deadline = Instant::now() + MAX_RUNTIME;
    let mut data = data.stamp();

    loop {
        let Some(m) = src.recv().await else {
            ws::start_closing(conn, deadline).await;
            break;
        };
        if deliver(conn, m, &mut data, deadline).await.is_err() {
            break;
        }
    }
    debug!("sender: stop");
}

/// Write one measurement, keep it if it went out, then probe latency.
pub(crate) async fn deliver<S>(
    conn: &mut S,
    m: Measurement,
    data: &mut ArchivalData,
    deadline: Instant,
) -> Result<(), Error>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    if let Err(err) = ws::write_json(conn, &m, deadline).await {
        warn!(error = %err, "sender: writing measurement failed");
        return Err(err);
    }
    data.server_measurements.push(m);
    if let Err(err) = ws::send_tick(conn, deadline).await {
        warn!(error = %err, "sender: latency probe failed");
        return Err(err);
    }
    Ok(())
}
