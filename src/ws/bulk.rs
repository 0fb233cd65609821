use std::fmt::Display;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::Sink;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::sender::deliver;
use crate::model::{ArchivalData, Measurement};
use crate::policy::{next_message_size, INITIAL_MESSAGE_SIZE, MAX_RUNTIME, MAX_SCALED_MESSAGE_SIZE};

use super::write_before;

/// Download subtest: saturate the connection with binary messages while
/// relaying measurements the same way the measurement sender does.
///
/// Message size starts at `INITIAL_MESSAGE_SIZE` and grows per
/// [`next_message_size`]. Ends on the collector closing its channel (after
/// the close handshake) or on the first failed write.
pub async fn run<S>(conn: &mut S, mut src: mpsc::Receiver<Measurement>, data: &mut ArchivalData)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    debug!("bulk sender: start");
    let deadline = Instant::now() + MAX_RUNTIME;
    let mut data = data.stamp();

    let payload = random_payload();
    let mut size = INITIAL_MESSAGE_SIZE;
    let mut total_sent: u64 = 0;

    loop {
        match src.try_recv() {
            Ok(m) => {
                if deliver(conn, m, &mut data, deadline).await.is_err() {
                    break;
                }
            }
            Err(TryRecvError::Disconnected) => {
                super::start_closing(conn, deadline).await;
                break;
            }
            Err(TryRecvError::Empty) => {
                let msg = Message::Binary(payload.slice(..size));
                if let Err(err) = write_before(conn, msg, deadline).await {
                    warn!(error = %err, total_sent, "bulk sender: writing payload failed");
                    break;
                }
                total_sent += size as u64;
                size = next_message_size(size, total_sent);
            }
        }
    }
    debug!(total_sent, "bulk sender: stop");
}

/// Incompressible bytes, enough for the largest scaled message.
fn random_payload() -> Bytes {
    let mut buf = vec![0u8; MAX_SCALED_MESSAGE_SIZE];
    StdRng::from_entropy().fill_bytes(&mut buf);
    Bytes::from(buf)
}
