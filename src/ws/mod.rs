//! WebSocket plumbing shared by both subtests: deadline-bounded writes,
//! the latency probe and the close handshake.
//!
//! Everything is generic over a `Sink<Message>` so the loops can run on the
//! write half of an axum `WebSocket` or on a test double.

pub mod bulk;
pub mod receiver;
#[cfg(test)]
pub mod testing;

use std::fmt::Display;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use chrono::Utc;
use futures::{Sink, SinkExt};
use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::error::Error;

/// Write `msg`, giving up at `deadline`.
pub async fn write_before<S>(conn: &mut S, msg: Message, deadline: Instant) -> Result<(), Error>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout_at(deadline, conn.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::Transport(err.to_string())),
        Err(_) => Err(Error::DeadlineExceeded),
    }
}

/// Serialize `value` and write it as a text frame.
pub async fn write_json<S, T>(conn: &mut S, value: &T, deadline: Instant) -> Result<(), Error>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    T: Serialize,
{
    let json = serde_json::to_string(value)?;
    write_before(conn, Message::Text(json.into()), deadline).await
}

/// Latency probe: a ping carrying the current UNIX time in nanoseconds.
/// The client's pong lets the kernel and the client observe the RTT of an
/// application-level round trip.
pub async fn send_tick<S>(conn: &mut S, deadline: Instant) -> Result<(), Error>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    write_before(conn, Message::Ping(now.to_string().into()), deadline).await
}

/// Start the close handshake. Failure only means the peer is already gone.
pub async fn start_closing<S>(conn: &mut S, deadline: Instant)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static(""),
    };
    if let Err(err) = write_before(conn, Message::Close(Some(frame)), deadline).await {
        debug!(error = %err, "close handshake failed");
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn tick_payload_is_unix_nanos() {
        let mut sink = RecordingSink::default();
        let deadline = Instant::now() + Duration::from_secs(1);
        send_tick(&mut sink, deadline).await.unwrap();

        let Message::Ping(payload) = &sink.sent[0] else {
            panic!("expected ping, got {:?}", sink.sent[0]);
        };
        let nanos: i64 = std::str::from_utf8(payload).unwrap().parse().unwrap();
        assert!(nanos > 0);
    }

    #[tokio::test]
    async fn closing_sends_normal_close_frame() {
        let mut sink = RecordingSink::default();
        start_closing(&mut sink, Instant::now() + Duration::from_secs(1)).await;
        match &sink.sent[..] {
            [Message::Close(Some(frame))] => assert_eq!(frame.code, close_code::NORMAL),
            other => panic!("unexpected frames {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_error_is_reported() {
        let mut sink = RecordingSink::failing_after(0);
        let err = write_before(&mut sink, Message::Text("x".into()), Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_hits_deadline() {
        let mut sink = RecordingSink::stalled();
        let err = write_before(&mut sink, Message::Text("x".into()), Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }
}
