use std::fmt::Display;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::error::Error;
use crate::model::Measurement;
use crate::policy::MAX_MESSAGE_SIZE;

/// What the client sent during a subtest.
#[derive(Debug, Default)]
pub struct Received {
    pub client_measurements: Vec<Measurement>,
    pub bytes: u64,
}

/// Read client frames until the client closes, the stream ends, or
/// `deadline` passes.
///
/// Text frames are the client's own measurements; binary frames are upload
/// payload and are only counted. Unparseable text frames are skipped.
pub async fn drain<St, E>(stream: &mut St, deadline: Instant) -> Result<Received, Error>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut received = Received::default();
    loop {
        let msg = match timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(Error::DeadlineExceeded),
            Ok(None) => return Ok(received),
            Ok(Some(Err(err))) => return Err(Error::Transport(err.to_string())),
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Text(text) => {
                received.bytes += text.len() as u64;
                match serde_json::from_str::<Measurement>(text.as_str()) {
                    Ok(m) => received.client_measurements.push(m),
                    Err(err) => debug!(error = %err, "receiver: ignoring client text frame"),
                }
            }
            Message::Binary(data) => {
                if data.len() > MAX_MESSAGE_SIZE {
                    return Err(Error::MessageTooBig {
                        size: data.len(),
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                received.bytes += data.len() as u64;
            }
            Message::Close(_) => return Ok(received),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::io;
    use std::time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn collects_measurements_and_counts_bytes() {
        let frames: Vec<Result<Message, io::Error>> = vec![
            Ok(Message::Text(r#"{"Elapsed":0.5}"#.into())),
            Ok(Message::Binary(vec![0u8; 1000].into())),
            Ok(Message::Text("not json".into())),
            Ok(Message::Pong(Vec::new().into())),
            Ok(Message::Close(None)),
            Ok(Message::Binary(vec![0u8; 10].into())),
        ];
        let mut frames = stream::iter(frames);

        let received = drain(&mut frames, deadline()).await.unwrap();
        assert_eq!(received.client_measurements.len(), 1);
        assert_eq!(received.client_measurements[0].elapsed, 0.5);
        assert_eq!(received.bytes, 15 + 1000 + 8);
    }

    #[tokio::test]
    async fn stream_end_is_not_an_error() {
        let mut frames = stream::iter(Vec::<Result<Message, io::Error>>::new());
        let received = drain(&mut frames, deadline()).await.unwrap();
        assert!(received.client_measurements.is_empty());
    }

    #[tokio::test]
    async fn transport_error_ends_receiving() {
        let mut frames = stream::iter(vec![Err::<Message, _>(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        ))]);
        let err = drain(&mut frames, deadline()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_hits_deadline() {
        let mut frames = stream::pending::<Result<Message, io::Error>>();
        let err = drain(&mut frames, deadline()).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
    }
}
