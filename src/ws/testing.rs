use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ws::Message;
use futures::Sink;

/// Sink that records what it is given, optionally failing or never becoming
/// ready.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub sent: Vec<Message>,
    fail_after: Option<usize>,
    fail_pings: bool,
    stalled: bool,
}

impl RecordingSink {
    /// Accept `n` messages, then fail every send.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    /// Accept everything except pings.
    pub fn failing_pings() -> Self {
        Self {
            fail_pings: true,
            ..Self::default()
        }
    }

    /// Never ready to accept a message.
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.sent
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Message) -> bool) -> usize {
        self.sent.iter().filter(|m| pred(m)).count()
    }
}

impl Sink<Message> for RecordingSink {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.stalled {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        let this = self.get_mut();
        let exhausted = this.fail_after.is_some_and(|n| this.sent.len() >= n);
        if exhausted || (this.fail_pings && matches!(item, Message::Ping(_))) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
        }
        this.sent.push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}
