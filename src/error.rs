use std::io;

use thiserror::Error;

/// Failures raised while sampling a socket or talking to a client.
///
/// None of these escape a subtest: the collector absorbs sampling errors and
/// the sender turns transport errors into an early, logged return.
#[derive(Debug, Error)]
pub enum Error {
    #[error("socket option: {0}")]
    Sockopt(#[from] io::Error),

    #[error("congestion control in use is not BBR")]
    NotBbr,

    #[error("socket statistics are not supported on this platform")]
    Unsupported,

    #[error("write deadline exceeded")]
    DeadlineExceeded,

    #[error("transport: {0}")]
    Transport(String),

    #[error("encoding measurement: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("client message of {size} bytes exceeds {max} bytes")]
    MessageTooBig { size: usize, max: usize },
}
