use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Bounds how many subtests run at once. `max == 0` means unlimited.
#[derive(Debug, Default)]
pub struct Concurrent {
    max: u64,
    current: AtomicU64,
}

/// A held admission slot, released when dropped.
///
/// The middleware puts it in the request extensions as `Arc<Permit>`; a
/// WebSocket handler moves it into the upgraded connection so the slot is
/// held for the whole subtest, not just for the handshake.
#[derive(Debug)]
pub struct Permit {
    gate: Option<Arc<Concurrent>>,
}

impl Concurrent {
    pub fn new(max: u64) -> Self {
        Self {
            max,
            current: AtomicU64::new(0),
        }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Take a slot if one is free. Never pushes `current` above `max`, even
    /// transiently.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        if self.max == 0 {
            return Some(Permit { gate: None });
        }
        let max = self.max;
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| (c < max).then_some(c + 1))
            .ok()
            .map(|_| Permit {
                gate: Some(self.clone()),
            })
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(gate) = &self.gate {
            gate.current.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Middleware: admit the request if a slot is free, otherwise answer
/// `503 Service Unavailable` with an empty body without running the handler.
pub async fn limit(State(gate): State<Arc<Concurrent>>, mut req: Request, next: Next) -> Response {
    let Some(permit) = gate.try_acquire() else {
        debug!(max = gate.max(), path = %req.uri().path(), "admission: denied");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    req.extensions_mut().insert(Arc::new(permit));
    next.run(req).await
}
