use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info};

/// Adds a `Server-Timing` header with the handler's wall time and logs one
/// line per request.
///
/// For subtest routes this measures the upgrade handshake only; the subtest
/// itself runs after the response is sent.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    let status = response.status().as_u16();
    let us = elapsed.as_micros() as u64;
    // Results polling is noisy
    if path.starts_with("/api/") {
        debug!(%method, %path, status, us, "request");
    } else {
        info!(%method, %path, status, us, "request");
    }

    response
}
