//! gRPC surface of the gateway.

pub mod convert;
mod service;

use std::time::Duration;

use tonic::metadata::MetadataMap;

pub use service::QuotaSchedulerService;

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Bounds on the slack kept between the gateway's timeout and the caller's.
const MIN_DEADLINE_MARGIN: Duration = Duration::from_millis(10);
const MAX_DEADLINE_MARGIN: Duration = Duration::from_millis(50);

/// Read the caller's deadline from the `grpc-timeout` header.
///
/// The transport cancels the call when its own timer on this header fires, so
/// the returned deadline ends a margin earlier and the handler reports
/// `DEADLINE_EXCEEDED` first.
///
/// Returns `None` when the header is absent or malformed.
pub fn request_deadline(metadata: &MetadataMap) -> Option<Duration> {
    metadata
        .get(GRPC_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_grpc_timeout)
        .map(leave_margin)
}

/// A tenth of `deadline`, kept within 10..=50ms, taken off the end.
fn leave_margin(deadline: Duration) -> Duration {
    let margin = (deadline / 10).clamp(MIN_DEADLINE_MARGIN, MAX_DEADLINE_MARGIN);
    deadline.saturating_sub(margin)
}

/// Parse a `grpc-timeout` value: up to eight ASCII digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}
