//! Timing constants shared across transports and frontends.

use std::time::Duration;

/// Per-request timeout for HTTP backend calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed delay before a crashed stdio backend is respawned.
///
/// Deliberately fixed rather than exponential: recover quickly from transient
/// crashes and rely on operators watching logs for permanent failures.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(3);

/// How long shutdown waits for a stdio backend process before force-killing.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long the HTTP frontend waits for in-flight handlers on shutdown.
pub const FRONTEND_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Interval between periodic catalog refreshes.
pub const CATALOG_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default bound on a single stdio read (seconds) when no env override is set.
const DEFAULT_STDIO_READ_TIMEOUT_SECS: u64 = 30;

/// Bound on a single stdio response read.
///
/// The stdio mutex serializes requests but carries no timeout of its own; this
/// deadline keeps one wedged backend from blocking its queue forever.
/// Override with `MCP_PROXY_CALL_TIMEOUT_SECS`.
pub fn stdio_read_timeout() -> Duration {
    let secs = std::env::var("MCP_PROXY_CALL_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_STDIO_READ_TIMEOUT_SECS);
    Duration::from_secs(secs)
}
