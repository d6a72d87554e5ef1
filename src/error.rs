use thiserror::Error;

/// Fatal timeline build failures.
///
/// Only the stop pattern is structurally required; every other upstream
/// source degrades into lower-fidelity output instead of erroring. A caller
/// receiving this should treat the route as "no data available".
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("stop pattern unavailable for route {route} direction {direction}: {reason:#}")]
    StopPatternUnavailable {
        route: String,
        direction: u8,
        reason: anyhow::Error,
    },
}
