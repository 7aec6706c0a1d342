// Path: crates/shmem/src/poll.rs
use molsift_telemetry::mirror_metrics;
use molsift_types::error::MirrorError;
use std::time::Duration;

/// Upper bound on the doubling backoff between polls.
pub(crate) const MAX_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The result of one step of a bounded poll.
pub(crate) enum Attempt<T> {
    Ready(T),
    Retry,
}

/// Runs `step` until it is ready, sleeping with doubling backoff in between.
///
/// Gives up with [`MirrorError::Busy`] after `attempts` steps.
pub(crate) fn poll_bounded<T, E, F>(
    tag: &str,
    attempts: u32,
    interval: Duration,
    mut step: F,
) -> Result<T, E>
where
    E: From<MirrorError>,
    F: FnMut(u32) -> Result<Attempt<T>, E>,
{
    let mut delay = interval;
    for attempt in 1..=attempts {
        match step(attempt)? {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Retry => {
                tracing::debug!(target: "shmem", tag, attempt, attempts, "mirror busy, polling");
                mirror_metrics().inc_poll_retries(tag);
                if attempt < attempts {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(MAX_POLL_INTERVAL);
                }
            }
        }
    }
    Err(MirrorError::Busy { attempts }.into())
}
