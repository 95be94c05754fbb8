//! Bounded polling.
//!
//! Every wait in a reconciliation pass polls on a fixed interval until a check
//! yields a value or a deadline passes. A passed deadline is
//! [`ControllerError::DeadlineExceeded`], which the watcher requeues quickly.

use crate::error::ControllerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Poll `check` every `interval` until it returns `Some`, for at most `timeout`.
///
/// The first check runs immediately. Errors from `check` end the wait.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ControllerError>>,
{
    let poll = async {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(value) = check().await? {
                return Ok(value);
            }
            debug!("Still waiting for {}, rechecking in {:?}", what, interval);
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(ControllerError::DeadlineExceeded {
            what: what.to_string(),
            timeout,
        }),
    }
}
