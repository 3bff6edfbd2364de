//! Retry - Wait for remote objects to reach a target status
//!
//! `StateChangeConf` polls a refresh function until the status it reports is
//! one of the target statuses, the status is unexpected, or the timeout
//! elapses. `retry_when` re-runs an operation at a fixed interval while its
//! error is classified as retryable.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::provider::{ErrorKind, ProviderError, ProviderResult};

/// Default number of consecutive not-found refreshes tolerated while waiting
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Configuration for waiting on a status transition
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// Statuses that mean "keep waiting"
    pub pending: Vec<String>,
    /// Statuses that mean "done"; empty means waiting for the object to vanish
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Sleep once before the first refresh
    pub delay: Duration,
    /// Fixed interval between refreshes; `None` uses exponential backoff
    pub poll_interval: Option<Duration>,
    pub not_found_checks: u32,
    /// Number of consecutive target observations required
    pub continuous_target_occurence: u32,
}

impl StateChangeConf {
    pub fn new<P, T>(pending: P, target: T, timeout: Duration) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            timeout,
            delay: Duration::ZERO,
            poll_interval: None,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurence: 1,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn with_continuous_target_occurence(mut self, occurences: u32) -> Self {
        self.continuous_target_occurence = occurences.max(1);
        self
    }

    /// Poll `refresh` until a target status is observed
    ///
    /// `refresh` returns `None` when the object cannot be found. When the
    /// target list is empty, a missing object is the success condition and
    /// `Ok(None)` is returned.
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> ProviderResult<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<Option<(T, String)>>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut wait = self.poll_interval.unwrap_or(INITIAL_BACKOFF);
        let mut progress = Progress::default();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        loop {
            if let Observed::Done(result) = self.observe(refresh().await?, &mut progress)? {
                return Ok(result);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(progress.last_status.as_deref()));
            }
            let sleep_for = wait.min(deadline - now);
            tokio::time::sleep(sleep_for).await;
            if Instant::now() >= deadline {
                // One last look so a transition right at the deadline is not missed
                return match self.observe(refresh().await?, &mut progress)? {
                    Observed::Done(result) => Ok(result),
                    Observed::Waiting => Err(self.timeout_error(progress.last_status.as_deref())),
                };
            }

            if self.poll_interval.is_none() {
                wait = (wait * 2).min(MAX_BACKOFF);
            }
        }
    }

    /// Classify one refresh result
    fn observe<T>(
        &self,
        observed: Option<(T, String)>,
        progress: &mut Progress,
    ) -> ProviderResult<Observed<T>> {
        let Some((result, status)) = observed else {
            if self.target.is_empty() {
                return Ok(Observed::Done(None));
            }
            progress.target_occurences = 0;
            progress.not_found_ticks += 1;
            if progress.not_found_ticks > self.not_found_checks {
                return Err(ProviderError::not_found(format!(
                    "couldn't find resource ({} retries)",
                    self.not_found_checks
                )));
            }
            debug!(
                "waiting: resource not found ({} of {})",
                progress.not_found_ticks, self.not_found_checks
            );
            return Ok(Observed::Waiting);
        };

        progress.not_found_ticks = 0;
        if self.target.iter().any(|t| *t == status) {
            progress.target_occurences += 1;
            if progress.target_occurences >= self.continuous_target_occurence {
                return Ok(Observed::Done(Some(result)));
            }
            debug!(
                "waiting: target status {} seen {} of {} times",
                status, progress.target_occurences, self.continuous_target_occurence
            );
        } else if self.pending.iter().any(|p| *p == status) {
            progress.target_occurences = 0;
            debug!("waiting: status {} is pending", status);
        } else {
            return Err(ProviderError::new(format!(
                "unexpected state '{}', wanted target '{}'",
                status,
                self.target.join(", ")
            ))
            .with_kind(ErrorKind::UnexpectedState));
        }
        progress.last_status = Some(status);
        Ok(Observed::Waiting)
    }

    fn timeout_error(&self, last_status: Option<&str>) -> ProviderError {
        let target = if self.target.is_empty() {
            "deleted".to_string()
        } else {
            self.target.join(", ")
        };
        ProviderError::new(format!(
            "timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})",
            target,
            last_status.unwrap_or(""),
            self.timeout
        ))
        .with_kind(ErrorKind::Timeout)
    }
}

#[derive(Default)]
struct Progress {
    not_found_ticks: u32,
    target_occurences: u32,
    last_status: Option<String>,
}

enum Observed<T> {
    Done(Option<T>),
    Waiting,
}

/// Retry `op` at a fixed interval while `is_retryable` accepts its error
///
/// Returns the last error once `timeout` has elapsed.
pub async fn retry_when<T, E, F, Fut, P>(
    timeout: Duration,
    interval: Duration,
    mut op: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && Instant::now() + interval < deadline => {
                warn!("retryable error (attempt {}): {}", attempt, err);
                attempt += 1;
                tokio::time::sleep(interval).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn statuses(seq: &'static [&'static str]) -> impl FnMut() -> std::future::Ready<ProviderResult<Option<((), String)>>> {
        let mut i = 0;
        move || {
            let status = seq[i.min(seq.len() - 1)];
            i += 1;
            let result = if status.is_empty() {
                None
            } else {
                Some(((), status.to_string()))
            };
            std::future::ready(Ok(result))
        }
    }

    fn fast(pending: &[&str], target: &[&str]) -> StateChangeConf {
        StateChangeConf::new(
            pending.iter().copied(),
            target.iter().copied(),
            Duration::from_secs(2),
        )
        .with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn reaches_target_after_pending() {
        let conf = fast(&["IN_PROGRESS"], &["SUCCEEDED"]);
        let result = conf
            .wait_for_state(statuses(&["IN_PROGRESS", "IN_PROGRESS", "SUCCEEDED"]))
            .await
            .unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn unexpected_status_fails_immediately() {
        let conf = fast(&["IN_PROGRESS"], &["SUCCEEDED"]);
        let err = conf
            .wait_for_state(statuses(&["IN_PROGRESS", "FAILED"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedState);
        assert!(err.message.contains("FAILED"));
    }

    #[tokio::test]
    async fn times_out_with_last_status() {
        let conf = StateChangeConf::new(["PENDING_ENABLE"], ["ENABLED"], Duration::from_millis(40))
            .with_poll_interval(Duration::from_millis(5));
        let err = conf
            .wait_for_state(statuses(&["PENDING_ENABLE"]))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.message.contains("PENDING_ENABLE"));
    }

    #[tokio::test]
    async fn not_found_checks_are_limited() {
        let conf = fast(&["IN_PROGRESS"], &["SUCCEEDED"]).with_not_found_checks(2);
        let err = conf.wait_for_state(statuses(&[""])).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn empty_target_waits_for_deletion() {
        let conf = fast(&["ACTIVE"], &[]);
        let result = conf
            .wait_for_state(statuses(&["ACTIVE", "ACTIVE", ""]))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn continuous_target_occurence_resets_on_pending() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let seq = ["ENABLED", "PENDING_ENABLE", "ENABLED", "ENABLED"];
        let conf = fast(&["PENDING_ENABLE"], &["ENABLED"]).with_continuous_target_occurence(2);

        conf.wait_for_state(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let status = seq[n.min(seq.len() - 1)].to_string();
            async move { Ok(Some(((), status))) }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_comes_before_the_first_refresh() {
        let start = Instant::now();
        let first = Arc::new(std::sync::Mutex::new(None));
        let seen = first.clone();
        let conf = StateChangeConf::new(["CREATING"], ["ACTIVE"], Duration::from_secs(60))
            .with_delay(Duration::from_secs(10));

        conf.wait_for_state(move || {
            seen.lock().unwrap().get_or_insert_with(Instant::now);
            async { Ok(Some(((), "ACTIVE".to_string()))) }
        })
        .await
        .unwrap();

        let first = first.lock().unwrap().unwrap();
        assert!(first - start >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn last_look_still_needs_continuous_target() {
        let conf = StateChangeConf::new(["PENDING_ENABLE"], ["ENABLED"], Duration::from_secs(2))
            .with_poll_interval(Duration::from_secs(1))
            .with_continuous_target_occurence(2);
        let err = conf
            .wait_for_state(statuses(&["PENDING_ENABLE", "PENDING_ENABLE", "ENABLED"]))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{}", err);
        assert!(err.message.contains("ENABLED"));
    }

    #[tokio::test(start_paused = true)]
    async fn last_look_reports_unexpected_status() {
        let conf = StateChangeConf::new(["IN_PROGRESS"], ["SUCCEEDED"], Duration::from_secs(2))
            .with_poll_interval(Duration::from_secs(1));
        let err = conf
            .wait_for_state(statuses(&["IN_PROGRESS", "IN_PROGRESS", "FAILED"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnexpectedState);
    }

    #[tokio::test]
    async fn retry_when_retries_only_retryable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32, String> = retry_when(
            Duration::from_secs(1),
            Duration::from_millis(5),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("FinalizingOrganizationException".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
            |e: &String| e.contains("Finalizing"),
        )
        .await;
        assert_eq!(result.unwrap(), 2);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), String> = retry_when(
            Duration::from_secs(1),
            Duration::from_millis(5),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("AccessDenied".to_string()) }
            },
            |e: &String| e.contains("Finalizing"),
        )
        .await;
        assert_eq!(result.unwrap_err(), "AccessDenied");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_when_gives_up_after_timeout() {
        let result: Result<(), String> = retry_when(
            Duration::from_millis(30),
            Duration::from_millis(10),
            || async { Err("FinalizingOrganizationException".to_string()) },
            |_: &String| true,
        )
        .await;
        assert!(result.is_err());
    }
}
