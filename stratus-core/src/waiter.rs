//! Waiter - Poll an asynchronous cloud operation until it settles
//!
//! Cloud APIs answer most mutating calls before the object is usable: a
//! cluster is `Creating`, a volume is `creating`, an endpoint is
//! `pendingAcceptance`. [`StateChangeConf`] repeatedly calls a refresh
//! function and compares the reported status string with the pending and
//! target sets until a target is observed, the object disappears, or the
//! timeout elapses.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::provider::ProviderError;

/// Default number of consecutive "not found" refreshes tolerated
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Errors returned by [`StateChangeConf::wait_for_state`]
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})", expected.join(", "), last_state, timeout)]
    Timeout {
        last_state: String,
        expected: Vec<String>,
        timeout: Duration,
    },

    #[error("couldn't find resource ({retries} retries)")]
    NotFound { retries: u32 },

    #[error("unexpected state '{state}', wanted target '{}'", expected.join(", "))]
    UnexpectedState { state: String, expected: Vec<String> },

    #[error(transparent)]
    Refresh(ProviderError),
}

impl From<WaitError> for ProviderError {
    fn from(err: WaitError) -> Self {
        let message = err.to_string();
        match err {
            WaitError::Refresh(e) => e,
            WaitError::Timeout { .. } => ProviderError::timeout(message),
            WaitError::NotFound { .. } => ProviderError::not_found(message),
            WaitError::UnexpectedState { .. } => ProviderError::new(message),
        }
    }
}

/// Configuration for waiting on a status transition
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// States that mean "keep waiting"
    pub pending: Vec<String>,
    /// States that mean "done"; empty means "done once the object is gone"
    pub target: Vec<String>,
    /// Overall time limit
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Smallest wait between refreshes when backing off
    pub min_timeout: Duration,
    /// Fixed wait between refreshes; overrides backoff when set
    pub poll_interval: Option<Duration>,
    /// Consecutive "not found" refreshes tolerated before failing
    pub not_found_checks: u32,
    /// Consecutive target observations required before finishing
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
            min_timeout: Duration::ZERO,
            poll_interval: None,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            continuous_target_occurence: 1,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
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

    pub fn with_continuous_target_occurence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurence = occurrences.max(1);
        self
    }

    fn next_wait(&self, backoff: &mut Duration) -> Duration {
        if let Some(interval) = self.poll_interval {
            return interval;
        }
        let wait = (*backoff).max(self.min_timeout);
        *backoff = (*backoff * 2).min(MAX_BACKOFF);
        wait
    }

    /// Poll `refresh` until a target state is reached.
    ///
    /// `refresh` yields `Ok(Some((object, status)))` while the object exists
    /// and `Ok(None)` once it cannot be found. The last refreshed object is
    /// returned on success (`None` when the wait finished because the object
    /// disappeared).
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> Result<Option<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<(T, String)>, ProviderError>>,
    {
        // A timeout too large to represent never expires
        let deadline = Instant::now().checked_add(self.timeout);
        let mut backoff = INITIAL_BACKOFF;
        let mut not_found_ticks = 0u32;
        let mut target_occurence = 0u32;
        let mut last_state = String::new();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        loop {
            match refresh().await.map_err(WaitError::Refresh)? {
                None => {
                    if self.target.is_empty() {
                        target_occurence += 1;
                        if target_occurence >= self.continuous_target_occurence {
                            debug!("resource is gone, wait finished");
                            return Ok(None);
                        }
                    } else {
                        target_occurence = 0;
                        not_found_ticks += 1;
                        if not_found_ticks > self.not_found_checks {
                            return Err(WaitError::NotFound {
                                retries: not_found_ticks - 1,
                            });
                        }
                    }
                }
                Some((object, state)) => {
                    not_found_ticks = 0;
                    trace!(state = %state, "refreshed resource state");

                    if self.target.iter().any(|t| *t == state) {
                        target_occurence += 1;
                        if target_occurence >= self.continuous_target_occurence {
                            debug!(state = %state, "target state reached");
                            return Ok(Some(object));
                        }
                    } else if self.pending.iter().any(|p| *p == state) {
                        target_occurence = 0;
                    } else if !self.pending.is_empty() {
                        return Err(WaitError::UnexpectedState {
                            state,
                            expected: self.target.clone(),
                        });
                    }
                    last_state = state;
                }
            }

            let wait = self.next_wait(&mut backoff);
            let expired = deadline.is_some_and(|deadline| {
                Instant::now()
                    .checked_add(wait)
                    .is_none_or(|next| next > deadline)
            });
            if expired {
                return Err(WaitError::Timeout {
                    last_state,
                    expected: self.target.clone(),
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scripted(
        states: Vec<Option<&'static str>>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<Option<(u32, String)>, ProviderError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let refresh = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let idx = (n as usize).min(states.len() - 1);
            let result = states[idx].map(|s| (n, s.to_string()));
            std::future::ready(Ok(result))
        };
        (calls, refresh)
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_after_pending() {
        let conf = StateChangeConf::new(["Creating"], ["Available"], Duration::from_secs(60));
        let (calls, refresh) = scripted(vec![Some("Creating"), Some("Creating"), Some("Available")]);

        let result = conf.wait_for_state(refresh).await.unwrap();
        assert_eq!(result, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_state_fails_fast() {
        let conf = StateChangeConf::new(["Creating"], ["Available"], Duration::from_secs(60));
        let (_, refresh) = scripted(vec![Some("Creating"), Some("Error")]);

        let err = conf.wait_for_state(refresh).await.unwrap_err();
        assert!(matches!(err, WaitError::UnexpectedState { ref state, .. } if state == "Error"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_finishes_when_gone() {
        let conf = StateChangeConf::new(["Deleting"], Vec::<String>::new(), Duration::from_secs(60));
        let (_, refresh) = scripted(vec![Some("Deleting"), None]);

        let result = conf.wait_for_state(refresh).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_checks_exhausted() {
        let conf = StateChangeConf::new(["creating"], ["available"], Duration::from_secs(600))
            .with_not_found_checks(3);
        let (calls, refresh) = scripted(vec![None]);

        let err = conf.wait_for_state(refresh).await.unwrap_err();
        assert!(matches!(err, WaitError::NotFound { retries: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_last_state() {
        let conf = StateChangeConf::new(["BUILDING"], ["COMPLETED"], Duration::from_secs(5))
            .with_poll_interval(Duration::from_secs(1));
        let (_, refresh) = scripted(vec![Some("BUILDING")]);

        let err = conf.wait_for_state(refresh).await.unwrap_err();
        match err {
            WaitError::Timeout { last_state, .. } => assert_eq!(last_state, "BUILDING"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_target_occurence_requires_streak() {
        let conf = StateChangeConf::new(["pending"], ["ready"], Duration::from_secs(60))
            .with_continuous_target_occurence(2);
        let (calls, refresh) = scripted(vec![
            Some("ready"),
            Some("pending"),
            Some("ready"),
            Some("ready"),
        ]);

        let result = conf.wait_for_state(refresh).await.unwrap();
        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_error_aborts() {
        let conf = StateChangeConf::new(["a"], ["b"], Duration::from_secs(60));
        let err = conf
            .wait_for_state(|| async {
                Err::<Option<((), String)>, _>(ProviderError::new("boom"))
            })
            .await
            .unwrap_err();
        let provider_err: ProviderError = err.into();
        assert_eq!(provider_err.message, "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_never_expires() {
        let conf = StateChangeConf::new(["Creating"], ["Available"], Duration::MAX)
            .with_poll_interval(Duration::from_secs(3600));
        let (calls, refresh) = scripted(vec![Some("Creating"), Some("Available")]);

        let result = conf.wait_for_state(refresh).await.unwrap();
        assert_eq!(result, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let conf = StateChangeConf::new(["a"], ["b"], Duration::from_secs(60))
            .with_min_timeout(Duration::from_millis(300));
        let mut backoff = INITIAL_BACKOFF;
        assert_eq!(conf.next_wait(&mut backoff), Duration::from_millis(300));
        assert_eq!(conf.next_wait(&mut backoff), Duration::from_millis(300));
        assert_eq!(conf.next_wait(&mut backoff), Duration::from_millis(400));
        for _ in 0..10 {
            conf.next_wait(&mut backoff);
        }
        assert_eq!(conf.next_wait(&mut backoff), MAX_BACKOFF);
    }

    #[test]
    fn timeout_converts_to_timeout_kind() {
        let err = WaitError::Timeout {
            last_state: "Creating".to_string(),
            expected: vec!["Available".to_string()],
            timeout: Duration::from_secs(1),
        };
        let provider_err: ProviderError = err.into();
        assert_eq!(provider_err.kind, crate::provider::ErrorKind::Timeout);
    }
}
