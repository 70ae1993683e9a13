// Copyright 2025 Snowflake Computing Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The retry loop shared by the transport and the file-transfer agent.

use crate::Result;
use crate::backoff_policy::BackoffPolicy;
use crate::error::Error;
use crate::retry_policy::{RetryFlow, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

enum Attempt {
    // The first attempt.
    Initial,
    // (Attempt count, backoff delay, previous error)
    Retry(u32, Duration, Error),
}

impl Attempt {
    fn count(&self) -> u32 {
        match self {
            Attempt::Initial => 0,
            Attempt::Retry(count, _, _) => *count,
        }
    }
}

/// Runs the retry loop for a given function.
///
/// This function calls `inner` as long as (1) the retry policy has not
/// expired, and (2) `inner` has not returned a successful response. Between
/// calls it waits the amount of time prescribed by the backoff policy, using
/// `sleep` to implement the wait.
///
/// The argument passed to `inner` is the remaining time in the retry policy,
/// if the policy is time based; callers use it to cap per-attempt timeouts.
pub async fn retry_loop<F, S, Response>(
    inner: F,
    sleep: S,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
{
    retry_loop_with_callback(inner, sleep, retry_policy, backoff_policy, |_, _, _| {}).await
}

/// Runs the retry loop with a callback invoked before each backoff sleep.
///
/// The `on_retry` callback receives the attempt count, the error, and the
/// delay; the transport uses it for retry logging.
pub async fn retry_loop_with_callback<F, S, OnRetry, Response>(
    mut inner: F,
    sleep: S,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    mut on_retry: OnRetry,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
    OnRetry: FnMut(u32, &Error, Duration) + Send,
{
    let loop_start = std::time::Instant::now();
    let mut attempt_state = Attempt::Initial;
    loop {
        let mut attempt_count = attempt_state.count();
        let remaining_time = retry_policy.remaining_time(loop_start, attempt_count);

        if let Attempt::Retry(attempt_count, delay, prev_error) = attempt_state {
            if remaining_time.is_some_and(|remaining| remaining < delay) {
                return Err(prev_error);
            }
            on_retry(attempt_count, &prev_error, delay);
            sleep(delay).await;
        }
        attempt_count += 1;
        match inner(remaining_time).await {
            Ok(r) => return Ok(r),
            Err(e) => {
                let flow = retry_policy.on_error(loop_start, attempt_count, e);
                let delay = backoff_policy.on_failure(loop_start, attempt_count);
                match flow {
                    RetryFlow::Permanent(e) | RetryFlow::Exhausted(e) => return Err(e),
                    RetryFlow::Continue(e) => {
                        attempt_state = Attempt::Retry(attempt_count, delay, e);
                        continue;
                    }
                }
            }
        };
    }
}

/// Computes the effective timeout for one attempt, given the caller's
/// per-attempt timeout and the time remaining in the retry policy.
pub fn effective_timeout(
    attempt_timeout: Option<Duration>,
    remaining_time: Option<Duration>,
) -> Option<Duration> {
    match (attempt_timeout, remaining_time) {
        (None, None) => None,
        (None, Some(t)) => Some(t),
        (Some(t), None) => Some(t),
        (Some(a), Some(r)) => Some(std::cmp::min(a, r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::retry_policy::{RetryPolicyExt, TransportRetryPolicy};
    use std::sync::Mutex;
    use std::time::Duration;
    use test_case::test_case;

    fn policies() -> (Arc<dyn RetryPolicy>, Arc<dyn BackoffPolicy>) {
        (
            Arc::new(TransportRetryPolicy.with_attempt_limit(3)),
            Arc::new(crate::exponential_backoff::ExponentialBackoff::default()),
        )
    }

    #[test_case(None, None, None)]
    #[test_case(Some(Duration::from_secs(4)), None, Some(Duration::from_secs(4)))]
    #[test_case(Some(Duration::from_secs(4)), Some(Duration::from_secs(4)), None)]
    #[test_case(
        Some(Duration::from_secs(2)),
        Some(Duration::from_secs(2)),
        Some(Duration::from_secs(4))
    )]
    fn effective_timeouts(
        want: Option<Duration>,
        attempt: Option<Duration>,
        remaining: Option<Duration>,
    ) {
        assert_eq!(want, effective_timeout(attempt, remaining));
    }

    #[tokio::test]
    async fn immediate_success() -> anyhow::Result<()> {
        let (retry, backoff) = policies();
        let inner = async move |_| Ok::<_, Error>("success");
        let sleep = async |_| {};
        let response = retry_loop(inner, sleep, retry, backoff).await?;
        assert_eq!(response, "success");
        Ok(())
    }

    #[tokio::test]
    async fn immediate_permanent_failure() -> anyhow::Result<()> {
        let (retry, backoff) = policies();
        let calls = Mutex::new(0_u32);
        let inner = async |_| -> Result<&str> {
            *calls.lock().unwrap() += 1;
            Err(Error::transport(HttpError::new(404, None)))
        };
        let sleep = async |_| {};
        let response = retry_loop(inner, sleep, retry, backoff).await;
        assert!(response.is_err(), "{response:?}");
        assert_eq!(*calls.lock().unwrap(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn transient_then_success() -> anyhow::Result<()> {
        let (retry, backoff) = policies();
        let calls = Mutex::new(0_u32);
        let inner = async |_| -> Result<&str> {
            let mut calls = calls.lock().unwrap();
            *calls += 1;
            if *calls < 3 {
                return Err(Error::transport(HttpError::new(503, None)));
            }
            Ok("success")
        };
        let slept = Mutex::new(Vec::new());
        let sleep = async |d| slept.lock().unwrap().push(d);
        let response = retry_loop(inner, sleep, retry, backoff).await?;
        assert_eq!(response, "success");
        assert_eq!(slept.lock().unwrap().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn too_many_transients_exhausts() -> anyhow::Result<()> {
        let (retry, backoff) = policies();
        let calls = Mutex::new(0_u32);
        let inner = async |_| -> Result<&str> {
            *calls.lock().unwrap() += 1;
            Err(Error::transport(HttpError::new(503, None)))
        };
        let sleep = async |_| {};
        let response = retry_loop(inner, sleep, retry, backoff).await;
        assert!(response.is_err(), "{response:?}");
        // The attempt limit is 3: one initial call plus two retries.
        assert_eq!(*calls.lock().unwrap(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn on_retry_callback_observes_attempts() -> anyhow::Result<()> {
        let (retry, backoff) = policies();
        let calls = Mutex::new(0_u32);
        let inner = async |_| -> Result<&str> {
            let mut calls = calls.lock().unwrap();
            *calls += 1;
            if *calls < 2 {
                return Err(Error::transport(HttpError::new(503, None)));
            }
            Ok("success")
        };
        let sleep = async |_| {};
        let seen = Mutex::new(Vec::new());
        let on_retry =
            |attempt: u32, _: &Error, delay: Duration| seen.lock().unwrap().push((attempt, delay));
        let response = retry_loop_with_callback(inner, sleep, retry, backoff, on_retry).await?;
        assert_eq!(response, "success");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 1);
        Ok(())
    }
}
