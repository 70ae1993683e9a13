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

//! Defines traits for retry policies and the driver's default implementation.
//!
//! The driver automatically retries requests that fail with transient errors.
//! Because every request to the Snowflake service carries a stable
//! `requestId`, the server deduplicates retried statements and the driver
//! treats all REST calls as idempotent. Retries are bounded by an attempt
//! limit (`MaxRetryCount`) and by the request timeout.

use crate::error::{Error, ErrorKind, HttpError};
use std::sync::Arc;

/// The result of a retry policy decision.
///
/// In all variants the result includes an error. This is useful when retry
/// policies are composed: an inner policy returns `Continue` based on the
/// error type, and an outer policy may return `Exhausted` based on the
/// number of errors or the elapsed time.
#[derive(Debug)]
pub enum RetryFlow {
    /// Stop the retry loop because this is a permanent error.
    Permanent(Error),
    /// Stop the retry loop. The error is retryable, but the retry attempts
    /// are exhausted.
    Exhausted(Error),
    /// The error was retryable, continue the retry loop.
    Continue(Error),
}

impl RetryFlow {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }

    /// Consumes the flow and returns the error it carries.
    pub fn into_error(self) -> Error {
        match self {
            Self::Permanent(e) | Self::Exhausted(e) | Self::Continue(e) => e,
        }
    }
}

/// Determines how errors are handled in the retry loop.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `loop_start` - when the retry loop started.
    /// * `attempt_count` - the number of attempts, including the initial
    ///   attempt. This method is called after the first attempt, so the
    ///   value is always non-zero.
    /// * `error` - the last error when attempting the request.
    fn on_error(&self, loop_start: std::time::Instant, attempt_count: u32, error: Error)
    -> RetryFlow;

    /// The remaining time in the retry policy.
    ///
    /// For policies based on time, this returns the remaining time in the
    /// policy. The retry loop uses this value to cap the next attempt's
    /// timeout. For policies that are not time based this returns `None`.
    fn remaining_time(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
    ) -> Option<std::time::Duration> {
        None
    }
}

/// Extension trait for [`RetryPolicy`].
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [`RetryPolicy`] to limit the total elapsed time in the
    /// retry loop.
    fn with_time_limit(self, maximum_duration: std::time::Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, maximum_duration)
    }

    /// Decorate a [RetryPolicy] to limit the number of attempts.
    ///
    /// The policy passes through the results from the inner policy as long
    /// as `attempt_count < maximum_attempts`. Once the maximum number of
    /// attempts is reached, the policy replaces any `Continue` result with
    /// [Exhausted][RetryFlow::Exhausted].
    fn with_attempt_limit(self, maximum_attempts: u32) -> LimitedAttemptCount<Self> {
        LimitedAttemptCount::custom(self, maximum_attempts)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// The transport-level classification used for all Snowflake REST calls.
///
/// Retryable: network-level errors (connection reset, DNS failure, timeout
/// without a server response), HTTP 5xx, HTTP 429, and HTTP 408. Everything
/// else is permanent; in particular other 4xx responses and server errors
/// delivered in a `200 OK` body are never retried here.
#[derive(Clone, Debug, Default)]
pub struct TransportRetryPolicy;

impl TransportRetryPolicy {
    fn retryable(error: &Error) -> bool {
        if let Some(http) = error.as_inner::<HttpError>() {
            let status = http.status_code();
            return status >= 500 || status == 429 || status == 408;
        }
        matches!(error.kind(), ErrorKind::Transport)
    }
}

impl RetryPolicy for TransportRetryPolicy {
    fn on_error(
        &self,
        _loop_start: std::time::Instant,
        _attempt_count: u32,
        error: Error,
    ) -> RetryFlow {
        if error.is_cancelled() {
            return RetryFlow::Permanent(error);
        }
        if Self::retryable(&error) {
            RetryFlow::Continue(error)
        } else {
            RetryFlow::Permanent(error)
        }
    }
}

/// A decorator that limits the total time in the retry loop.
#[derive(Debug)]
pub struct LimitedElapsedTime<P = TransportRetryPolicy> {
    inner: P,
    maximum_duration: std::time::Duration,
}

impl<P: RetryPolicy> LimitedElapsedTime<P> {
    pub fn custom(inner: P, maximum_duration: std::time::Duration) -> Self {
        Self {
            inner,
            maximum_duration,
        }
    }
}

impl<P: RetryPolicy> RetryPolicy for LimitedElapsedTime<P> {
    fn on_error(&self, start: std::time::Instant, count: u32, error: Error) -> RetryFlow {
        match self.inner.on_error(start, count, error) {
            RetryFlow::Permanent(e) => RetryFlow::Permanent(e),
            RetryFlow::Exhausted(e) => RetryFlow::Exhausted(e),
            RetryFlow::Continue(e) => {
                if std::time::Instant::now() >= start + self.maximum_duration {
                    RetryFlow::Exhausted(e)
                } else {
                    RetryFlow::Continue(e)
                }
            }
        }
    }

    fn remaining_time(
        &self,
        start: std::time::Instant,
        attempt_count: u32,
    ) -> Option<std::time::Duration> {
        let deadline = start + self.maximum_duration;
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match self.inner.remaining_time(start, attempt_count) {
            Some(inner) => Some(std::cmp::min(remaining, inner)),
            None => Some(remaining),
        }
    }
}

/// A decorator that limits the number of attempts in the retry loop.
#[derive(Debug)]
pub struct LimitedAttemptCount<P = TransportRetryPolicy> {
    inner: P,
    maximum_attempts: u32,
}

impl<P: RetryPolicy> LimitedAttemptCount<P> {
    pub fn custom(inner: P, maximum_attempts: u32) -> Self {
        Self {
            inner,
            maximum_attempts,
        }
    }
}

impl<P: RetryPolicy> RetryPolicy for LimitedAttemptCount<P> {
    fn on_error(&self, start: std::time::Instant, count: u32, error: Error) -> RetryFlow {
        match self.inner.on_error(start, count, error) {
            RetryFlow::Permanent(e) => RetryFlow::Permanent(e),
            RetryFlow::Exhausted(e) => RetryFlow::Exhausted(e),
            RetryFlow::Continue(e) => {
                if count >= self.maximum_attempts {
                    RetryFlow::Exhausted(e)
                } else {
                    RetryFlow::Continue(e)
                }
            }
        }
    }

    fn remaining_time(
        &self,
        start: std::time::Instant,
        attempt_count: u32,
    ) -> Option<std::time::Duration> {
        self.inner.remaining_time(start, attempt_count)
    }
}

/// A helper type to use [RetryPolicy] in client and request options.
#[derive(Clone)]
pub struct RetryPolicyArg(pub(crate) Arc<dyn RetryPolicy>);

impl<T> std::convert::From<T> for RetryPolicyArg
where
    T: RetryPolicy + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

impl RetryPolicyArg {
    pub fn into_inner(self) -> Arc<dyn RetryPolicy> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use test_case::test_case;

    fn http_error(status: u16) -> Error {
        Error::transport(HttpError::new(status, None))
    }

    #[test_case(500)]
    #[test_case(502)]
    #[test_case(503)]
    #[test_case(429)]
    #[test_case(408)]
    fn transport_policy_continues_on_retryable_status(status: u16) {
        let flow = TransportRetryPolicy.on_error(Instant::now(), 1, http_error(status));
        assert!(flow.is_continue(), "{flow:?}");
    }

    #[test_case(400)]
    #[test_case(401)]
    #[test_case(403)]
    #[test_case(404)]
    fn transport_policy_stops_on_client_error(status: u16) {
        let flow = TransportRetryPolicy.on_error(Instant::now(), 1, http_error(status));
        assert!(flow.is_permanent(), "{flow:?}");
    }

    #[test]
    fn transport_policy_continues_on_network_error() {
        let flow =
            TransportRetryPolicy.on_error(Instant::now(), 1, Error::transport("connection reset"));
        assert!(flow.is_continue(), "{flow:?}");
    }

    #[test]
    fn transport_policy_stops_on_cancel() {
        let flow = TransportRetryPolicy.on_error(Instant::now(), 1, Error::cancelled());
        assert!(flow.is_permanent(), "{flow:?}");
    }

    #[test]
    fn attempt_limit_exhausts() {
        let policy = TransportRetryPolicy.with_attempt_limit(3);
        let now = Instant::now();
        assert!(policy.on_error(now, 1, http_error(503)).is_continue());
        assert!(policy.on_error(now, 2, http_error(503)).is_continue());
        assert!(policy.on_error(now, 3, http_error(503)).is_exhausted());
        // Permanent errors pass through even before the limit.
        assert!(policy.on_error(now, 1, http_error(404)).is_permanent());
    }

    #[test]
    fn time_limit_exhausts() {
        let policy = TransportRetryPolicy.with_time_limit(Duration::from_secs(60));
        let past = Instant::now() - Duration::from_secs(120);
        assert!(policy.on_error(past, 1, http_error(503)).is_exhausted());
        let now = Instant::now();
        assert!(policy.on_error(now, 1, http_error(503)).is_continue());
        let remaining = policy.remaining_time(now, 1).unwrap();
        assert!(remaining <= Duration::from_secs(60));
    }
}
