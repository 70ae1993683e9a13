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

//! Per-request options for the transport.

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::retry_policy::{RetryPolicy, RetryPolicyArg};
use std::sync::Arc;
use std::time::Duration;

/// Options that apply to a single transport call.
///
/// The transport merges these with its own defaults: an explicit option
/// always wins.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    attempt_timeout: Option<Duration>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout for each individual attempt.
    pub fn set_attempt_timeout<V: Into<Duration>>(&mut self, v: V) -> &mut Self {
        self.attempt_timeout = Some(v.into());
        self
    }

    pub fn with_attempt_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.set_attempt_timeout(v);
        self
    }

    pub fn attempt_timeout(&self) -> Option<&Duration> {
        self.attempt_timeout.as_ref()
    }

    /// Overrides the transport's retry policy for this call.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(&mut self, v: V) -> &mut Self {
        self.retry_policy = Some(v.into().into_inner());
        self
    }

    pub fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.set_retry_policy(v);
        self
    }

    pub fn retry_policy(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    /// Overrides the transport's backoff policy for this call.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(&mut self, v: V) -> &mut Self {
        self.backoff_policy = Some(v.into().into_inner());
        self
    }

    pub fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.set_backoff_policy(v);
        self
    }

    pub fn backoff_policy(&self) -> Option<&Arc<dyn BackoffPolicy>> {
        self.backoff_policy.as_ref()
    }
}
