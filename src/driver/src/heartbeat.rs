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

//! The session keepalive task.
//!
//! One background task per session posts `/session/heartbeat` on a fixed
//! interval. An expired session token renews transparently inside the
//! REST client. Shutdown is a watch-channel signal followed by a join;
//! signalling twice is harmless.

use crate::protocol::{HEARTBEAT_PATH, RestResponse};
use crate::rest::{Call, RestClient};
use snowflake_core::options::RequestOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The server accepts keepalive frequencies in this range.
pub const MIN_INTERVAL: Duration = Duration::from_secs(900);
pub const MAX_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);

/// Clamps a configured frequency into the accepted range.
pub fn clamp_interval(interval: Option<Duration>) -> Duration {
    interval
        .unwrap_or(DEFAULT_INTERVAL)
        .clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// A running keepalive task.
#[derive(Debug)]
pub struct Heartbeat {
    shutdown: tokio::sync::watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Heartbeat {
    /// Spawns the keepalive loop. `interval` must already be clamped.
    pub fn start(rest: Arc<RestClient>, interval: Duration) -> Self {
        let (shutdown, mut signal) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = signal.changed() => return,
                }
                let response: snowflake_core::Result<RestResponse<serde_json::Value>> = rest
                    .call(
                        Call::post(HEARTBEAT_PATH),
                        None,
                        &RequestOptions::default(),
                        &CancellationToken::new(),
                    )
                    .await;
                match response {
                    Ok(response) if response.success => {
                        tracing::debug!("session heartbeat ok");
                    }
                    Ok(response) => {
                        tracing::warn!(code = ?response.code, "session heartbeat rejected");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "session heartbeat failed");
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Signals shutdown and waits for the task to finish.
    pub async fn stop(self) {
        // The send fails only if the task already exited; either way the
        // join below settles it.
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, DEFAULT_INTERVAL; "default")]
    #[test_case(Some(Duration::from_secs(60)), MIN_INTERVAL; "below range")]
    #[test_case(Some(Duration::from_secs(7200)), MAX_INTERVAL; "above range")]
    #[test_case(Some(Duration::from_secs(1200)), Duration::from_secs(1200); "in range")]
    fn interval_clamping(configured: Option<Duration>, want: Duration) {
        assert_eq!(clamp_interval(configured), want);
    }

    #[tokio::test]
    async fn stop_joins_before_the_first_tick() {
        let rest = Arc::new(RestClient::new(
            snowflake_core::http::Transport::builder().build().unwrap(),
            snowflake_auth::config::AuthConfig::default(),
            Arc::new(snowflake_auth::accessor::TokenAccessor::new()),
        ));
        let heartbeat = Heartbeat::start(rest, MIN_INTERVAL);
        // No tick has fired; stop must return promptly anyway.
        tokio::time::timeout(Duration::from_secs(1), heartbeat.stop())
            .await
            .expect("stop returns before the first tick");
    }
}
