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

//! The concurrency-safe holder of the session token triple.
//!
//! Readers always observe a consistent `(session token, master token,
//! session id)` triple. Writers are serialized. Renewal is single-flight: a
//! generation counter lets callers that raced on the same expired token
//! detect that another task already rotated it and skip their own renewal.

use crate::config::AuthConfig;
use crate::login::{self, AuthResponse};
use serde::{Deserialize, Serialize};
use snowflake_core::Result;
use snowflake_core::error::{Error, ServerError, code};
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A consistent snapshot of the session tokens.
#[derive(Clone, Default, PartialEq)]
pub struct Tokens {
    pub session_token: String,
    pub master_token: String,
    pub session_id: i64,
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("session_token", &"[censored]")
            .field("master_token", &"[censored]")
            .field("session_id", &self.session_id)
            .finish()
    }
}

#[derive(Debug, Default)]
struct State {
    tokens: Tokens,
    generation: u64,
}

/// Thread-safe accessor for the session token triple.
#[derive(Debug, Default)]
pub struct TokenAccessor {
    state: RwLock<State>,
    renew_lock: tokio::sync::Mutex<()>,
}

impl TokenAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current tokens.
    pub fn get(&self) -> Tokens {
        self.snapshot().0
    }

    /// Returns the current tokens plus the rotation generation.
    pub fn snapshot(&self) -> (Tokens, u64) {
        let state = self.state.read().expect("token accessor lock is poisoned");
        (state.tokens.clone(), state.generation)
    }

    /// Replaces the tokens, bumping the generation.
    pub fn set(&self, tokens: Tokens) {
        let mut state = self.state.write().expect("token accessor lock is poisoned");
        state.tokens = tokens;
        state.generation += 1;
    }

    /// Clears the tokens at session close.
    pub fn clear(&self) {
        self.set(Tokens::default());
    }

    fn generation(&self) -> u64 {
        self.state
            .read()
            .expect("token accessor lock is poisoned")
            .generation
    }
}

#[derive(Serialize)]
struct RenewRequest<'a> {
    #[serde(rename = "oldSessionToken")]
    old_session_token: &'a str,
    #[serde(rename = "requestType")]
    request_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewResponseData {
    session_token: Option<String>,
    master_token: Option<String>,
}

/// Renews the session token using the master token.
///
/// Single-flight: concurrent callers holding the same `observed_generation`
/// coalesce onto one renewal HTTP call; the rest re-read the accessor and
/// return. Exactly one renewal request is made per token generation.
pub async fn renew_session(
    transport: &Transport,
    config: &AuthConfig,
    accessor: &TokenAccessor,
    observed_generation: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let _guard = accessor.renew_lock.lock().await;
    if accessor.generation() != observed_generation {
        // Another task rotated the tokens while this one waited.
        return Ok(());
    }
    let tokens = accessor.get();

    let mut url = url::Url::parse(&config.base_url())
        .and_then(|u| u.join(login::TOKEN_REQUEST_PATH))
        .map_err(Error::config)?;
    url.query_pairs_mut()
        .append_pair("requestId", &uuid::Uuid::new_v4().to_string())
        .append_pair("request_guid", &uuid::Uuid::new_v4().to_string());

    let request = RenewRequest {
        old_session_token: &tokens.session_token,
        request_type: "RENEW",
    };
    let builder = login::standard_headers(transport.client().post(url.to_string()))
        .header(
            http::header::AUTHORIZATION,
            login::auth_header(&tokens.master_token),
        )
        .json(&request);
    let options = RequestOptions::new().with_attempt_timeout(config.login_timeout);
    let response: AuthResponse<RenewResponseData> =
        transport.execute_json(builder, &options, cancel).await?;

    if !response.success {
        let code = response.code.unwrap_or_default();
        let server = ServerError::new(
            code,
            "08001".to_string(),
            response
                .message
                .unwrap_or_else(|| "session renewal failed".to_string()),
        );
        // An expired master token is beyond recovery here; a full re-login
        // is the caller's responsibility.
        return Err(if code == code::MASTER_TOKEN_EXPIRED {
            Error::authentication(server)
        } else {
            Error::server(server)
        });
    }
    let data = response
        .data
        .ok_or_else(|| Error::authentication("renewal response carried no data"))?;
    let (Some(session_token), Some(master_token)) = (data.session_token, data.master_token) else {
        return Err(Error::authentication("renewal response carried no tokens"));
    };
    tracing::debug!(session_id = tokens.session_id, "session token renewed");
    accessor.set(Tokens {
        session_token,
        master_token,
        session_id: tokens.session_id,
    });
    Ok(())
}
