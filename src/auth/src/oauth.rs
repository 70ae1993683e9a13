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

//! OAuth authentication.
//!
//! Two flows. The bearer flow takes a caller-supplied access token and
//! posts it straight to the login endpoint. The authorization-code flow
//! drives the system browser through the authorization server with PKCE,
//! exchanges the code at the token endpoint, and then logs in with the
//! resulting access token.

use crate::authenticator::Authenticator;
use crate::config::AuthConfig;
use crate::external_browser::CallbackListener;
use crate::login::{self, LoginData, LoginFields};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// The bearer flow: the caller already holds an access token.
#[derive(Debug)]
pub struct OAuthAuthenticator;

#[async_trait::async_trait]
impl Authenticator for OAuthAuthenticator {
    async fn login(
        &self,
        transport: &Transport,
        config: &AuthConfig,
        cancel: &CancellationToken,
    ) -> Result<LoginData> {
        let token = config
            .oauth
            .token
            .as_ref()
            .ok_or_else(|| Error::config("authenticator OAUTH requires a token"))?;
        let fields = LoginFields {
            authenticator: Some("OAUTH".to_string()),
            token: Some(token.as_str().to_string()),
            ..LoginFields::default()
        };
        login::post_login(transport, config, fields, HashMap::new(), cancel).await
    }
}

/// The authorization-code flow with PKCE.
#[derive(Debug)]
pub struct AuthorizationCodeAuthenticator;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// A PKCE verifier/challenge pair.
pub(crate) struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub(crate) fn new() -> Self {
        let verifier = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

fn authorization_url(
    config: &AuthConfig,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<url::Url> {
    let base = config
        .oauth
        .authorization_url
        .clone()
        .ok_or_else(|| {
            Error::config("authenticator OAUTH_AUTHORIZATION_CODE requires oauthAuthorizationUrl")
        })?;
    let client_id = config
        .oauth
        .client_id
        .as_deref()
        .ok_or_else(|| Error::config("authenticator OAUTH_AUTHORIZATION_CODE requires oauthClientId"))?;
    let mut url = url::Url::parse(&base).map_err(Error::config)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    if let Some(scope) = &config.oauth.scope {
        url.query_pairs_mut().append_pair("scope", scope);
    }
    Ok(url)
}

async fn exchange_code(
    transport: &Transport,
    config: &AuthConfig,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let token_url = config
        .oauth
        .token_request_url
        .clone()
        .ok_or_else(|| {
            Error::config("authenticator OAUTH_AUTHORIZATION_CODE requires oauthTokenRequestUrl")
        })?;
    let client_id = config.oauth.client_id.as_deref().unwrap_or_default();

    let mut form = vec![
        ("grant_type".to_string(), "authorization_code".to_string()),
        ("code".to_string(), code.to_string()),
        ("redirect_uri".to_string(), redirect_uri.to_string()),
        ("code_verifier".to_string(), verifier.to_string()),
        ("client_id".to_string(), client_id.to_string()),
    ];
    if let Some(secret) = &config.oauth.client_secret {
        form.push(("client_secret".to_string(), secret.as_str().to_string()));
    }

    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish();
    let builder = transport
        .client()
        .post(token_url)
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body);
    let options = snowflake_core::options::RequestOptions::new()
        .with_attempt_timeout(config.login_timeout);
    let response: TokenResponse = transport.execute_json(builder, &options, cancel).await?;
    Ok(response.access_token)
}

#[async_trait::async_trait]
impl Authenticator for AuthorizationCodeAuthenticator {
    async fn login(
        &self,
        transport: &Transport,
        config: &AuthConfig,
        cancel: &CancellationToken,
    ) -> Result<LoginData> {
        let listener = CallbackListener::bind().await?;
        let redirect_uri = config
            .oauth
            .redirect_uri
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}/", listener.port()));

        let state = uuid::Uuid::new_v4().to_string();
        let pkce = Pkce::new();
        let url = authorization_url(config, &redirect_uri, &state, &pkce.challenge)?;

        webbrowser::open(url.as_str()).map_err(Error::authentication)?;
        tracing::debug!("waiting for authorization server callback");

        let params = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled()),
            result = tokio::time::timeout(config.external_browser_timeout, listener.receive()) => {
                result.map_err(|_| {
                    Error::authentication("timed out waiting for the authorization server callback")
                })??
            }
        };
        if params.get("state").map(String::as_str) != Some(state.as_str()) {
            return Err(Error::authentication(
                "authorization callback state does not match",
            ));
        }
        let code = params
            .get("code")
            .ok_or_else(|| Error::authentication("authorization callback carried no code"))?;

        let access_token =
            exchange_code(transport, config, code, &pkce.verifier, &redirect_uri, cancel).await?;
        let fields = LoginFields {
            authenticator: Some("OAUTH".to_string()),
            token: Some(access_token),
            ..LoginFields::default()
        };
        login::post_login(transport, config, fields, HashMap::new(), cancel).await
    }
}
