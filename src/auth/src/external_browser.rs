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

//! External-browser (SAML) authentication.
//!
//! The driver opens the system browser on the identity provider's login
//! page and runs a loopback HTTP listener for the callback. The IdP
//! redirects the browser to `http://127.0.0.1:<port>/?token=...`; the
//! listener captures the token and the login POST exchanges it for session
//! tokens.
//!
//! When `clientStoreTemporaryCredential` is set, the server also issues an
//! ID token which is cached and used for subsequent logins without a
//! browser round trip.

use crate::authenticator::Authenticator;
use crate::cache::{self, CredentialKind};
use crate::config::AuthConfig;
use crate::login::{self, AuthResponse, LoginData, LoginFields};
use serde::Deserialize;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const BROWSER_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
<html><head><title>SAML Response for Snowflake</title></head>\
<body>Your identity was confirmed and propagated to Snowflake. You can close this window.</body></html>";

#[derive(Debug)]
pub struct BrowserAuthenticator;

/// A loopback listener bound to an ephemeral port on 127.0.0.1.
pub(crate) struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    pub(crate) async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(Error::authentication)?;
        let port = listener.local_addr().map_err(Error::authentication)?.port();
        Ok(Self { listener, port })
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Accepts one connection and returns the callback's query parameters.
    pub(crate) async fn receive(self) -> Result<HashMap<String, String>> {
        let (mut stream, _) = self.listener.accept().await.map_err(Error::authentication)?;
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.map_err(Error::authentication)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let params = parse_callback(&buf)?;
        stream
            .write_all(BROWSER_RESPONSE.as_bytes())
            .await
            .map_err(Error::authentication)?;
        let _ = stream.shutdown().await;
        Ok(params)
    }
}

/// Extracts query parameters from the request line of the callback.
fn parse_callback(request: &[u8]) -> Result<HashMap<String, String>> {
    let text = String::from_utf8_lossy(request);
    let request_line = text
        .lines()
        .next()
        .ok_or_else(|| Error::authentication("empty browser callback"))?;
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::authentication("malformed browser callback request line"))?;
    let url = url::Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(Error::authentication)?;
    Ok(url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect())
}

/// Rejects IdP URLs that could not have come from the configured account.
fn validate_sso_url(sso_url: &str, config: &AuthConfig) -> Result<()> {
    if config.disable_saml_url_check {
        return Ok(());
    }
    let url = url::Url::parse(sso_url).map_err(Error::authentication)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::authentication(format!(
            "IdP URL has unexpected scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::authentication("IdP URL has no host"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticatorResponseData {
    sso_url: String,
    #[serde(default)]
    proof_key: Option<String>,
}

/// Asks the server for the IdP's SSO URL and the proof key.
async fn request_sso_url(
    transport: &Transport,
    config: &AuthConfig,
    port: u16,
    cancel: &CancellationToken,
) -> Result<(String, Option<String>)> {
    let mut url = url::Url::parse(&config.base_url())
        .and_then(|u| u.join(login::AUTHENTICATOR_REQUEST_PATH))
        .map_err(Error::config)?;
    url.query_pairs_mut()
        .append_pair("requestId", &uuid::Uuid::new_v4().to_string())
        .append_pair("request_guid", &uuid::Uuid::new_v4().to_string());

    let body = serde_json::json!({
        "data": {
            "CLIENT_APP_ID": login::CLIENT_APP_ID,
            "CLIENT_APP_VERSION": login::CLIENT_APP_VERSION,
            "ACCOUNT_NAME": config.account,
            "LOGIN_NAME": config.user,
            "AUTHENTICATOR": "EXTERNALBROWSER",
            "BROWSER_MODE_REDIRECT_PORT": port.to_string(),
        }
    });
    let builder = login::standard_headers(transport.client().post(url.to_string())).json(&body);
    let options = RequestOptions::new().with_attempt_timeout(config.login_timeout);
    let response: AuthResponse<AuthenticatorResponseData> =
        transport.execute_json(builder, &options, cancel).await?;
    if !response.success {
        return Err(login::auth_failure(response.code, response.message));
    }
    let data = response
        .data
        .ok_or_else(|| Error::authentication("authenticator response carried no data"))?;
    Ok((data.sso_url, data.proof_key))
}

/// The console login URL used when the deployment supports it.
fn console_login_url(config: &AuthConfig, port: u16) -> Result<String> {
    let mut url = url::Url::parse(&config.base_url())
        .and_then(|u| u.join("/console/login"))
        .map_err(Error::config)?;
    url.query_pairs_mut()
        .append_pair("login_name", &config.user)
        .append_pair("browser_mode_redirect_port", &port.to_string());
    Ok(url.to_string())
}

async fn browser_flow(
    transport: &Transport,
    config: &AuthConfig,
    cancel: &CancellationToken,
) -> Result<LoginData> {
    let listener = CallbackListener::bind().await?;
    let port = listener.port();

    let (sso_url, proof_key) = if config.disable_console_login {
        request_sso_url(transport, config, port, cancel).await?
    } else {
        (console_login_url(config, port)?, None)
    };
    validate_sso_url(&sso_url, config)?;

    webbrowser::open(&sso_url).map_err(Error::authentication)?;
    tracing::debug!(port, "waiting for identity provider callback");

    let params = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::cancelled()),
        result = tokio::time::timeout(config.external_browser_timeout, listener.receive()) => {
            result.map_err(|_| {
                Error::authentication("timed out waiting for the identity provider callback")
            })??
        }
    };
    let token = params
        .get("token")
        .ok_or_else(|| Error::authentication("browser callback carried no token"))?;

    let mut session_parameters = HashMap::new();
    if config.client_store_temporary_credential {
        session_parameters.insert(
            "CLIENT_STORE_TEMPORARY_CREDENTIAL".to_string(),
            serde_json::Value::Bool(true),
        );
    }
    let fields = LoginFields {
        authenticator: Some("EXTERNALBROWSER".to_string()),
        token: Some(token.clone()),
        proof_key,
        ..LoginFields::default()
    };
    let data = login::post_login(transport, config, fields, session_parameters, cancel).await?;
    if config.client_store_temporary_credential {
        if let Some(id_token) = &data.id_token {
            cache::store(&config.host, &config.user, CredentialKind::IdToken, id_token);
        }
    }
    Ok(data)
}

async fn id_token_flow(
    transport: &Transport,
    config: &AuthConfig,
    id_token: String,
    cancel: &CancellationToken,
) -> Result<LoginData> {
    let fields = LoginFields {
        authenticator: Some("ID_TOKEN".to_string()),
        token: Some(id_token),
        ..LoginFields::default()
    };
    login::post_login(transport, config, fields, HashMap::new(), cancel).await
}

#[async_trait::async_trait]
impl Authenticator for BrowserAuthenticator {
    async fn login(
        &self,
        transport: &Transport,
        config: &AuthConfig,
        cancel: &CancellationToken,
    ) -> Result<LoginData> {
        if config.client_store_temporary_credential {
            if let Some(id_token) = cache::get(&config.host, &config.user, CredentialKind::IdToken)
            {
                match id_token_flow(transport, config, id_token, cancel).await {
                    Ok(data) => return Ok(data),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        tracing::debug!(error = %e, "cached ID token rejected, opening browser");
                        cache::delete(&config.host, &config.user, CredentialKind::IdToken);
                    }
                }
            }
        }
        browser_flow(transport, config, cancel).await
    }
}
