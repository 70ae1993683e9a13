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

//! Username/password authentication, with MFA passcodes and token caching.
//!
//! MFA interaction, in order of preference: a cached MFA token (when
//! `clientRequestMfaToken` is set and a prior login stored one), an explicit
//! `passcode`, or a passcode embedded in the password
//! (`passcodeInPassword`). A cached token the server rejects is deleted and
//! the login retried once without it.

use crate::authenticator::Authenticator;
use crate::cache::{self, CredentialKind};
use crate::config::AuthConfig;
use crate::login::{self, LoginData, LoginFields};
use snowflake_core::Result;
use snowflake_core::error::{Error, ServerError};
use snowflake_core::http::Transport;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

// The server rejects a stale MFA token with this code.
const MFA_TOKEN_INVALID: i32 = 390129;

#[derive(Debug)]
pub struct PasswordAuthenticator;

impl PasswordAuthenticator {
    fn fields(config: &AuthConfig, cached_mfa_token: Option<String>) -> LoginFields {
        let mut fields = LoginFields {
            password: Some(config.password.as_str().to_string()),
            ..LoginFields::default()
        };
        if let Some(token) = cached_mfa_token {
            fields.token = Some(token);
            fields.authenticator = Some("USERNAME_PASSWORD_MFA".to_string());
            return fields;
        }
        if config.passcode_in_password {
            fields.ext_authn_duo_method = Some("passcode".to_string());
        } else if let Some(passcode) = &config.passcode {
            fields.passcode = Some(passcode.as_str().to_string());
            fields.ext_authn_duo_method = Some("passcode".to_string());
        }
        if config.client_request_mfa_token {
            fields.authenticator = Some("USERNAME_PASSWORD_MFA".to_string());
        }
        fields
    }

    fn session_parameters(config: &AuthConfig) -> HashMap<String, serde_json::Value> {
        let mut parameters = HashMap::new();
        if config.client_request_mfa_token {
            parameters.insert(
                "CLIENT_REQUEST_MFA_TOKEN".to_string(),
                serde_json::Value::Bool(true),
            );
        }
        parameters
    }
}

#[async_trait::async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn login(
        &self,
        transport: &Transport,
        config: &AuthConfig,
        cancel: &CancellationToken,
    ) -> Result<LoginData> {
        if config.password.is_empty() {
            return Err(Error::config("password authentication requires a password"));
        }
        let cached = config
            .client_request_mfa_token
            .then(|| cache::get(&config.host, &config.user, CredentialKind::MfaToken))
            .flatten();
        let used_cached = cached.is_some();

        let result = login::post_login(
            transport,
            config,
            Self::fields(config, cached),
            Self::session_parameters(config),
            cancel,
        )
        .await;

        let data = match result {
            Ok(data) => data,
            Err(e) if used_cached && is_mfa_token_invalid(&e) => {
                cache::delete(&config.host, &config.user, CredentialKind::MfaToken);
                login::post_login(
                    transport,
                    config,
                    Self::fields(config, None),
                    Self::session_parameters(config),
                    cancel,
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        if config.client_request_mfa_token {
            if let Some(mfa_token) = &data.mfa_token {
                cache::store(&config.host, &config.user, CredentialKind::MfaToken, mfa_token);
            }
        }
        Ok(data)
    }
}

fn is_mfa_token_invalid(error: &Error) -> bool {
    error
        .as_inner::<ServerError>()
        .is_some_and(|e| e.code() == MFA_TOKEN_INVALID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;

    fn test_config(server: &Server) -> AuthConfig {
        let url = server.url("/");
        AuthConfig {
            account: "acme".to_string(),
            user: "jsmith".to_string(),
            password: crate::config::Secret::from("hunter2"),
            scheme: url.scheme().unwrap().to_string(),
            host: url.authority().unwrap().host().to_string(),
            port: url.authority().unwrap().port_u16().unwrap(),
            ..AuthConfig::default()
        }
    }

    fn success_body() -> serde_json::Value {
        json!({
            "data": {
                "token": "session-token",
                "masterToken": "master-token",
                "sessionId": 11,
                "mfaToken": "issued-mfa-token",
            },
            "success": true,
        })
    }

    #[tokio::test]
    async fn plain_password_login() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", login::LOGIN_REQUEST_PATH),
                request::body(json_decoded(
                    |body: &serde_json::Value| body["data"]["PASSWORD"] == json!("hunter2")
                )),
            ])
            .respond_with(json_encoded(success_body())),
        );
        let transport = Transport::builder().build()?;
        let config = test_config(&server);
        let data = PasswordAuthenticator
            .login(&transport, &config, &CancellationToken::new())
            .await?;
        assert_eq!(data.session_token, "session-token");
        Ok(())
    }

    #[tokio::test]
    async fn passcode_sets_duo_method() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::body(json_decoded(|body: &serde_json::Value| {
                body["data"]["PASSCODE"] == json!("123456")
                    && body["data"]["EXT_AUTHN_DUO_METHOD"] == json!("passcode")
            })))
            .respond_with(json_encoded(success_body())),
        );
        let transport = Transport::builder().build()?;
        let config = AuthConfig {
            passcode: Some(crate::config::Secret::from("123456")),
            ..test_config(&server)
        };
        PasswordAuthenticator
            .login(&transport, &config, &CancellationToken::new())
            .await?;
        Ok(())
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn rejected_cached_mfa_token_is_dropped_and_login_retried() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let _env = scoped_env::ScopedEnv::set(cache::CACHE_DIR_ENV, dir.path().to_str().unwrap());

        let server = Server::run();
        let config = AuthConfig {
            client_request_mfa_token: true,
            ..test_config(&server)
        };
        cache::store(&config.host, &config.user, CredentialKind::MfaToken, "stale");

        server.expect(
            Expectation::matching(request::body(json_decoded(|body: &serde_json::Value| {
                body["data"]["TOKEN"] == json!("stale")
            })))
            .times(1)
            .respond_with(json_encoded(json!({
                "data": null,
                "success": false,
                "code": "390129",
                "message": "MFA token is invalid."
            }))),
        );
        server.expect(
            Expectation::matching(request::body(json_decoded(|body: &serde_json::Value| {
                body["data"]["TOKEN"].is_null()
            })))
            .times(1)
            .respond_with(json_encoded(success_body())),
        );

        let transport = Transport::builder().build()?;
        let data = PasswordAuthenticator
            .login(&transport, &config, &CancellationToken::new())
            .await?;
        assert_eq!(data.session_token, "session-token");
        // The freshly issued token replaced the stale one.
        assert_eq!(
            cache::get(&config.host, &config.user, CredentialKind::MfaToken).as_deref(),
            Some("issued-mfa-token")
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_password_is_config_error() -> anyhow::Result<()> {
        let server = Server::run();
        let config = AuthConfig {
            password: crate::config::Secret::default(),
            ..test_config(&server)
        };
        let transport = Transport::builder().build()?;
        let err = PasswordAuthenticator
            .login(&transport, &config, &CancellationToken::new())
            .await
            .expect_err("must fail");
        assert_eq!(err.kind(), snowflake_core::error::ErrorKind::Config);
        Ok(())
    }
}
