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

//! Driver configuration.
//!
//! A [Config] is immutable once a session is created from it. It is built
//! from a DSN ([Config::from_dsn]), from the TOML connection file
//! ([crate::config_file]), or field by field.

use snowflake_auth::config::{AuthConfig, AuthKind, OAuthOptions, Secret, WorkloadOptions};
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::time::Duration;

/// The default port for Snowflake deployments.
pub const DEFAULT_PORT: u16 = 443;

/// The domain appended to bare account names.
pub const DEFAULT_DOMAIN: &str = "snowflakecomputing.com";

/// Driver configuration; immutable after session creation.
#[derive(Clone, Debug)]
pub struct Config {
    pub account: String,
    pub user: String,
    pub password: Secret,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    pub region: Option<String>,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub application: Option<String>,
    pub timezone: Option<String>,

    pub authenticator: AuthKind,
    pub token: Option<Secret>,
    pub private_key: Option<Secret>,
    pub passcode: Option<Secret>,
    pub passcode_in_password: bool,
    pub client_request_mfa_token: bool,
    pub client_store_temporary_credential: bool,
    pub disable_console_login: bool,
    pub disable_saml_url_check: bool,
    pub oauth: OAuthOptions,
    pub workload: WorkloadOptions,

    pub login_timeout: Duration,
    pub request_timeout: Duration,
    pub client_timeout: Duration,
    pub jwt_timeout: Duration,
    pub external_browser_timeout: Duration,
    pub max_retry_count: u32,

    pub insecure_mode: bool,
    pub ocsp_fail_open: bool,
    pub disable_ocsp_checks: bool,
    pub client_session_keep_alive: bool,
    pub disable_query_context_cache: bool,
    pub include_retry_reason: bool,
    pub tmp_dir_path: Option<String>,
    pub client_config_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: String::new(),
            user: String::new(),
            password: Secret::default(),
            database: None,
            schema: None,
            warehouse: None,
            role: None,
            region: None,
            protocol: "https".to_string(),
            host: String::new(),
            port: DEFAULT_PORT,
            application: None,
            timezone: None,
            authenticator: AuthKind::default(),
            token: None,
            private_key: None,
            passcode: None,
            passcode_in_password: false,
            client_request_mfa_token: false,
            client_store_temporary_credential: false,
            disable_console_login: false,
            disable_saml_url_check: false,
            oauth: OAuthOptions::default(),
            workload: WorkloadOptions::default(),
            login_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(0),
            client_timeout: Duration::from_secs(900),
            jwt_timeout: Duration::from_secs(60),
            external_browser_timeout: Duration::from_secs(120),
            max_retry_count: snowflake_core::http::DEFAULT_MAX_RETRY_COUNT,
            insecure_mode: false,
            ocsp_fail_open: true,
            disable_ocsp_checks: false,
            client_session_keep_alive: false,
            disable_query_context_cache: false,
            include_retry_reason: true,
            tmp_dir_path: None,
            client_config_file: None,
        }
    }
}

impl Config {
    /// Parses a DSN; see [crate::dsn].
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        crate::dsn::parse(dsn)
    }

    /// Fills derived fields and validates the result.
    ///
    /// The host defaults to `<account>.<region>.snowflakecomputing.com`; a
    /// region embedded in the account name (`acct.us-east-1`) is split off
    /// first.
    pub fn finalize(mut self) -> Result<Self> {
        if self.account.is_empty() {
            return Err(Error::config("account is required"));
        }
        if self.user.is_empty() && self.authenticator != AuthKind::WorkloadIdentity {
            return Err(Error::config("user is required"));
        }
        if let Some((account, region)) = self.account.split_once('.') {
            if self.region.is_none() {
                self.region = Some(region.to_string());
            }
            self.account = account.to_string();
        }
        if self.host.is_empty() {
            self.host = match &self.region {
                Some(region) if !region.is_empty() && region != "us-west-2" => {
                    format!("{}.{}.{}", self.account, region, DEFAULT_DOMAIN)
                }
                _ => format!("{}.{}", self.account, DEFAULT_DOMAIN),
            };
        }
        if !matches!(self.protocol.as_str(), "http" | "https") {
            return Err(Error::config(format!(
                "unknown protocol: {}",
                self.protocol
            )));
        }
        match self.authenticator {
            AuthKind::KeyPair if self.private_key.is_none() => {
                return Err(Error::config(
                    "authenticator SNOWFLAKE_JWT requires a private key",
                ));
            }
            AuthKind::OAuth if self.token.is_none() && self.oauth.token.is_none() => {
                return Err(Error::config("authenticator OAUTH requires a token"));
            }
            _ => {}
        }
        Ok(self)
    }

    /// The timeout applied to a query without a caller timeout.
    pub fn effective_request_timeout(&self) -> Option<Duration> {
        if self.request_timeout.is_zero() {
            None
        } else {
            Some(self.request_timeout)
        }
    }

    /// The slice of configuration the authenticators consume.
    pub fn auth_config(&self) -> AuthConfig {
        let mut oauth = self.oauth.clone();
        if oauth.token.is_none() {
            oauth.token = self.token.clone();
        }
        AuthConfig {
            account: self.account.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            scheme: self.protocol.clone(),
            host: self.host.clone(),
            port: self.port,
            application: self
                .application
                .clone()
                .unwrap_or_else(|| snowflake_auth::login::CLIENT_APP_ID.to_string()),
            authenticator: self.authenticator.clone(),
            passcode: self.passcode.clone(),
            passcode_in_password: self.passcode_in_password,
            client_request_mfa_token: self.client_request_mfa_token,
            client_store_temporary_credential: self.client_store_temporary_credential,
            private_key: self.private_key.clone(),
            jwt_timeout: self.jwt_timeout,
            login_timeout: self.login_timeout,
            external_browser_timeout: self.external_browser_timeout,
            disable_console_login: self.disable_console_login,
            disable_saml_url_check: self.disable_saml_url_check,
            oauth,
            workload: self.workload.clone(),
            database: self.database.clone(),
            schema: self.schema.clone(),
            warehouse: self.warehouse.clone(),
            role: self.role.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_derives_host() {
        let config = Config {
            account: "acme".to_string(),
            user: "jsmith".to_string(),
            ..Config::default()
        };
        let config = config.finalize().unwrap();
        assert_eq!(config.host, "acme.snowflakecomputing.com");

        let config = Config {
            account: "acme".to_string(),
            user: "jsmith".to_string(),
            region: Some("eu-central-1".to_string()),
            ..Config::default()
        };
        let config = config.finalize().unwrap();
        assert_eq!(config.host, "acme.eu-central-1.snowflakecomputing.com");
    }

    #[test]
    fn finalize_splits_region_from_account() {
        let config = Config {
            account: "acme.us-east-1".to_string(),
            user: "jsmith".to_string(),
            ..Config::default()
        };
        let config = config.finalize().unwrap();
        assert_eq!(config.account, "acme");
        assert_eq!(config.region.as_deref(), Some("us-east-1"));
        assert_eq!(config.host, "acme.us-east-1.snowflakecomputing.com");
    }

    #[test]
    fn finalize_requires_account_and_user() {
        assert!(Config::default().finalize().is_err());
        let config = Config {
            account: "acme".to_string(),
            ..Config::default()
        };
        assert!(config.finalize().is_err());
    }

    #[test]
    fn finalize_checks_authenticator_prerequisites() {
        let config = Config {
            account: "acme".to_string(),
            user: "jsmith".to_string(),
            authenticator: AuthKind::KeyPair,
            ..Config::default()
        };
        assert!(config.finalize().is_err());

        let config = Config {
            account: "acme".to_string(),
            user: "jsmith".to_string(),
            authenticator: AuthKind::OAuth,
            ..Config::default()
        };
        assert!(config.finalize().is_err());
    }

    #[test]
    fn request_timeout_zero_means_none() {
        let config = Config::default();
        assert_eq!(config.effective_request_timeout(), None);
        let config = Config {
            request_timeout: Duration::from_secs(30),
            ..Config::default()
        };
        assert_eq!(
            config.effective_request_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn auth_config_inherits_token() {
        let config = Config {
            account: "acme".to_string(),
            user: "jsmith".to_string(),
            token: Some(Secret::from("bearer")),
            ..Config::default()
        };
        let auth = config.auth_config();
        assert_eq!(auth.oauth.token.as_ref().map(|t| t.as_str()), Some("bearer"));
    }
}
