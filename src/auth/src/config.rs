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

//! The slice of driver configuration the authenticators consume.
//!
//! The driver crate owns DSN and TOML parsing; it builds an [AuthConfig]
//! from the full configuration before opening a session.

use snowflake_core::error::Error;
use std::time::Duration;

/// The authenticator variant selected by the `authenticator` parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthKind {
    /// Username and password, optionally with an MFA passcode.
    #[default]
    Password,
    /// Key-pair authentication with a client-signed JWT.
    KeyPair,
    /// OAuth with a caller-supplied bearer token.
    OAuth,
    /// OAuth authorization-code flow through the system browser.
    OAuthAuthorizationCode,
    /// SAML through the system browser and a loopback listener.
    ExternalBrowser,
    /// Workload identity federation.
    WorkloadIdentity,
}

impl std::str::FromStr for AuthKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "SNOWFLAKE" => Ok(AuthKind::Password),
            "SNOWFLAKE_JWT" => Ok(AuthKind::KeyPair),
            "OAUTH" => Ok(AuthKind::OAuth),
            "OAUTH_AUTHORIZATION_CODE" => Ok(AuthKind::OAuthAuthorizationCode),
            "EXTERNALBROWSER" => Ok(AuthKind::ExternalBrowser),
            "WORKLOAD_IDENTITY" => Ok(AuthKind::WorkloadIdentity),
            other => Err(Error::config(format!("unknown authenticator: {other}"))),
        }
    }
}

/// The workload identity provider named by `workloadIdentityProvider`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadProvider {
    Aws,
    Gcp,
    Azure,
    Oidc,
}

impl std::str::FromStr for WorkloadProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AWS" => Ok(WorkloadProvider::Aws),
            "GCP" => Ok(WorkloadProvider::Gcp),
            "AZURE" => Ok(WorkloadProvider::Azure),
            "OIDC" => Ok(WorkloadProvider::Oidc),
            other => Err(Error::config(format!(
                "unknown workload identity provider: {other}"
            ))),
        }
    }
}

/// A secret that never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(pub String);

impl Secret {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(s)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret(s.to_string())
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[censored]")
    }
}

/// OAuth parameters, used by both OAuth variants.
#[derive(Clone, Debug, Default)]
pub struct OAuthOptions {
    /// A ready-to-use bearer token, for [AuthKind::OAuth].
    pub token: Option<Secret>,
    pub authorization_url: Option<String>,
    pub token_request_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
}

/// Workload identity parameters.
#[derive(Clone, Debug, Default)]
pub struct WorkloadOptions {
    pub provider: Option<WorkloadProvider>,
    /// The Entra resource for Azure attestation tokens.
    pub entra_resource: Option<String>,
    /// A caller-supplied token for the OIDC provider.
    pub token: Option<Secret>,
}

/// Configuration consumed by the authenticators.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub account: String,
    pub user: String,
    pub password: Secret,
    /// Scheme, host, and port of the Snowflake deployment.
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub application: String,
    pub authenticator: AuthKind,
    pub passcode: Option<Secret>,
    pub passcode_in_password: bool,
    pub client_request_mfa_token: bool,
    pub client_store_temporary_credential: bool,
    /// PEM-encoded PKCS#8 RSA private key, for [AuthKind::KeyPair].
    pub private_key: Option<Secret>,
    pub jwt_timeout: Duration,
    pub login_timeout: Duration,
    pub external_browser_timeout: Duration,
    pub disable_console_login: bool,
    pub disable_saml_url_check: bool,
    pub oauth: OAuthOptions,
    pub workload: WorkloadOptions,
    /// Initial session context echoed on the login URL.
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            user: String::new(),
            password: Secret::default(),
            scheme: "https".to_string(),
            host: String::new(),
            port: 443,
            application: crate::login::CLIENT_APP_ID.to_string(),
            authenticator: AuthKind::default(),
            passcode: None,
            passcode_in_password: false,
            client_request_mfa_token: false,
            client_store_temporary_credential: false,
            private_key: None,
            jwt_timeout: Duration::from_secs(60),
            login_timeout: Duration::from_secs(300),
            external_browser_timeout: Duration::from_secs(120),
            disable_console_login: false,
            disable_saml_url_check: false,
            oauth: OAuthOptions::default(),
            workload: WorkloadOptions::default(),
            database: None,
            schema: None,
            warehouse: None,
            role: None,
        }
    }
}

impl AuthConfig {
    /// The origin used for all session endpoints.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("snowflake", AuthKind::Password)]
    #[test_case("SNOWFLAKE_JWT", AuthKind::KeyPair)]
    #[test_case("oauth", AuthKind::OAuth)]
    #[test_case("Oauth_Authorization_Code", AuthKind::OAuthAuthorizationCode)]
    #[test_case("externalbrowser", AuthKind::ExternalBrowser)]
    #[test_case("WORKLOAD_IDENTITY", AuthKind::WorkloadIdentity)]
    fn auth_kind_parses(input: &str, want: AuthKind) {
        assert_eq!(input.parse::<AuthKind>().unwrap(), want);
    }

    #[test]
    fn auth_kind_rejects_unknown() {
        let err = "KERBEROS".parse::<AuthKind>().unwrap_err();
        assert!(format!("{err}").contains("unknown authenticator"));
    }

    #[test_case("aws", WorkloadProvider::Aws)]
    #[test_case("GCP", WorkloadProvider::Gcp)]
    #[test_case("Azure", WorkloadProvider::Azure)]
    #[test_case("OIDC", WorkloadProvider::Oidc)]
    fn workload_provider_parses(input: &str, want: WorkloadProvider) {
        assert_eq!(input.parse::<WorkloadProvider>().unwrap(), want);
    }

    #[test]
    fn workload_provider_rejects_unknown() {
        assert!("DIGITALOCEAN".parse::<WorkloadProvider>().is_err());
    }

    #[test]
    fn secrets_never_debug_print() {
        let config = AuthConfig {
            password: Secret::from("hunter2"),
            ..AuthConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"), "{debug}");
    }

    #[test]
    fn base_url_includes_port() {
        let config = AuthConfig {
            host: "acme.snowflakecomputing.com".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(config.base_url(), "https://acme.snowflakecomputing.com:443");
    }
}
