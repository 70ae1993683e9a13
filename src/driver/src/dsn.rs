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

//! DSN parsing.
//!
//! The DSN shape is `USER[:PASSWORD]@TARGET[:PORT][/DB[/SCHEMA]]?param=value&…`
//! where `TARGET` is an account name or a full host (anything containing a
//! dot is a host). Query parameter names accept both camelCase and
//! snake_case spellings.

use crate::config::Config;
use snowflake_auth::config::Secret;
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::time::Duration;

/// Parses a DSN into a finalized [Config].
pub fn parse(dsn: &str) -> Result<Config> {
    let (credentials, rest) = dsn
        .rsplit_once('@')
        .ok_or_else(|| Error::config("DSN carries no '@' separator"))?;

    let mut config = Config::default();
    match credentials.split_once(':') {
        Some((user, password)) => {
            config.user = decode(user)?;
            config.password = Secret::from(decode(password)?);
        }
        None => config.user = decode(credentials)?,
    }

    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };

    let mut segments = location.splitn(3, '/');
    let target = segments.next().unwrap_or_default();
    if target.is_empty() {
        return Err(Error::config("DSN carries no account or host"));
    }
    let (target, port) = match target.rsplit_once(':') {
        Some((host, port)) => (
            host,
            Some(
                port.parse::<u16>()
                    .map_err(|_| Error::config(format!("invalid port: {port}")))?,
            ),
        ),
        None => (target, None),
    };
    if target.contains('.') {
        config.host = target.to_string();
    } else {
        config.account = target.to_string();
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(database) = segments.next().filter(|s| !s.is_empty()) {
        config.database = Some(decode(database)?);
    }
    if let Some(schema) = segments.next().filter(|s| !s.is_empty()) {
        config.schema = Some(decode(schema)?);
    }

    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = match pair.split_once('=') {
                Some((name, value)) => (name, decode(value)?),
                None => (pair, String::new()),
            };
            apply_parameter(&mut config, name, &value)?;
        }
    }
    config.finalize()
}

/// Query-style decoding: percent escapes plus `+` as space.
fn decode(s: &str) -> Result<String> {
    let with_spaces = s.replace('+', " ");
    percent_encoding::percent_decode_str(&with_spaces)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| Error::config(format!("invalid percent-encoding in {s:?}")))
}

/// Parameter names are matched with underscores stripped, accepting both
/// camelCase and snake_case spellings.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::config(format!("invalid boolean for {name}: {other}"))),
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| Error::config(format!("invalid duration for {name}: {value}")))
}

pub(crate) fn apply_parameter(config: &mut Config, name: &str, value: &str) -> Result<()> {
    match normalize(name).as_str() {
        "account" => config.account = value.to_string(),
        "user" => config.user = value.to_string(),
        "password" => config.password = Secret::from(value),
        "database" | "db" => config.database = Some(value.to_string()),
        "schema" => config.schema = Some(value.to_string()),
        "warehouse" => config.warehouse = Some(value.to_string()),
        "role" => config.role = Some(value.to_string()),
        "region" => config.region = Some(value.to_string()),
        "protocol" => config.protocol = value.to_string(),
        "host" => config.host = value.to_string(),
        "port" => {
            config.port = value
                .parse()
                .map_err(|_| Error::config(format!("invalid port: {value}")))?;
        }
        "timezone" => config.timezone = Some(value.to_string()),
        "application" => config.application = Some(value.to_string()),
        "authenticator" => config.authenticator = value.parse()?,
        "token" => config.token = Some(Secret::from(value)),
        "privatekey" => config.private_key = Some(Secret::from(value)),
        "passcode" => config.passcode = Some(Secret::from(value)),
        "passcodeinpassword" => config.passcode_in_password = parse_bool(name, value)?,
        "logintimeout" => config.login_timeout = parse_seconds(name, value)?,
        "requesttimeout" => config.request_timeout = parse_seconds(name, value)?,
        "clienttimeout" => config.client_timeout = parse_seconds(name, value)?,
        "jwtclienttimeout" => config.jwt_timeout = parse_seconds(name, value)?,
        "externalbrowsertimeout" => config.external_browser_timeout = parse_seconds(name, value)?,
        "maxretrycount" => {
            config.max_retry_count = value
                .parse()
                .map_err(|_| Error::config(format!("invalid maxRetryCount: {value}")))?;
        }
        "ocspfailopen" => config.ocsp_fail_open = parse_bool(name, value)?,
        "insecuremode" => config.insecure_mode = parse_bool(name, value)?,
        "disableocspchecks" => config.disable_ocsp_checks = parse_bool(name, value)?,
        "clientsessionkeepalive" => config.client_session_keep_alive = parse_bool(name, value)?,
        "clientrequestmfatoken" => config.client_request_mfa_token = parse_bool(name, value)?,
        "clientstoretemporarycredential" => {
            config.client_store_temporary_credential = parse_bool(name, value)?;
        }
        "disablequerycontextcache" => config.disable_query_context_cache = parse_bool(name, value)?,
        "includeretryreason" => config.include_retry_reason = parse_bool(name, value)?,
        "disableconsolelogin" => config.disable_console_login = parse_bool(name, value)?,
        "disablesamlurlcheck" => config.disable_saml_url_check = parse_bool(name, value)?,
        "tmpdirpath" => config.tmp_dir_path = Some(value.to_string()),
        "clientconfigfile" => config.client_config_file = Some(value.to_string()),
        "oauthauthorizationurl" => config.oauth.authorization_url = Some(value.to_string()),
        "oauthtokenrequesturl" => config.oauth.token_request_url = Some(value.to_string()),
        "oauthclientid" => config.oauth.client_id = Some(value.to_string()),
        "oauthclientsecret" => config.oauth.client_secret = Some(Secret::from(value)),
        "oauthredirecturi" => config.oauth.redirect_uri = Some(value.to_string()),
        "oauthscope" => config.oauth.scope = Some(value.to_string()),
        "workloadidentityprovider" => config.workload.provider = Some(value.parse()?),
        "workloadidentityentraresource" => {
            config.workload.entra_resource = Some(value.to_string());
        }
        other => {
            return Err(Error::config(format!("unknown DSN parameter: {other}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowflake_auth::config::{AuthKind, WorkloadProvider};
    use test_case::test_case;

    #[test]
    fn account_form() {
        let config = parse("jsmith:hunter2@acme/testdb/public?warehouse=COMPUTE_WH").unwrap();
        assert_eq!(config.user, "jsmith");
        assert_eq!(config.password.as_str(), "hunter2");
        assert_eq!(config.account, "acme");
        assert_eq!(config.host, "acme.snowflakecomputing.com");
        assert_eq!(config.database.as_deref(), Some("testdb"));
        assert_eq!(config.schema.as_deref(), Some("public"));
        assert_eq!(config.warehouse.as_deref(), Some("COMPUTE_WH"));
    }

    #[test]
    fn host_form_requires_account_parameter() {
        let config = parse(
            "jsmith:pw@acme.eu-central-1.snowflakecomputing.com:443/db/sc?account=acme&protocol=https",
        )
        .unwrap();
        assert_eq!(config.host, "acme.eu-central-1.snowflakecomputing.com");
        assert_eq!(config.port, 443);
        assert_eq!(config.account, "acme");
    }

    #[test]
    fn password_is_optional() {
        let config = parse("jsmith@acme?authenticator=externalbrowser").unwrap();
        assert!(config.password.is_empty());
        assert_eq!(config.authenticator, AuthKind::ExternalBrowser);
    }

    #[test]
    fn percent_encoding_in_credentials() {
        let config = parse("jsmith:p%40ss+word@acme").unwrap();
        assert_eq!(config.password.as_str(), "p@ss word");
    }

    #[test_case("loginTimeout=60"; "camel case")]
    #[test_case("login_timeout=60"; "snake case")]
    fn timeout_aliases(param: &str) {
        let config = parse(&format!("jsmith:pw@acme?{param}")).unwrap();
        assert_eq!(config.login_timeout, Duration::from_secs(60));
    }

    #[test]
    fn workload_identity_parameters() {
        let config = parse(
            "@acme?authenticator=workload_identity&workload_identity_provider=azure&workload_identity_entra_resource=api://custom",
        );
        // An empty user is allowed for workload identity.
        let config = config.unwrap();
        assert_eq!(config.authenticator, AuthKind::WorkloadIdentity);
        assert_eq!(config.workload.provider, Some(WorkloadProvider::Azure));
        assert_eq!(config.workload.entra_resource.as_deref(), Some("api://custom"));
    }

    #[test]
    fn boolean_parameters() {
        let config =
            parse("jsmith:pw@acme?clientSessionKeepAlive=true&insecure_mode=false").unwrap();
        assert!(config.client_session_keep_alive);
        assert!(!config.insecure_mode);
    }

    #[test_case("jsmith:pw"; "no at sign")]
    #[test_case("jsmith:pw@"; "no target")]
    #[test_case("jsmith:pw@acme?port=notaport"; "bad port")]
    #[test_case("jsmith:pw@acme?loginTimeout=abc"; "bad timeout")]
    #[test_case("jsmith:pw@acme?no_such_parameter=1"; "unknown parameter")]
    #[test_case("jsmith:pw@acme?authenticator=KERBEROS"; "unknown authenticator")]
    fn rejects_malformed_dsn(dsn: &str) {
        let err = parse(dsn).expect_err("must fail");
        assert_eq!(err.kind(), snowflake_core::error::ErrorKind::Config);
    }

    #[test]
    fn oauth_parameters() {
        let config = parse(
            "jsmith@acme?authenticator=oauth_authorization_code&oauthClientId=c1&oauth_client_secret=s1&oauthScope=session:role:ANALYST",
        )
        .unwrap();
        assert_eq!(config.authenticator, AuthKind::OAuthAuthorizationCode);
        assert_eq!(config.oauth.client_id.as_deref(), Some("c1"));
        assert_eq!(config.oauth.scope.as_deref(), Some("session:role:ANALYST"));
    }
}
