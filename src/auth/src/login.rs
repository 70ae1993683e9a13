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

//! The login wire call shared by every authenticator.
//!
//! Authenticators differ only in how they fill the authentication fields of
//! the login payload; the POST to `/session/v1/login-request`, the response
//! envelope, and the error mapping are common and live here.

use crate::config::AuthConfig;
use serde::{Deserialize, Serialize};
use snowflake_core::Result;
use snowflake_core::error::{Error, ServerError};
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub const CLIENT_APP_ID: &str = "SnowflakeRustDriver";
pub const CLIENT_APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const LOGIN_REQUEST_PATH: &str = "/session/v1/login-request";
pub const TOKEN_REQUEST_PATH: &str = "/session/token-request";
pub const AUTHENTICATOR_REQUEST_PATH: &str = "/session/authenticator-request";

/// Formats the `Authorization` header for an issued token.
pub fn auth_header(token: &str) -> String {
    format!("Snowflake Token=\"{token}\"")
}

/// The standard headers carried by every request to the Snowflake service.
pub fn standard_headers(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    builder
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::ACCEPT, "application/snowflake")
        .header(
            http::header::USER_AGENT,
            format!("{CLIENT_APP_ID}/{CLIENT_APP_VERSION}"),
        )
}

/// The client environment reported on login.
#[derive(Clone, Debug, Serialize)]
pub struct ClientEnvironment {
    #[serde(rename = "APPLICATION")]
    pub application: String,
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "OS_VERSION")]
    pub os_version: String,
    #[serde(rename = "OCSP_MODE")]
    pub ocsp_mode: String,
}

impl ClientEnvironment {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            application: config.application.clone(),
            os: std::env::consts::OS.to_string(),
            os_version: sysinfo::System::os_version()
                .unwrap_or_else(|| "unknown".to_string()),
            ocsp_mode: "FAIL_OPEN".to_string(),
        }
    }
}

/// The authentication fields of a login payload.
///
/// Each authenticator fills the subset it needs and leaves the rest `None`;
/// `None` fields are omitted from the JSON body. No `Debug`: most of these
/// fields are secrets.
#[derive(Clone, Default, Serialize)]
pub struct LoginFields {
    #[serde(rename = "PASSWORD", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "AUTHENTICATOR", skip_serializing_if = "Option::is_none")]
    pub authenticator: Option<String>,
    #[serde(rename = "TOKEN", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(rename = "PROOF_KEY", skip_serializing_if = "Option::is_none")]
    pub proof_key: Option<String>,
    #[serde(rename = "RAW_SAML_RESPONSE", skip_serializing_if = "Option::is_none")]
    pub raw_saml_response: Option<String>,
    #[serde(rename = "PASSCODE", skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
    #[serde(rename = "EXT_AUTHN_DUO_METHOD", skip_serializing_if = "Option::is_none")]
    pub ext_authn_duo_method: Option<String>,
    #[serde(rename = "PROVIDER", skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Serialize)]
struct LoginRequestData<'a> {
    #[serde(rename = "CLIENT_APP_ID")]
    client_app_id: &'a str,
    #[serde(rename = "CLIENT_APP_VERSION")]
    client_app_version: &'a str,
    #[serde(rename = "ACCOUNT_NAME")]
    account_name: &'a str,
    #[serde(rename = "LOGIN_NAME")]
    login_name: &'a str,
    #[serde(rename = "CLIENT_ENVIRONMENT")]
    client_environment: ClientEnvironment,
    #[serde(rename = "SESSION_PARAMETERS", skip_serializing_if = "HashMap::is_empty")]
    session_parameters: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    fields: LoginFields,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    data: LoginRequestData<'a>,
}

/// The generic response envelope used by all session endpoints.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthResponse<T> {
    #[serde(default)]
    pub data: Option<T>,
    pub success: bool,
    #[serde(default, deserialize_with = "deserialize_code")]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The service returns `code` as a string, a number, or `null`.
pub(crate) fn deserialize_code<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<i32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(n)) => n.as_i64().map(|n| n as i32),
        Some(serde_json::Value::String(s)) => s.parse::<i32>().ok(),
        Some(_) => None,
    })
}

/// One server parameter reported on login or query responses.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct NameValue {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub warehouse_name: Option<String>,
    #[serde(default)]
    pub role_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponseData {
    pub token: Option<String>,
    pub master_token: Option<String>,
    #[serde(default)]
    pub session_id: i64,
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub parameters: Vec<NameValue>,
    #[serde(default)]
    pub session_info: SessionInfo,
    #[serde(default)]
    pub mfa_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// The product of a successful login.
#[derive(Clone, Debug)]
pub struct LoginData {
    pub session_token: String,
    pub master_token: String,
    pub session_id: i64,
    pub server_version: String,
    pub parameters: Vec<NameValue>,
    pub session_info: SessionInfo,
    pub mfa_token: Option<String>,
    pub id_token: Option<String>,
}

/// Posts a login request with the given authentication fields.
pub async fn post_login(
    transport: &Transport,
    config: &AuthConfig,
    fields: LoginFields,
    session_parameters: HashMap<String, serde_json::Value>,
    cancel: &CancellationToken,
) -> Result<LoginData> {
    let request = LoginRequest {
        data: LoginRequestData {
            client_app_id: CLIENT_APP_ID,
            client_app_version: CLIENT_APP_VERSION,
            account_name: &config.account,
            login_name: &config.user,
            client_environment: ClientEnvironment::from_config(config),
            session_parameters,
            fields,
        },
    };

    let mut url = url::Url::parse(&config.base_url())
        .and_then(|u| u.join(LOGIN_REQUEST_PATH))
        .map_err(Error::config)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("requestId", &uuid::Uuid::new_v4().to_string());
        query.append_pair("request_guid", &uuid::Uuid::new_v4().to_string());
        if let Some(database) = &config.database {
            query.append_pair("databaseName", database);
        }
        if let Some(schema) = &config.schema {
            query.append_pair("schemaName", schema);
        }
        if let Some(warehouse) = &config.warehouse {
            query.append_pair("warehouse", warehouse);
        }
        if let Some(role) = &config.role {
            query.append_pair("roleName", role);
        }
    }

    let builder = standard_headers(transport.client().post(url.to_string())).json(&request);
    let options = RequestOptions::new().with_attempt_timeout(config.login_timeout);
    let response: AuthResponse<LoginResponseData> =
        transport.execute_json(builder, &options, cancel).await?;
    into_login_data(response)
}

fn into_login_data(response: AuthResponse<LoginResponseData>) -> Result<LoginData> {
    if !response.success {
        return Err(auth_failure(response.code, response.message));
    }
    let data = response
        .data
        .ok_or_else(|| Error::authentication("login response carried no data"))?;
    let (Some(session_token), Some(master_token)) = (data.token, data.master_token) else {
        return Err(Error::authentication("login response carried no tokens"));
    };
    Ok(LoginData {
        session_token,
        master_token,
        session_id: data.session_id,
        server_version: data.server_version,
        parameters: data.parameters,
        session_info: data.session_info,
        mfa_token: data.mfa_token,
        id_token: data.id_token,
    })
}

/// Maps a non-success session endpoint response to an error.
pub fn auth_failure(code: Option<i32>, message: Option<String>) -> Error {
    let server = ServerError::new(
        code.unwrap_or_default(),
        "08001".to_string(),
        message.unwrap_or_else(|| "authentication failed".to_string()),
    );
    Error::authentication(server)
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
            scheme: url.scheme().unwrap().to_string(),
            host: url.authority().unwrap().host().to_string(),
            port: url.authority().unwrap().port_u16().unwrap(),
            warehouse: Some("COMPUTE_WH".to_string()),
            ..AuthConfig::default()
        }
    }

    fn login_body() -> serde_json::Value {
        json!({
            "data": {
                "token": "session-token-value",
                "masterToken": "master-token-value",
                "sessionId": 601,
                "serverVersion": "9.17.2",
                "parameters": [
                    {"name": "TIMEZONE", "value": "America/Los_Angeles"},
                ],
                "sessionInfo": {
                    "databaseName": "TESTDB",
                    "schemaName": null,
                    "warehouseName": "COMPUTE_WH",
                    "roleName": "SYSADMIN"
                }
            },
            "success": true,
            "code": null,
            "message": null
        })
    }

    #[tokio::test]
    async fn login_round_trip() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", LOGIN_REQUEST_PATH),
                request::query(url_decoded(contains(("warehouse", "COMPUTE_WH")))),
                request::body(json_decoded(|body: &serde_json::Value| {
                    let data = &body["data"];
                    let environment = &data["CLIENT_ENVIRONMENT"];
                    data["CLIENT_APP_ID"] == json!(CLIENT_APP_ID)
                        && data["CLIENT_APP_VERSION"] == json!(CLIENT_APP_VERSION)
                        && data["ACCOUNT_NAME"] == json!("acme")
                        && data["LOGIN_NAME"] == json!("jsmith")
                        && data["PASSWORD"] == json!("hunter2")
                        && environment["APPLICATION"] == json!(CLIENT_APP_ID)
                        && environment["OS"] == json!(std::env::consts::OS)
                        // The OS version is host-dependent; it must be a
                        // real version string, not the architecture.
                        && environment["OS_VERSION"]
                            .as_str()
                            .is_some_and(|v| !v.is_empty() && v != std::env::consts::ARCH)
                        && environment["OCSP_MODE"] == json!("FAIL_OPEN")
                })),
            ])
            .respond_with(json_encoded(login_body())),
        );
        let transport = Transport::builder().build()?;
        let config = test_config(&server);
        let fields = LoginFields {
            password: Some("hunter2".to_string()),
            ..LoginFields::default()
        };
        let data = post_login(
            &transport,
            &config,
            fields,
            HashMap::new(),
            &CancellationToken::new(),
        )
        .await?;
        assert_eq!(data.session_token, "session-token-value");
        assert_eq!(data.master_token, "master-token-value");
        assert_eq!(data.session_id, 601);
        assert_eq!(data.session_info.role_name.as_deref(), Some("SYSADMIN"));
        assert_eq!(data.parameters.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn login_failure_maps_code() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", LOGIN_REQUEST_PATH)).respond_with(
                json_encoded(json!({
                    "data": null,
                    "success": false,
                    "code": "390100",
                    "message": "Incorrect username or password was specified."
                })),
            ),
        );
        let transport = Transport::builder().build()?;
        let config = test_config(&server);
        let err = post_login(
            &transport,
            &config,
            LoginFields::default(),
            HashMap::new(),
            &CancellationToken::new(),
        )
        .await
        .expect_err("login must fail");
        let server_error = err.as_inner::<ServerError>().expect("inner ServerError");
        assert_eq!(server_error.code(), 390100);
        Ok(())
    }

    #[test]
    fn client_environment_reports_an_os_version() {
        let environment = ClientEnvironment::from_config(&AuthConfig::default());
        assert_eq!(environment.os, std::env::consts::OS);
        assert!(!environment.os_version.is_empty());
        assert_ne!(environment.os_version, std::env::consts::ARCH);
        assert_eq!(environment.ocsp_mode, "FAIL_OPEN");
    }

    #[test]
    fn code_deserializes_from_string_number_and_null() {
        let v: AuthResponse<serde_json::Value> =
            serde_json::from_value(json!({"success": true, "code": "390112"})).unwrap();
        assert_eq!(v.code, Some(390112));
        let v: AuthResponse<serde_json::Value> =
            serde_json::from_value(json!({"success": true, "code": 390112})).unwrap();
        assert_eq!(v.code, Some(390112));
        let v: AuthResponse<serde_json::Value> =
            serde_json::from_value(json!({"success": true, "code": null})).unwrap();
        assert_eq!(v.code, None);
        let v: AuthResponse<serde_json::Value> =
            serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(v.code, None);
    }
}
