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

//! Azure workload identity: an Entra access token from the platform
//! identity endpoint.
//!
//! Two environments are supported. Azure Functions and App Service expose
//! `IDENTITY_ENDPOINT`/`IDENTITY_HEADER`; plain VMs use the fixed IMDS
//! address. Either way the response is a JWT whose issuer and subject
//! claims must be present before the driver forwards it.

use super::Attestation;
use crate::config::AuthConfig;
use serde::Deserialize;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The default Entra resource registered for Snowflake workload identity.
pub const DEFAULT_ENTRA_RESOURCE: &str = "api://fd3f753b-eed3-462c-b6a7-a4b5bb650aad";

const IMDS_HOST: &str = "http://169.254.169.254";

/// Overrides the IMDS host; used by tests.
pub(crate) const IMDS_HOST_ENV: &str = "SF_AZURE_IMDS_HOST";

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    access_token: String,
}

fn entra_resource(config: &AuthConfig) -> String {
    config
        .workload
        .entra_resource
        .clone()
        .unwrap_or_else(|| DEFAULT_ENTRA_RESOURCE.to_string())
}

/// Fetches an Entra token from the Functions endpoint or the VM IMDS.
pub async fn attestation(
    transport: &Transport,
    config: &AuthConfig,
    cancel: &CancellationToken,
) -> Result<Attestation> {
    let resource = entra_resource(config);
    let functions_identity = std::env::var("IDENTITY_ENDPOINT")
        .ok()
        .zip(std::env::var("IDENTITY_HEADER").ok());

    let builder = match &functions_identity {
        Some((endpoint, header)) => transport
            .client()
            .get(endpoint)
            .query(&[("api-version", "2019-08-01"), ("resource", &resource)])
            .header("X-IDENTITY-HEADER", header),
        None => {
            let host =
                std::env::var(IMDS_HOST_ENV).unwrap_or_else(|_| IMDS_HOST.to_string());
            transport
                .client()
                .get(format!("{host}/metadata/identity/oauth2/token"))
                .query(&[("api-version", "2018-02-01"), ("resource", resource.as_str())])
                .header("Metadata", "true")
        }
    };

    let options = RequestOptions::new().with_attempt_timeout(Duration::from_secs(10));
    let response: IdentityResponse = transport
        .execute_json(builder, &options, cancel)
        .await
        .map_err(|e| {
            Error::authentication(format!("Azure identity endpoint is unreachable: {e}"))
        })?;

    let claims = super::extract_claims(&response.access_token)?;
    tracing::debug!(issuer = %claims.issuer, "obtained Azure identity token");
    Ok(Attestation {
        provider: "AZURE",
        credential: response.access_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::tests::unverified_jwt;
    use httptest::{Expectation, Server, matchers::*, responders::*};
    use serde_json::json;

    fn entra_token() -> String {
        unverified_jwt(json!({
            "iss": "https://sts.windows.net/tenant-1/",
            "sub": "object-id-1",
        }))
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn imds_flow() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/metadata/identity/oauth2/token"),
                request::headers(contains(("metadata", "true"))),
                request::query(url_decoded(contains((
                    "resource",
                    DEFAULT_ENTRA_RESOURCE
                )))),
            ])
            .respond_with(json_encoded(json!({
                "access_token": entra_token(),
                "token_type": "Bearer",
            }))),
        );
        let _e1 = scoped_env::ScopedEnv::remove("IDENTITY_ENDPOINT");
        let _e2 = scoped_env::ScopedEnv::remove("IDENTITY_HEADER");
        let _e3 = scoped_env::ScopedEnv::set(
            IMDS_HOST_ENV,
            server.url("").to_string().trim_end_matches('/'),
        );
        let transport = Transport::builder().build()?;
        let config = AuthConfig::default();
        let attestation = attestation(&transport, &config, &CancellationToken::new()).await?;
        assert_eq!(attestation.provider, "AZURE");
        assert_eq!(attestation.credential, entra_token());
        Ok(())
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn functions_flow_uses_identity_header() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/msi/token"),
                request::headers(contains(("x-identity-header", "header-secret"))),
                request::query(url_decoded(contains(("api-version", "2019-08-01")))),
            ])
            .respond_with(json_encoded(json!({"access_token": entra_token()}))),
        );
        let _e1 = scoped_env::ScopedEnv::set(
            "IDENTITY_ENDPOINT",
            server.url("/msi/token").to_string().as_str(),
        );
        let _e2 = scoped_env::ScopedEnv::set("IDENTITY_HEADER", "header-secret");
        let transport = Transport::builder().build()?;
        let config = AuthConfig::default();
        let attestation = attestation(&transport, &config, &CancellationToken::new()).await?;
        assert_eq!(attestation.provider, "AZURE");
        Ok(())
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn token_without_claims_is_rejected() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/metadata/identity/oauth2/token"))
                .respond_with(json_encoded(json!({"access_token": "opaque"}))),
        );
        let _e1 = scoped_env::ScopedEnv::remove("IDENTITY_ENDPOINT");
        let _e2 = scoped_env::ScopedEnv::remove("IDENTITY_HEADER");
        let _e3 = scoped_env::ScopedEnv::set(
            IMDS_HOST_ENV,
            server.url("").to_string().trim_end_matches('/'),
        );
        let transport = Transport::builder().build()?;
        let config = AuthConfig::default();
        assert!(
            attestation(&transport, &config, &CancellationToken::new())
                .await
                .is_err()
        );
        Ok(())
    }
}
