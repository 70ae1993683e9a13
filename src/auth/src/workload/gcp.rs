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

//! GCP workload identity: an ID token from the metadata service.

use super::{Attestation, SNOWFLAKE_AUDIENCE};
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use snowflake_core::options::RequestOptions;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const METADATA_HOST: &str = "http://metadata.google.internal";
const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Overrides the metadata host; used by tests.
pub(crate) const METADATA_HOST_ENV: &str = "SF_GCE_METADATA_HOST";

fn metadata_url() -> String {
    let host = std::env::var(METADATA_HOST_ENV)
        .unwrap_or_else(|_| METADATA_HOST.to_string());
    format!("{host}{IDENTITY_PATH}?audience={SNOWFLAKE_AUDIENCE}&format=full")
}

/// Fetches the identity token from the GCE metadata service.
pub async fn attestation(
    transport: &Transport,
    cancel: &CancellationToken,
) -> Result<Attestation> {
    let builder = transport
        .client()
        .get(metadata_url())
        .header("Metadata-Flavor", "Google");
    let options = RequestOptions::new().with_attempt_timeout(Duration::from_secs(10));
    let response = transport
        .execute_bytes(builder, &options, cancel)
        .await
        .map_err(|e| {
            Error::authentication(format!("GCP metadata service is unreachable: {e}"))
        })?;
    let token = String::from_utf8(response.body.to_vec())
        .map_err(|_| Error::authentication("GCP metadata service returned a malformed token"))?;
    // A well-formed response is a JWT issued to the Snowflake audience.
    super::extract_claims(&token)?;
    Ok(Attestation {
        provider: "GCP",
        credential: token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::tests::unverified_jwt;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    #[tokio::test]
    #[serial_test::serial]
    async fn fetches_token_from_metadata_service() -> anyhow::Result<()> {
        let server = Server::run();
        let token = unverified_jwt(serde_json::json!({
            "iss": "https://accounts.google.com",
            "sub": "1234567890",
            "aud": SNOWFLAKE_AUDIENCE,
        }));
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", IDENTITY_PATH),
                request::headers(contains(("metadata-flavor", "Google"))),
                request::query(url_decoded(contains(("audience", SNOWFLAKE_AUDIENCE)))),
            ])
            .respond_with(status_code(200).body(token.clone())),
        );
        let _env = scoped_env::ScopedEnv::set(
            METADATA_HOST_ENV,
            server.url("").to_string().trim_end_matches('/'),
        );
        let transport = Transport::builder().build()?;
        let attestation = attestation(&transport, &CancellationToken::new()).await?;
        assert_eq!(attestation.provider, "GCP");
        assert_eq!(attestation.credential, token);
        Ok(())
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn non_jwt_response_is_rejected() -> anyhow::Result<()> {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", IDENTITY_PATH))
                .respond_with(status_code(200).body("not a token")),
        );
        let _env = scoped_env::ScopedEnv::set(
            METADATA_HOST_ENV,
            server.url("").to_string().trim_end_matches('/'),
        );
        let transport = Transport::builder().build()?;
        assert!(attestation(&transport, &CancellationToken::new()).await.is_err());
        Ok(())
    }
}
