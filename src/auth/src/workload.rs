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

//! Workload identity federation.
//!
//! Each provider produces a signed attestation of the compute identity the
//! driver is running as; the server exchanges it for session tokens. The
//! attestation shapes differ per provider: AWS is a SigV4-signed
//! `GetCallerIdentity` request, GCP and Azure are identity tokens from the
//! platform metadata service, and OIDC is a caller-supplied token.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod oidc;

use crate::authenticator::Authenticator;
use crate::config::{AuthConfig, WorkloadProvider};
use crate::login::{self, LoginData, LoginFields};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::http::Transport;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// The audience all attestations are scoped to.
pub const SNOWFLAKE_AUDIENCE: &str = "snowflakecomputing.com";

/// A provider attestation ready to be exchanged for session tokens.
#[derive(Clone, Debug)]
pub struct Attestation {
    pub provider: &'static str,
    pub credential: String,
}

/// The subset of JWT claims the driver inspects; never signature-verified
/// here, the server does that.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenClaims {
    pub issuer: String,
    pub subject: String,
}

/// Extracts `iss` and `sub` from an unverified JWT.
pub fn extract_claims(token: &str) -> Result<TokenClaims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::authentication("identity token is not a JWT"))?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| Error::authentication("identity token payload is not base64url"))?;
    let claims: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(Error::authentication)?;
    let issuer = claims["iss"]
        .as_str()
        .ok_or_else(|| Error::authentication("identity token carries no issuer claim"))?;
    let subject = claims["sub"]
        .as_str()
        .ok_or_else(|| Error::authentication("identity token carries no subject claim"))?;
    Ok(TokenClaims {
        issuer: issuer.to_string(),
        subject: subject.to_string(),
    })
}

#[derive(Debug)]
pub struct WorkloadAuthenticator;

#[async_trait::async_trait]
impl Authenticator for WorkloadAuthenticator {
    async fn login(
        &self,
        transport: &Transport,
        config: &AuthConfig,
        cancel: &CancellationToken,
    ) -> Result<LoginData> {
        let provider = config.workload.provider.ok_or_else(|| {
            Error::config("authenticator WORKLOAD_IDENTITY requires workloadIdentityProvider")
        })?;
        let attestation = match provider {
            WorkloadProvider::Aws => aws::attestation(chrono::Utc::now())?,
            WorkloadProvider::Gcp => gcp::attestation(transport, cancel).await?,
            WorkloadProvider::Azure => azure::attestation(transport, config, cancel).await?,
            WorkloadProvider::Oidc => oidc::attestation(config)?,
        };
        tracing::debug!(provider = attestation.provider, "workload identity attestation ready");
        let fields = LoginFields {
            authenticator: Some("WORKLOAD_IDENTITY".to_string()),
            provider: Some(attestation.provider.to_string()),
            token: Some(attestation.credential),
            ..LoginFields::default()
        };
        login::post_login(transport, config, fields, HashMap::new(), cancel).await
    }
}
