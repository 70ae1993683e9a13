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

//! OIDC workload identity: a caller-supplied token.

use super::Attestation;
use crate::config::AuthConfig;
use snowflake_core::Result;
use snowflake_core::error::Error;

/// Validates the caller-supplied token and wraps it as an attestation.
pub fn attestation(config: &AuthConfig) -> Result<Attestation> {
    let token = config
        .workload
        .token
        .as_ref()
        .ok_or_else(|| Error::config("workload identity provider OIDC requires a token"))?;
    let claims = super::extract_claims(token.as_str())?;
    tracing::debug!(issuer = %claims.issuer, "using caller-supplied OIDC token");
    Ok(Attestation {
        provider: "OIDC",
        credential: token.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Secret, WorkloadOptions};
    use crate::workload::tests::unverified_jwt;

    #[test]
    fn wraps_valid_token() {
        let token = unverified_jwt(serde_json::json!({
            "iss": "https://issuer.example.com",
            "sub": "service-1",
        }));
        let config = AuthConfig {
            workload: WorkloadOptions {
                token: Some(Secret::from(token.clone())),
                ..WorkloadOptions::default()
            },
            ..AuthConfig::default()
        };
        let attestation = attestation(&config).unwrap();
        assert_eq!(attestation.provider, "OIDC");
        assert_eq!(attestation.credential, token);
    }

    #[test]
    fn missing_token_is_config_error() {
        let config = AuthConfig::default();
        let err = attestation(&config).unwrap_err();
        assert_eq!(err.kind(), snowflake_core::error::ErrorKind::Config);
    }

    #[test]
    fn token_without_claims_is_rejected() {
        let config = AuthConfig {
            workload: WorkloadOptions {
                token: Some(Secret::from("opaque-token")),
                ..WorkloadOptions::default()
            },
            ..AuthConfig::default()
        };
        assert!(attestation(&config).is_err());
    }
}
