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

//! AWS workload identity: a SigV4-signed `GetCallerIdentity` request.
//!
//! The attestation is the signed request itself, serialized so the server
//! can replay it against STS and learn which role the driver runs as. The
//! request never leaves the driver unsigned and carries the Snowflake
//! audience header so it cannot be replayed elsewhere.

use super::{Attestation, SNOWFLAKE_AUDIENCE};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use snowflake_core::Result;
use snowflake_core::error::Error;
use snowflake_core::sigv4::{self, AwsCredentials, SignableRequest};
use std::collections::HashMap;

/// The regional STS host; China partitions use a different suffix.
pub(crate) fn sts_host(region: &str) -> String {
    if region.starts_with("cn-") {
        format!("sts.{region}.amazonaws.com.cn")
    } else {
        format!("sts.{region}.amazonaws.com")
    }
}

fn region_from_env() -> Result<String> {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .map_err(|_| Error::authentication("no AWS region in the environment"))
}

/// Builds the signed attestation from ambient credentials.
pub fn attestation(now: chrono::DateTime<chrono::Utc>) -> Result<Attestation> {
    let credentials = AwsCredentials::from_env()
        .ok_or_else(|| Error::authentication("no AWS credentials in the environment"))?;
    let region = region_from_env()?;
    build(&credentials, &region, now)
}

pub(crate) fn build(
    credentials: &AwsCredentials,
    region: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Attestation> {
    let url = url::Url::parse(&format!(
        "https://{}/?Action=GetCallerIdentity&Version=2011-06-15",
        sts_host(region)
    ))
    .map_err(Error::authentication)?;

    let request = SignableRequest {
        method: "POST",
        url: &url,
        headers: vec![(
            "x-snowflake-audience".to_string(),
            SNOWFLAKE_AUDIENCE.to_string(),
        )],
        payload_hash: sigv4::payload_hash(b""),
    };
    let signed = sigv4::sign(&request, credentials, region, "sts", now)?;

    let mut headers: HashMap<String, String> = signed.into_iter().collect();
    headers.insert("host".to_string(), url.host_str().unwrap_or_default().to_string());
    headers.insert(
        "x-snowflake-audience".to_string(),
        SNOWFLAKE_AUDIENCE.to_string(),
    );

    let body = serde_json::json!({
        "url": url.to_string(),
        "method": "POST",
        "headers": headers,
    });
    Ok(Attestation {
        provider: "AWS",
        credential: STANDARD.encode(body.to_string().as_bytes()),
    })
}
