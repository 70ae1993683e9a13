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

//! AWS Signature Version 4 request signing.
//!
//! Used in two places: the workload-identity authenticator signs an STS
//! `GetCallerIdentity` request as its attestation, and the file-transfer
//! agent signs S3 stage requests when the stage hands out raw credentials
//! instead of presigned URLs.

use crate::Result;
use crate::error::Error;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const SHORT_DATE: &str = "%Y%m%d";
const LONG_DATETIME: &str = "%Y%m%dT%H%M%SZ";

// Everything except the characters SigV4 leaves unencoded in URI paths.
const URI_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Ambient AWS credentials used to sign a request.
#[derive(Clone, Default)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[censored]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

impl AwsCredentials {
    /// Reads credentials from the conventional environment variables.
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        let session_token = std::env::var("AWS_SESSION_TOKEN")
            .or_else(|_| std::env::var("AWS_SECURITY_TOKEN"))
            .ok();
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// A request to be signed: method, URL, headers, and the payload hash.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub url: &'a Url,
    /// Headers included in the signature, lowercase names.
    pub headers: Vec<(String, String)>,
    /// Hex SHA-256 of the payload, or `UNSIGNED-PAYLOAD`.
    pub payload_hash: String,
}

/// Hex SHA-256 of a payload, the form SigV4 expects.
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Signs `request` and returns the headers to add, including
/// `authorization`, `x-amz-date`, and (when present) `x-amz-security-token`.
pub fn sign(
    request: &SignableRequest<'_>,
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>> {
    let amz_date = now.format(LONG_DATETIME).to_string();
    let short_date = now.format(SHORT_DATE).to_string();

    let host = request
        .url
        .host_str()
        .ok_or_else(|| Error::other("request URL has no host"))?
        .to_string();

    let mut signed_headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    signed_headers.push(("host".to_string(), host));
    signed_headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(token) = &credentials.session_token {
        signed_headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    signed_headers.sort();

    let canonical_uri: String = if request.url.path().is_empty() {
        "/".to_string()
    } else {
        utf8_percent_encode(request.url.path(), URI_ENCODE).to_string()
    };

    let mut query: Vec<(String, String)> = request
        .url
        .query_pairs()
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, QUERY_ENCODE).to_string(),
                utf8_percent_encode(&v, QUERY_ENCODE).to_string(),
            )
        })
        .collect();
    query.sort();
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_headers = signed_headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect::<String>();
    let signed_header_names = signed_headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        canonical_uri,
        canonical_query,
        canonical_headers,
        signed_header_names,
        request.payload_hash,
    );

    let scope = format!("{short_date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes())),
    );

    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &short_date,
        region,
        service,
    )?;
    let mut mac = HmacSha256::new_from_slice(&signing_key).map_err(Error::other)?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, scope, signed_header_names, signature,
    );

    let mut out = vec![
        ("authorization".to_string(), authorization),
        ("x-amz-date".to_string(), amz_date),
    ];
    if let Some(token) = &credentials.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    Ok(out)
}

fn derive_signing_key(
    secret: &str,
    short_date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let mut key = format!("AWS4{secret}").into_bytes();
    for piece in [short_date, region, service, "aws4_request"] {
        let mut mac = HmacSha256::new_from_slice(&key).map_err(Error::other)?;
        mac.update(piece.as_bytes());
        key = mac.finalize().into_bytes().to_vec();
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_credentials() -> AwsCredentials {
        // The credential pair from the AWS SigV4 test suite.
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    #[test]
    fn signs_get_caller_identity_shape() {
        let url =
            Url::parse("https://sts.us-east-1.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15")
                .unwrap();
        let request = SignableRequest {
            method: "POST",
            url: &url,
            headers: vec![("x-snowflake-audience".to_string(), "snowflakecomputing.com".to_string())],
            payload_hash: payload_hash(b""),
        };
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        let headers = sign(&request, &test_credentials(), "us-east-1", "sts", now).unwrap();
        let auth = &headers
            .iter()
            .find(|(k, _)| k == "authorization")
            .unwrap()
            .1;
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/sts/aws4_request"), "{auth}");
        assert!(auth.contains("SignedHeaders=host;x-amz-date;x-snowflake-audience"), "{auth}");
        assert!(
            headers.iter().any(|(k, v)| k == "x-amz-date" && v == "20150830T123600Z"),
            "{headers:?}"
        );
    }

    #[test]
    fn session_token_is_signed_and_emitted() {
        let url = Url::parse("https://bucket.s3.us-west-2.amazonaws.com/stages/key").unwrap();
        let credentials = AwsCredentials {
            session_token: Some("FwoGZXIvYXdzEBc".to_string()),
            ..test_credentials()
        };
        let request = SignableRequest {
            method: "PUT",
            url: &url,
            headers: vec![],
            payload_hash: payload_hash(b"contents"),
        };
        let headers = sign(&request, &credentials, "us-west-2", "s3", Utc::now()).unwrap();
        assert!(
            headers
                .iter()
                .any(|(k, v)| k == "x-amz-security-token" && v == "FwoGZXIvYXdzEBc")
        );
        let auth = &headers
            .iter()
            .find(|(k, _)| k == "authorization")
            .unwrap()
            .1;
        assert!(auth.contains("x-amz-security-token"), "{auth}");
    }

    #[test]
    fn signature_is_deterministic() {
        let url = Url::parse("https://sts.us-east-1.amazonaws.com/?Action=GetCallerIdentity").unwrap();
        let request = SignableRequest {
            method: "POST",
            url: &url,
            headers: vec![],
            payload_hash: payload_hash(b""),
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = sign(&request, &test_credentials(), "us-east-1", "sts", now).unwrap();
        let b = sign(&request, &test_credentials(), "us-east-1", "sts", now).unwrap();
        assert_eq!(a, b);
    }
}
