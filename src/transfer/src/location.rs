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

//! Stage locations and endpoint derivation.

use crate::plan::StageInfo;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use snowflake_core::Result;
use snowflake_core::error::Error;

// Key names keep '/' as a separator; everything else outside the unreserved
// set is escaped.
const KEY_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'%')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|');

/// A stage location split into its container and path prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLocation {
    /// Bucket (S3/GCS) or container (Azure).
    pub bucket: String,
    /// The prefix under the bucket; empty or `/`-terminated.
    pub prefix: String,
}

/// Splits `location` on the first `/`; the remainder (possibly empty) is
/// the path.
pub fn split_location(location: &str) -> RemoteLocation {
    match location.split_once('/') {
        Some((bucket, prefix)) => {
            let mut prefix = prefix.to_string();
            if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            RemoteLocation {
                bucket: bucket.to_string(),
                prefix,
            }
        }
        None => RemoteLocation {
            bucket: location.to_string(),
            prefix: String::new(),
        },
    }
}

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE).to_string()
}

/// Hosts default to https; an endpoint override may carry its own scheme
/// (test deployments).
fn base(host: &str) -> String {
    if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{host}")
    }
}

/// The object URL for one file on an S3 stage.
pub fn s3_url(info: &StageInfo, key: &str) -> Result<url::Url> {
    let location = split_location(&info.location);
    let region = info.region.as_deref().unwrap_or("us-west-2");
    let host = match &info.end_point {
        Some(endpoint) if !endpoint.is_empty() => {
            format!("{}.{}", location.bucket, endpoint)
        }
        _ if region.starts_with("cn-") => {
            format!("{}.s3.{region}.amazonaws.com.cn", location.bucket)
        }
        _ => format!("{}.s3.{region}.amazonaws.com", location.bucket),
    };
    let url = format!(
        "{}/{}",
        base(&host),
        encode_key(&format!("{}{}", location.prefix, key))
    );
    url::Url::parse(&url).map_err(Error::transfer)
}

/// The base host for a GCS stage.
///
/// Regional hosts apply when the stage asks for one or the bucket lives in
/// `me-central2`; an explicit `endPoint` always wins.
pub fn gcs_host(info: &StageInfo) -> String {
    if let Some(endpoint) = &info.end_point {
        if !endpoint.is_empty() {
            return endpoint.clone();
        }
    }
    let region = info.region.as_deref().unwrap_or_default();
    if info.use_regional_url || region.eq_ignore_ascii_case("me-central2") {
        format!("storage.{}.rep.googleapis.com", region.to_ascii_lowercase())
    } else {
        "storage.googleapis.com".to_string()
    }
}

/// The object URL for one file on a GCS stage.
pub fn gcs_url(info: &StageInfo, key: &str) -> Result<url::Url> {
    let location = split_location(&info.location);
    let url = format!(
        "{}/{}/{}",
        base(&gcs_host(info)),
        location.bucket,
        encode_key(&format!("{}{}", location.prefix, key))
    );
    url::Url::parse(&url).map_err(Error::transfer)
}

/// The blob URL for one file on an Azure stage, without the SAS token.
pub fn azure_url(info: &StageInfo, key: &str) -> Result<url::Url> {
    let location = split_location(&info.location);
    let account = info
        .storage_account
        .as_deref()
        .ok_or_else(|| Error::transfer("Azure stage carries no storage account"))?;
    let endpoint = info.end_point.as_deref().filter(|e| !e.is_empty());
    let host = match endpoint {
        // A full URL override points at a test deployment; the account is
        // already part of it.
        Some(endpoint) if endpoint.contains("://") => base(endpoint),
        Some(endpoint) => base(&format!("{account}.{endpoint}")),
        None => base(&format!("{account}.blob.core.windows.net")),
    };
    let url = format!(
        "{host}/{}/{}",
        location.bucket,
        encode_key(&format!("{}{}", location.prefix, key))
    );
    url::Url::parse(&url).map_err(Error::transfer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn stage(location: &str, region: Option<&str>) -> StageInfo {
        StageInfo {
            location: location.to_string(),
            region: region.map(String::from),
            ..StageInfo::default()
        }
    }

    #[test_case("bucket/prefix", "bucket", "prefix/")]
    #[test_case("bucket/a/b", "bucket", "a/b/")]
    #[test_case("bucket/", "bucket", "")]
    #[test_case("bucket", "bucket", "")]
    fn location_splitting(location: &str, bucket: &str, prefix: &str) {
        let split = split_location(location);
        assert_eq!(split.bucket, bucket);
        assert_eq!(split.prefix, prefix);
    }

    #[test]
    fn s3_urls() {
        let info = stage("sfc-stage/u/1/", Some("us-east-2"));
        let url = s3_url(&info, "data.csv.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sfc-stage.s3.us-east-2.amazonaws.com/u/1/data.csv.gz"
        );

        let info = stage("sfc-stage/u/1/", Some("cn-north-1"));
        let url = s3_url(&info, "data.csv.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sfc-stage.s3.cn-north-1.amazonaws.com.cn/u/1/data.csv.gz"
        );

        let mut info = stage("sfc-stage/u/1/", Some("us-east-2"));
        info.end_point = Some("s3.example.internal".to_string());
        let url = s3_url(&info, "data.csv.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sfc-stage.s3.example.internal/u/1/data.csv.gz"
        );
    }

    #[test]
    fn gcs_hosts() {
        let info = stage("bucket/p", None);
        assert_eq!(gcs_host(&info), "storage.googleapis.com");

        let mut info = stage("bucket/p", Some("ME-CENTRAL2"));
        assert_eq!(gcs_host(&info), "storage.me-central2.rep.googleapis.com");

        info = stage("bucket/p", Some("europe-west3"));
        info.use_regional_url = true;
        assert_eq!(gcs_host(&info), "storage.europe-west3.rep.googleapis.com");

        info.end_point = Some("gcs.example.internal".to_string());
        assert_eq!(gcs_host(&info), "gcs.example.internal");
    }

    #[test]
    fn gcs_url_includes_bucket_path() {
        let info = stage("bucket/stages/q1/", None);
        let url = gcs_url(&info, "out.csv.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/bucket/stages/q1/out.csv.gz"
        );
    }

    #[test]
    fn azure_urls() {
        let mut info = stage("container/path/", None);
        info.storage_account = Some("sfcaccount".to_string());
        let url = azure_url(&info, "x.csv.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sfcaccount.blob.core.windows.net/container/path/x.csv.gz"
        );

        info.end_point = Some("blob.core.usgovcloudapi.net".to_string());
        let url = azure_url(&info, "x.csv.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sfcaccount.blob.core.usgovcloudapi.net/container/path/x.csv.gz"
        );

        info.storage_account = None;
        assert!(azure_url(&info, "x.csv.gz").is_err());
    }

    #[test]
    fn keys_with_spaces_are_escaped() {
        let info = stage("bucket/p/", None);
        let url = gcs_url(&info, "with space.csv").unwrap();
        assert!(url.as_str().ends_with("/p/with%20space.csv"), "{url}");
    }
}
