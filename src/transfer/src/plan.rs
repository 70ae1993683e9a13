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

//! The transfer plan returned by the server for a PUT/GET statement.
//!
//! These types deserialize straight from the `data` object of the
//! statement response. Field names follow the wire protocol.

use serde::Deserialize;
use snowflake_core::storage_flow::StorageProvider;

/// Upload for PUT, download for GET.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum CommandType {
    #[serde(rename = "UPLOAD")]
    Upload,
    #[serde(rename = "DOWNLOAD")]
    Download,
}

/// Credentials for the stage's storage backend; which fields are present
/// depends on the location type.
#[derive(Clone, Default, Deserialize)]
pub struct StageCredentials {
    #[serde(rename = "AWS_KEY_ID", default)]
    pub aws_key_id: Option<String>,
    #[serde(rename = "AWS_SECRET_KEY", default)]
    pub aws_secret_key: Option<String>,
    #[serde(rename = "AWS_TOKEN", default)]
    pub aws_token: Option<String>,
    #[serde(rename = "AZURE_SAS_TOKEN", default)]
    pub azure_sas_token: Option<String>,
    #[serde(rename = "GCS_ACCESS_TOKEN", default)]
    pub gcs_access_token: Option<String>,
}

impl std::fmt::Debug for StageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageCredentials")
            .field("aws_key_id", &self.aws_key_id)
            .field("aws_secret_key", &self.aws_secret_key.as_ref().map(|_| "[censored]"))
            .field("aws_token", &self.aws_token.as_ref().map(|_| "[censored]"))
            .field("azure_sas_token", &self.azure_sas_token.as_ref().map(|_| "[censored]"))
            .field("gcs_access_token", &self.gcs_access_token.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

/// The stage descriptor: where the bytes live and how to reach them.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    pub location_type: String,
    /// `bucket/prefix` for cloud stages, a directory for LOCAL_FS.
    pub location: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub storage_account: Option<String>,
    #[serde(default, rename = "endPoint")]
    pub end_point: Option<String>,
    #[serde(default)]
    pub use_regional_url: bool,
    #[serde(default)]
    pub creds: StageCredentials,
    #[serde(default)]
    pub presigned_url: Option<String>,
    /// Names the cipher suite for client-side encryption (e.g. `AES_GCM`).
    #[serde(default)]
    pub ciphers: Option<String>,
}

impl StageInfo {
    pub fn provider(&self) -> Option<StorageProvider> {
        match self.location_type.as_str() {
            "S3" | "S3GOV" | "S3CHINA" => Some(StorageProvider::S3),
            "AZURE" => Some(StorageProvider::Azure),
            "GCS" => Some(StorageProvider::Gcs),
            "LOCAL_FS" => Some(StorageProvider::LocalFs),
            _ => None,
        }
    }

    /// True when the stage encrypts with AES-GCM instead of AES-CBC.
    pub fn uses_gcm(&self) -> bool {
        self.ciphers
            .as_deref()
            .is_some_and(|c| c.to_ascii_uppercase().contains("AES_GCM"))
    }
}

/// The key material for client-side encryption of one query's files.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMaterial {
    pub query_stage_master_key: String,
    pub query_id: String,
    pub smk_id: i64,
}

impl std::fmt::Debug for EncryptionMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionMaterial")
            .field("query_stage_master_key", &"[censored]")
            .field("query_id", &self.query_id)
            .field("smk_id", &self.smk_id)
            .finish()
    }
}

/// The full plan for one PUT/GET statement.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    pub command: CommandType,
    /// Historically snake_case on the wire, unlike its siblings.
    #[serde(default, rename = "src_locations")]
    pub src_locations: Vec<String>,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default)]
    pub auto_compress: bool,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub source_compression: Option<String>,
    pub stage_info: StageInfo,
    /// One entry for PUT; aligned with `src_locations` for GET, with `None`
    /// marking unencrypted files.
    #[serde(default, deserialize_with = "one_or_many")]
    pub encryption_material: Vec<Option<EncryptionMaterial>>,
    /// The local target directory for GET.
    #[serde(default)]
    pub local_location: Option<String>,
    /// Presigned URLs aligned with `src_locations` (GCS).
    #[serde(default)]
    pub presigned_urls: Vec<String>,
}

fn default_parallel() -> usize {
    4
}

/// The server sends one object for PUT and an array for GET.
fn one_or_many<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<Option<EncryptionMaterial>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(EncryptionMaterial),
        Many(Vec<Option<EncryptionMaterial>>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(m)) => vec![Some(m)],
        Some(OneOrMany::Many(ms)) => ms,
    })
}
