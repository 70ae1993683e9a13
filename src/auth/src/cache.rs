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

//! The on-disk cache for MFA tokens and ID tokens.
//!
//! When `clientRequestMfaToken` or `clientStoreTemporaryCredential` is set,
//! the server issues a reusable token on login and the driver stores it
//! keyed by `(host, user, kind)`. The cache is a single JSON file created
//! with owner-only permissions; a file some other user can read is ignored
//! rather than trusted.

use serde::{Deserialize, Serialize};
use snowflake_core::Result;
use snowflake_core::error::Error;
use std::collections::HashMap;
use std::path::PathBuf;

/// Overrides the cache directory; used by tests.
pub const CACHE_DIR_ENV: &str = "SF_TEMPORARY_CREDENTIAL_CACHE_DIR";

const CACHE_FILE_NAME: &str = "temporary_credential.json";

/// The kind of cached credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    MfaToken,
    IdToken,
}

impl CredentialKind {
    fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::MfaToken => "MFA_TOKEN",
            CredentialKind::IdToken => "ID_TOKEN",
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    tokens: HashMap<String, String>,
}

fn cache_key(host: &str, user: &str, kind: CredentialKind) -> String {
    format!(
        "{}:{}:{}",
        host.to_ascii_uppercase(),
        user.to_ascii_uppercase(),
        kind.as_str()
    )
}

fn cache_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        return Some(PathBuf::from(dir).join(CACHE_FILE_NAME));
    }
    dirs::cache_dir().map(|dir| dir.join("snowflake").join(CACHE_FILE_NAME))
}

#[cfg(unix)]
fn permissions_are_private(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o077 == 0
}

#[cfg(not(unix))]
fn permissions_are_private(_metadata: &std::fs::Metadata) -> bool {
    true
}

fn read_file() -> CacheFile {
    let Some(path) = cache_path() else {
        return CacheFile::default();
    };
    let Ok(metadata) = std::fs::metadata(&path) else {
        return CacheFile::default();
    };
    if !permissions_are_private(&metadata) {
        tracing::warn!(path = %path.display(), "credential cache is readable by others, ignoring");
        return CacheFile::default();
    }
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_default()
}

fn write_file(file: &CacheFile) -> Result<()> {
    let Some(path) = cache_path() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(Error::other)?;
    }
    let contents = serde_json::to_string(file).map_err(Error::ser)?;
    std::fs::write(&path, contents).map_err(Error::other)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .map_err(Error::other)?;
    }
    Ok(())
}

/// Returns the cached credential for `(host, user, kind)`, if any.
pub fn get(host: &str, user: &str, kind: CredentialKind) -> Option<String> {
    read_file().tokens.get(&cache_key(host, user, kind)).cloned()
}

/// Stores a credential; best effort, failures only log.
pub fn store(host: &str, user: &str, kind: CredentialKind, token: &str) {
    let mut file = read_file();
    file.tokens
        .insert(cache_key(host, user, kind), token.to_string());
    if let Err(e) = write_file(&file) {
        tracing::warn!(error = %e, "failed to persist credential cache");
    }
}

/// Deletes a credential the server rejected.
pub fn delete(host: &str, user: &str, kind: CredentialKind) {
    let mut file = read_file();
    if file.tokens.remove(&cache_key(host, user, kind)).is_some() {
        if let Err(e) = write_file(&file) {
            tracing::warn!(error = %e, "failed to persist credential cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoped_env::ScopedEnv;

    #[test]
    #[serial_test::serial]
    fn round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let _env = ScopedEnv::set(CACHE_DIR_ENV, dir.path().to_str().unwrap());

        assert_eq!(get("acme.example.com", "jsmith", CredentialKind::MfaToken), None);
        store("acme.example.com", "jsmith", CredentialKind::MfaToken, "mfa-secret");
        assert_eq!(
            get("acme.example.com", "jsmith", CredentialKind::MfaToken).as_deref(),
            Some("mfa-secret")
        );
        // Keys are case-insensitive on host and user.
        assert_eq!(
            get("ACME.example.COM", "JSMITH", CredentialKind::MfaToken).as_deref(),
            Some("mfa-secret")
        );
        // Kinds do not collide.
        assert_eq!(get("acme.example.com", "jsmith", CredentialKind::IdToken), None);

        delete("acme.example.com", "jsmith", CredentialKind::MfaToken);
        assert_eq!(get("acme.example.com", "jsmith", CredentialKind::MfaToken), None);
    }

    #[cfg(unix)]
    #[test]
    #[serial_test::serial]
    fn cache_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::TempDir::new().unwrap();
        let _env = ScopedEnv::set(CACHE_DIR_ENV, dir.path().to_str().unwrap());
        store("acme.example.com", "jsmith", CredentialKind::IdToken, "id-secret");
        let metadata =
            std::fs::metadata(dir.path().join(super::CACHE_FILE_NAME)).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    #[serial_test::serial]
    fn world_readable_cache_is_ignored() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::TempDir::new().unwrap();
        let _env = ScopedEnv::set(CACHE_DIR_ENV, dir.path().to_str().unwrap());
        store("acme.example.com", "jsmith", CredentialKind::MfaToken, "mfa-secret");
        let path = dir.path().join(super::CACHE_FILE_NAME);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(get("acme.example.com", "jsmith", CredentialKind::MfaToken), None);
    }
}
