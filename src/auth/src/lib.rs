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

//! Authentication for the Snowflake driver.
//!
//! Everything that produces or refreshes session tokens lives here: the
//! authenticator variants (password with optional MFA, key-pair JWT, OAuth,
//! external browser, workload identity federation), the login and
//! token-renewal wire calls, the credential cache for MFA and ID tokens,
//! and the concurrency-safe [TokenAccessor].
//!
//! The driver selects an authenticator from its configuration, calls
//! [authenticate], and stores the resulting [LoginData] tokens in the
//! session's [TokenAccessor]. When the server later reports the session
//! token expired, [renew_session] rotates the tokens; concurrent callers
//! coalesce onto a single renewal request.
//!
//! [TokenAccessor]: accessor::TokenAccessor
//! [authenticate]: authenticator::authenticate
//! [renew_session]: accessor::renew_session

/// Configuration consumed by the authenticators.
pub mod config;

/// The thread-safe holder of the session/master token pair.
pub mod accessor;

/// The login request/response wire types and the login POST itself.
pub mod login;

/// Authenticator selection and the common authentication entry point.
pub mod authenticator;

/// Username/password authentication, with MFA passcodes and token caching.
pub mod password;

/// Key-pair authentication: a short-lived RS256 JWT signed with a PKCS#8 key.
pub mod keypair;

/// OAuth authentication: bearer tokens and the authorization-code flow.
pub mod oauth;

/// External-browser (SAML) authentication with a loopback listener.
pub mod external_browser;

/// Workload identity federation: AWS, GCP, Azure, and plain OIDC.
pub mod workload;

/// The on-disk cache for MFA tokens and ID tokens.
pub mod cache;

pub use snowflake_core::Result;
