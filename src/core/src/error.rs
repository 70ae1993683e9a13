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

//! The error types returned by the driver.
//!
//! Every public operation returns [Error]. The error carries a broad
//! [ErrorKind] and a boxed source; callers that need detail (the numeric
//! server code, the HTTP status, the per-file transfer status) downcast the
//! source chain with [Error::as_inner].

use crate::secrets;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The core error returned by all driver operations.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

impl Error {
    /// Creates a new [Error] with the given [ErrorKind] and source error.
    pub fn new<T: Into<BoxError>>(kind: ErrorKind, source: T) -> Self {
        Error {
            kind,
            source: source.into(),
        }
    }

    /// A helper to create a new [ErrorKind::Config] error.
    pub fn config<T: Into<BoxError>>(source: T) -> Self {
        Error::new(ErrorKind::Config, source)
    }

    /// A helper to create a new [ErrorKind::Authentication] error.
    pub fn authentication<T: Into<BoxError>>(source: T) -> Self {
        Error::new(ErrorKind::Authentication, source)
    }

    /// A helper to create a new [ErrorKind::Transport] error.
    pub fn transport<T: Into<BoxError>>(source: T) -> Self {
        Error::new(ErrorKind::Transport, source)
    }

    /// A helper to create a new [ErrorKind::Server] error.
    pub fn server(source: ServerError) -> Self {
        Error::new(ErrorKind::Server, source)
    }

    /// A helper to create a new [ErrorKind::Decode] error.
    pub fn decode<T: Into<BoxError>>(source: T) -> Self {
        Error::new(ErrorKind::Decode, source)
    }

    /// A helper to create a new [ErrorKind::FileTransfer] error.
    pub fn transfer<T: Into<BoxError>>(source: T) -> Self {
        Error::new(ErrorKind::FileTransfer, source)
    }

    /// A helper to create a new [ErrorKind::Cancelled] error.
    pub fn cancelled() -> Self {
        Error::new(ErrorKind::Cancelled, "operation cancelled by the caller")
    }

    /// A helper to create a new [ErrorKind::Serde] error.
    pub fn ser<T: Into<BoxError>>(source: T) -> Self {
        Error::new(ErrorKind::Serde, source)
    }

    /// A helper to create a new [ErrorKind::Other] error.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Error::new(ErrorKind::Other, source)
    }

    /// Returns the [ErrorKind] associated with this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind.clone()
    }

    /// Returns `true` if the error was caused by caller-side cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Recurses through the source error chain and returns a reference to the
    /// inner value if it is of type `T`, or `None` if no such inner value is
    /// found.
    pub fn as_inner<T: std::error::Error + Send + Sync + 'static>(&self) -> Option<&T> {
        let mut error = self.source.as_ref() as &(dyn std::error::Error);
        loop {
            match error.downcast_ref::<T>() {
                Some(e) => return Some(e),
                None => error = error.source()?,
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, secrets::mask(&self.source.to_string()))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// The type of error held by an [Error] instance.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ErrorKind {
    /// A malformed DSN, a missing required field, or a bad key file.
    Config,
    /// A login failure, an unrecoverable token expiry, or an MFA timeout.
    Authentication,
    /// A network failure after exhausting retries.
    Transport,
    /// A non-success response from the Snowflake service.
    Server,
    /// A malformed result chunk or a cell type mismatch.
    Decode,
    /// A PUT/GET failure; inspect [FileTransferError] for per-file status.
    FileTransfer,
    /// The caller cancelled the operation.
    Cancelled,
    /// A serialization or deserialization error.
    Serde,
    /// An uncategorized error.
    #[default]
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "a problem occurred in the driver configuration"),
            ErrorKind::Authentication => write!(f, "a problem occurred during authentication"),
            ErrorKind::Transport => write!(f, "a problem occurred in the HTTPS transport"),
            ErrorKind::Server => write!(f, "the service reported an error"),
            ErrorKind::Decode => write!(f, "a problem occurred decoding a result set"),
            ErrorKind::FileTransfer => write!(f, "a problem occurred during a file transfer"),
            ErrorKind::Cancelled => write!(f, "the operation was cancelled"),
            ErrorKind::Serde => write!(
                f,
                "a problem occurred during serialization or deserialization"
            ),
            ErrorKind::Other => write!(f, "a problem occurred"),
        }
    }
}

/// Well-known server error codes.
///
/// The service returns these in the `code` field of a non-success response
/// body. The driver handles some of them internally (session renewal, async
/// polling); the rest are surfaced to the caller inside a [ServerError].
pub mod code {
    /// The session no longer exists on the server. Treated as success when
    /// closing a session.
    pub const SESSION_GONE: i32 = 390111;
    /// The session token expired; the driver renews it and retries once.
    pub const SESSION_EXPIRED: i32 = 390112;
    /// The master token expired; a full re-login is required.
    pub const MASTER_TOKEN_EXPIRED: i32 = 390114;
    /// A synchronous query is still executing.
    pub const QUERY_IN_PROGRESS: i32 = 333333;
    /// An asynchronous query is still executing.
    pub const QUERY_IN_PROGRESS_ASYNC: i32 = 333334;
    /// SQL compilation error: syntax.
    pub const SYNTAX_ERROR: i32 = 1003;
    /// The statement was cancelled.
    pub const QUERY_CANCELLED: i32 = 604;
    /// The object does not exist or the role is not authorized to see it.
    pub const OBJECT_NOT_EXIST_OR_AUTHORIZED: i32 = 2043;
    /// The requested role does not exist.
    pub const ROLE_NOT_EXIST: i32 = 390189;
}

/// A classification of the numeric server code, derived by table lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerErrorKind {
    SessionGone,
    SessionExpired,
    MasterTokenExpired,
    QueryInProgress,
    SyntaxError,
    QueryCancelled,
    ObjectNotExistOrAuthorized,
    RoleNotExist,
    Other,
}

/// A structured error returned by the Snowflake service.
///
/// The message is masked at construction so that credentials embedded in
/// server messages never reach logs or callers.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerError {
    code: i32,
    sql_state: String,
    query_id: Option<String>,
    message: String,
}

impl ServerError {
    pub fn new<S: Into<String>>(code: i32, sql_state: S, message: S) -> Self {
        ServerError {
            code,
            sql_state: sql_state.into(),
            query_id: None,
            message: secrets::mask(&message.into()),
        }
    }

    /// Attach the query id assigned by the server, when one exists.
    pub fn with_query_id<S: Into<String>>(mut self, query_id: Option<S>) -> Self {
        self.query_id = query_id.map(|q| q.into());
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn sql_state(&self) -> &str {
        &self.sql_state
    }

    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn server_kind(&self) -> ServerErrorKind {
        match self.code {
            code::SESSION_GONE => ServerErrorKind::SessionGone,
            code::SESSION_EXPIRED => ServerErrorKind::SessionExpired,
            code::MASTER_TOKEN_EXPIRED => ServerErrorKind::MasterTokenExpired,
            code::QUERY_IN_PROGRESS | code::QUERY_IN_PROGRESS_ASYNC => {
                ServerErrorKind::QueryInProgress
            }
            code::SYNTAX_ERROR => ServerErrorKind::SyntaxError,
            code::QUERY_CANCELLED => ServerErrorKind::QueryCancelled,
            code::OBJECT_NOT_EXIST_OR_AUTHORIZED => ServerErrorKind::ObjectNotExistOrAuthorized,
            code::ROLE_NOT_EXIST => ServerErrorKind::RoleNotExist,
            _ => ServerErrorKind::Other,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.query_id {
            Some(query_id) => write!(
                f,
                "{:06}ss({}): {}: {}",
                self.code, self.sql_state, query_id, self.message
            ),
            None => write!(f, "{:06}ss({}): {}", self.code, self.sql_state, self.message),
        }
    }
}

impl std::error::Error for ServerError {}

/// An HTTP-level failure: a non-success status code with an optional body.
#[derive(Clone, Debug)]
pub struct HttpError {
    status_code: u16,
    payload: Option<bytes::Bytes>,
}

impl HttpError {
    pub fn new(status_code: u16, payload: Option<bytes::Bytes>) -> Self {
        HttpError {
            status_code,
            payload,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn payload(&self) -> Option<&bytes::Bytes> {
        self.payload.as_ref()
    }

    /// The response body decoded as UTF-8, for message-signature matching.
    pub fn payload_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        self.payload
            .as_ref()
            .map(|p| String::from_utf8_lossy(p.as_ref()))
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP status {}", self.status_code)?;
        if let Some(text) = self.payload_text() {
            let sample: String = text.chars().take(256).collect();
            write!(f, ": {}", secrets::mask(&sample))?;
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}

/// The terminal status of a single file in a PUT/GET command.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{file}: {status}: {message}")]
pub struct FileTransferError {
    pub file: String,
    pub status: String,
    pub message: String,
}

impl FileTransferError {
    pub fn new<S: Into<String>>(file: S, status: S, message: S) -> Self {
        Self {
            file: file.into(),
            status: status.into(),
            message: secrets::mask(&message.into()),
        }
    }
}
