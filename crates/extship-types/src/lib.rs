//! Core domain types for extship.
//!
//! This crate provides the types shared by the store clients, the
//! configuration layer, and the orchestrator: store credentials, the package
//! file being shipped, the small vocabularies each vendor API accepts, and
//! the error taxonomy every store call reports through.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The vendor store a branch of a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Store {
    /// Chrome Web Store
    Chrome,
    /// Mozilla Add-ons (addons.mozilla.org)
    Firefox,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Store::Chrome => write!(f, "chrome"),
            Store::Firefox => write!(f, "firefox"),
        }
    }
}

/// OAuth2 client credentials for one Chrome Web Store item.
#[derive(Clone, PartialEq, Eq)]
pub struct ChromeCredentials {
    /// Item (extension) id
    pub extension_id: String,
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret; desktop-type clients may omit it
    pub client_secret: Option<String>,
    /// Long-lived refresh token exchanged for access tokens
    pub refresh_token: String,
}

impl fmt::Debug for ChromeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromeCredentials")
            .field("extension_id", &self.extension_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_deref().map(mask_secret))
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .finish()
    }
}

/// AMO API key pair for one add-on.
#[derive(Clone, PartialEq, Eq)]
pub struct FirefoxCredentials {
    /// Add-on id (GUID, email-style id, or slug)
    pub extension_id: String,
    /// JWT issuer (`user:12345:67`)
    pub api_key: String,
    /// JWT signing secret
    pub api_secret: String,
}

impl fmt::Debug for FirefoxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirefoxCredentials")
            .field("extension_id", &self.extension_id)
            .field("api_key", &self.api_key)
            .field("api_secret", &mask_secret(&self.api_secret))
            .finish()
    }
}

/// Mask a secret for safe display (show first 4 and last 4 chars).
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}****{tail}")
}

/// A package archive loaded into memory for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct Package {
    /// File name sent with multipart uploads
    pub file_name: String,
    /// Raw archive bytes
    pub bytes: Vec<u8>,
}

impl Package {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read a package from disk. The file name part of `path` becomes the
    /// upload file name.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package.zip".to_string());
        Ok(Self { file_name, bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A string that did not match any accepted value of a store vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what} `{value}` (expected one of: {expected})")]
pub struct InvalidValue {
    pub what: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Firefox distribution channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Public listing on addons.mozilla.org
    #[default]
    Listed,
    /// Signed for self-distribution only
    Unlisted,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Listed => "listed",
            Channel::Unlisted => "unlisted",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "listed" => Ok(Channel::Listed),
            "unlisted" => Ok(Channel::Unlisted),
            other => Err(InvalidValue {
                what: "channel",
                value: other.to_string(),
                expected: "listed, unlisted",
            }),
        }
    }
}

/// Chrome publish audience.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishTarget {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "trustedTesters")]
    TrustedTesters,
}

impl PublishTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishTarget::Default => "default",
            PublishTarget::TrustedTesters => "trustedTesters",
        }
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishTarget {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(PublishTarget::Default),
            "trustedTesters" => Ok(PublishTarget::TrustedTesters),
            other => Err(InvalidValue {
                what: "publish target",
                value: other.to_string(),
                expected: "default, trustedTesters",
            }),
        }
    }
}

/// Chrome item-detail projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Projection {
    #[default]
    Draft,
    Published,
}

impl Projection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Projection::Draft => "DRAFT",
            Projection::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Projection {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Projection::Draft),
            "PUBLISHED" => Ok(Projection::Published),
            _ => Err(InvalidValue {
                what: "projection",
                value: s.trim().to_string(),
                expected: "DRAFT, PUBLISHED",
            }),
        }
    }
}

/// A store answered with something other than the expected success payload.
///
/// Raised for non-2xx responses (`reason` is `None`) and for 2xx responses
/// whose body lacks a required field (`reason` names what was wrong).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
    /// Why a successful status was still treated as an error
    pub reason: Option<String>,
}

impl ApiError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            reason: None,
        }
    }

    pub fn malformed(status: u16, body: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(
                f,
                "malformed response (status {}): {reason}: {}",
                self.status, self.body
            ),
            None => write!(f, "request failed with status {}: {}", self.status, self.body),
        }
    }
}

impl std::error::Error for ApiError {}

/// Error returned by every store client operation. None of these are
/// retried; each one ends the branch that raised it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Credentials could not be exchanged for a usable bearer credential
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The store answered with an error status or an unusable body
    #[error(transparent)]
    Api(#[from] ApiError),
    /// Waiting for server-side processing exceeded its budget
    #[error("timed out: {0}")]
    Timeout(String),
    /// The store accepted the request but reported failure in the body
    #[error("rejected by store: {0}")]
    Rejected(String),
    /// The request never produced a response
    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl StoreError {
    pub fn transport(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StoreError::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Auth(_) => ErrorKind::Auth,
            StoreError::Api(_) => ErrorKind::Api,
            StoreError::Timeout(_) => ErrorKind::Timeout,
            StoreError::Rejected(_) => ErrorKind::Rejected,
            StoreError::Transport { .. } => ErrorKind::Transport,
        }
    }

    /// The API error payload, if this is an API error.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            StoreError::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// Turn a raw HTTP status and body into a typed payload.
///
/// Non-2xx statuses become [`ApiError`] carrying the body verbatim. A 2xx
/// body that does not deserialize (missing required field, not JSON) is
/// also an [`ApiError`], with the decoder's message as the reason.
pub fn decode_response<T: serde::de::DeserializeOwned>(
    status: u16,
    body: String,
) -> Result<T, StoreError> {
    if !(200..300).contains(&status) {
        return Err(ApiError::status(status, body).into());
    }
    match serde_json::from_str(&body) {
        Ok(value) => Ok(value),
        Err(e) => Err(ApiError::malformed(status, body, e.to_string()).into()),
    }
}

/// Classification of a branch failure, for reports and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    Api,
    Timeout,
    Rejected,
    Transport,
    /// Local failures outside any store call (missing package file, bad input)
    Local,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Api => "api",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Transport => "transport",
            ErrorKind::Local => "local",
        };
        f.write_str(s)
    }
}
