//! Chrome Web Store API client for extship.
//!
//! This crate wraps the Chrome Web Store publish API (v1.1): exchanging an
//! OAuth2 refresh token for an access token, uploading a new package for an
//! existing item, publishing it, and reading the item back.
//!
//! # Example
//!
//! ```no_run
//! use extship_chrome::ChromeWebStore;
//! use extship_types::{ChromeCredentials, PublishTarget};
//!
//! let credentials = ChromeCredentials {
//!     extension_id: "ecnglinljpjkbgmdpeiglonddahpbkeb".to_string(),
//!     client_id: "client-id".to_string(),
//!     client_secret: Some("client-secret".to_string()),
//!     refresh_token: "refresh-token".to_string(),
//! };
//!
//! let mut store = ChromeWebStore::new(credentials).expect("client");
//! let bytes = std::fs::read("extension.zip").expect("read package");
//! let item = store.upload_package(&bytes).expect("upload");
//! println!("upload state: {:?}", item.upload_state);
//! store.publish(PublishTarget::Default).expect("publish");
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use extship_types::{ChromeCredentials, Projection, PublishTarget, StoreError, decode_response};
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

/// Default root for both the OAuth2 token endpoint and the store API
pub const CHROME_API_ROOT: &str = "https://www.googleapis.com";

/// Default timeout for API requests. Package uploads can be large.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("extship/", env!("CARGO_PKG_VERSION"));

const API_VERSION_HEADER: &str = "x-goog-api-version";
const API_VERSION: &str = "2";

/// An OAuth2 access token and when it was obtained.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &extship_types::mask_secret(&self.token))
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Credentials plus the access token currently in use.
///
/// The token is fetched on first use and kept until [`ChromeSession::clear`]
/// is called. Expiry is not tracked.
#[derive(Debug, Clone)]
pub struct ChromeSession {
    credentials: ChromeCredentials,
    cached: Option<AccessToken>,
}

impl ChromeSession {
    pub fn new(credentials: ChromeCredentials) -> Self {
        Self {
            credentials,
            cached: None,
        }
    }

    pub fn credentials(&self) -> &ChromeCredentials {
        &self.credentials
    }

    pub fn cached_token(&self) -> Option<&AccessToken> {
        self.cached.as_ref()
    }

    pub fn clear(&mut self) {
        self.cached = None;
    }

    fn store(&mut self, token: String) -> &AccessToken {
        self.cached.insert(AccessToken {
            token,
            issued_at: Utc::now(),
        })
    }
}

/// Chrome Web Store API client
#[derive(Debug, Clone)]
pub struct ChromeWebStore {
    root_url: String,
    timeout: Duration,
    http: Client,
    session: ChromeSession,
}

impl ChromeWebStore {
    /// Create a client against the public Google endpoints
    pub fn new(credentials: ChromeCredentials) -> Result<Self, StoreError> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            root_url: CHROME_API_ROOT.to_string(),
            timeout,
            http: build_http(timeout)?,
            session: ChromeSession::new(credentials),
        })
    }

    /// Point the client at a different root (staging proxy, test server)
    pub fn with_root_url(mut self, root_url: &str) -> Self {
        self.root_url = root_url.trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, StoreError> {
        self.timeout = timeout;
        self.http = build_http(timeout)?;
        Ok(self)
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    pub fn session(&self) -> &ChromeSession {
        &self.session
    }

    pub fn extension_id(&self) -> &str {
        &self.session.credentials.extension_id
    }

    /// Upload a new package for the existing item.
    pub fn upload_package(&mut self, package: &[u8]) -> Result<ItemResource, StoreError> {
        let url = format!(
            "{}/upload/chromewebstore/v1.1/items/{}",
            self.root_url,
            self.extension_id()
        );
        let request = self.http.put(url).body(package.to_vec());
        self.send_authorized(request, "upload request failed")
    }

    /// Publish the most recently uploaded package to `target`.
    pub fn publish(&mut self, target: PublishTarget) -> Result<PublishResult, StoreError> {
        let url = format!(
            "{}/chromewebstore/v1.1/items/{}/publish?publishTarget={}",
            self.root_url,
            self.extension_id(),
            target.as_str()
        );
        // Google rejects body-less POSTs without an explicit length.
        let request = self.http.post(url).body(Vec::<u8>::new());
        self.send_authorized(request, "publish request failed")
    }

    /// Read the item at the given projection.
    pub fn get_item(&mut self, projection: Projection) -> Result<ItemResource, StoreError> {
        let url = format!(
            "{}/chromewebstore/v1.1/items/{}?projection={}",
            self.root_url,
            self.extension_id(),
            projection.as_str()
        );
        let request = self.http.get(url);
        self.send_authorized(request, "item request failed")
    }

    /// Drop the cached access token so the next call re-authenticates.
    pub fn clear_cached_token(&mut self) {
        self.session.clear();
    }

    /// Return the cached access token, fetching one if none is cached.
    pub fn access_token(&mut self) -> Result<&AccessToken, StoreError> {
        if self.session.cached.is_none() {
            let token = self.fetch_access_token()?;
            self.session.store(token);
        }
        self.session
            .cached
            .as_ref()
            .ok_or_else(|| StoreError::Auth("access token missing after refresh".to_string()))
    }

    fn fetch_access_token(&self) -> Result<String, StoreError> {
        let url = format!("{}/oauth2/v4/token", self.root_url);
        let credentials = &self.session.credentials;
        let request = TokenRequest {
            client_id: &credentials.client_id,
            refresh_token: &credentials.refresh_token,
            grant_type: "refresh_token",
            client_secret: credentials.client_secret.as_deref(),
        };

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .map_err(|e| StoreError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| StoreError::Auth(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            return Err(StoreError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::Auth(format!("unreadable token response: {e}")))?;

        match parsed.access_token {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(StoreError::Auth(
                "token response did not contain an access_token".to_string(),
            )),
        }
    }

    fn send_authorized<T: serde::de::DeserializeOwned>(
        &mut self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, StoreError> {
        let bearer = format!("Bearer {}", self.access_token()?.token);
        let response = request
            .header(reqwest::header::AUTHORIZATION, bearer)
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .map_err(|e| StoreError::transport(context, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| StoreError::transport(format!("{context}: unreadable body"), e))?;
        decode_response(status, body)
    }
}

fn build_http(timeout: Duration) -> Result<Client, StoreError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| StoreError::transport("failed to build HTTP client", e))
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    refresh_token: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Item resource returned by upload and get
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// `SUCCESS`, `IN_PROGRESS`, `FAILURE` or `NOT_FOUND`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crx_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_error: Vec<ItemError>,
}

impl ItemResource {
    pub fn upload_failed(&self) -> bool {
        self.upload_state.as_deref() == Some("FAILURE")
    }

    pub fn upload_in_progress(&self) -> bool {
        self.upload_state.as_deref() == Some("IN_PROGRESS")
    }

    /// All item errors joined for display
    pub fn error_summary(&self) -> String {
        self.item_error
            .iter()
            .map(|e| format!("{}: {}", e.error_code, e.error_detail))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// One entry of an item's `itemError` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_detail: String,
}

/// Response from the publish endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub item_id: String,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default, rename = "statusDetail")]
    pub status_detail: Vec<String>,
}

impl PublishResult {
    /// Whether the store took the publish request. Review-pending counts.
    pub fn is_accepted(&self) -> bool {
        self.status
            .iter()
            .any(|s| s == "OK" || s == "ITEM_PENDING_REVIEW")
    }

    pub fn detail(&self) -> String {
        if self.status_detail.is_empty() {
            self.status.join(", ")
        } else {
            self.status_detail.join("; ")
        }
    }
}
