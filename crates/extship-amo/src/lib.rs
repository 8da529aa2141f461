//! addons.mozilla.org (AMO) API client for extship.
//!
//! This crate wraps the AMO v5 add-on submission API: uploading a package,
//! waiting for server-side validation, and creating a new version of an
//! existing add-on from a processed upload.
//!
//! # Example
//!
//! ```no_run
//! use extship_amo::MozillaAddons;
//! use extship_types::{Channel, FirefoxCredentials, Package};
//!
//! let credentials = FirefoxCredentials {
//!     extension_id: "my-addon@example.com".to_string(),
//!     api_key: "user:12345:67".to_string(),
//!     api_secret: "secret".to_string(),
//! };
//!
//! let amo = MozillaAddons::new(credentials).expect("client");
//! let package = Package::read(std::path::Path::new("extension.zip")).expect("read");
//! let upload = amo.upload_package(&package, Channel::Listed, true).expect("upload");
//! let version = amo.create_version(&upload.uuid, None).expect("version");
//! println!("created version {}", version.version);
//! ```

pub mod jwt;

use std::thread;
use std::time::Duration;

use extship_types::{Channel, FirefoxCredentials, Package, StoreError, decode_response};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

/// Default AMO root
pub const AMO_API_ROOT: &str = "https://addons.mozilla.org";

/// Default timeout for API requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("extship/", env!("CARGO_PKG_VERSION"));

/// How long to wait for AMO to finish processing an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between status checks
    pub interval: Duration,
    /// Total budget for the wait
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(120),
        }
    }
}

impl PollPolicy {
    /// Number of status checks the budget allows (at least one).
    pub fn attempts(&self) -> u32 {
        let interval = self.interval.as_nanos();
        if interval == 0 {
            return 1;
        }
        let attempts = self.max_wait.as_nanos() / interval;
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

/// AMO API client
#[derive(Debug, Clone)]
pub struct MozillaAddons {
    root_url: String,
    timeout: Duration,
    http: Client,
    credentials: FirefoxCredentials,
    poll: PollPolicy,
}

impl MozillaAddons {
    /// Create a client against addons.mozilla.org
    pub fn new(credentials: FirefoxCredentials) -> Result<Self, StoreError> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            root_url: AMO_API_ROOT.to_string(),
            timeout,
            http: build_http(timeout)?,
            credentials,
            poll: PollPolicy::default(),
        })
    }

    /// Point the client at a different root (AMO dev/stage, test server)
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

    /// Set the processing wait policy
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    pub fn extension_id(&self) -> &str {
        &self.credentials.extension_id
    }

    /// Upload a package. With `wait`, block until AMO has processed it or
    /// the poll budget runs out.
    pub fn upload_package(
        &self,
        package: &Package,
        channel: Channel,
        wait: bool,
    ) -> Result<UploadStatus, StoreError> {
        self.upload_package_with(package, channel, wait, thread::sleep)
    }

    /// [`upload_package`](Self::upload_package) with a caller-supplied sleep.
    pub fn upload_package_with<S: FnMut(Duration)>(
        &self,
        package: &Package,
        channel: Channel,
        wait: bool,
        sleep: S,
    ) -> Result<UploadStatus, StoreError> {
        let url = format!("{}/api/v5/addons/upload/", self.root_url);
        let form = Form::new()
            .part("upload", file_part(package))
            .text("channel", channel.as_str());

        let uploaded: UploadStatus =
            self.send(self.http.post(url).multipart(form), "upload request failed")?;

        if !wait || uploaded.is_terminal() {
            return Ok(uploaded);
        }
        self.wait_for_processing_with(&uploaded.uuid, sleep)
    }

    /// Fetch the processing status of an upload.
    pub fn check_package_status(&self, uuid: &str) -> Result<UploadStatus, StoreError> {
        let url = format!("{}/api/v5/addons/upload/{}/", self.root_url, uuid);
        self.send(self.http.get(url), "upload status request failed")
    }

    /// Poll until the upload is processed or submitted.
    ///
    /// Checks immediately, then every `interval`, for `max_wait / interval`
    /// checks in total. There is no sleep after the last check.
    pub fn wait_for_processing_with<S: FnMut(Duration)>(
        &self,
        uuid: &str,
        mut sleep: S,
    ) -> Result<UploadStatus, StoreError> {
        let attempts = self.poll.attempts();
        for attempt in 1..=attempts {
            let status = self.check_package_status(uuid)?;
            if status.is_terminal() {
                return Ok(status);
            }
            if attempt < attempts {
                sleep(self.poll.interval);
            }
        }
        Err(StoreError::Timeout("validation wait exceeded".to_string()))
    }

    /// Create a new version of the add-on from a processed upload, with an
    /// optional source archive for reviewers.
    pub fn create_version(
        &self,
        uuid: &str,
        source: Option<&Package>,
    ) -> Result<VersionResult, StoreError> {
        let url = format!(
            "{}/api/v5/addons/addon/{}/versions/",
            self.root_url, self.credentials.extension_id
        );
        let mut form = Form::new().text("upload", uuid.to_string());
        if let Some(source) = source {
            form = form.part("source", file_part(source));
        }
        self.send(self.http.post(url).multipart(form), "version request failed")
    }

    fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, StoreError> {
        let signed = jwt::mint(&self.credentials.api_key, &self.credentials.api_secret)?;
        let response = request
            .header(reqwest::header::AUTHORIZATION, format!("JWT {}", signed.token))
            .send()
            .map_err(|e| StoreError::transport(context, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| StoreError::transport(format!("{context}: unreadable body"), e))?;
        decode_response(status, body)
    }
}

fn file_part(package: &Package) -> Part {
    Part::bytes(package.bytes.clone()).file_name(package.file_name.clone())
}

fn build_http(timeout: Duration) -> Result<Client, StoreError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| StoreError::transport("failed to build HTTP client", e))
}

/// Upload record returned by the upload and status endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub processed: bool,
    pub submitted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Linter output, kept as the vendor sent it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<serde_json::Value>,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        self.processed || self.submitted
    }

    /// Processed, and the linter refused it.
    pub fn is_rejected(&self) -> bool {
        self.processed && self.valid == Some(false)
    }

    /// Error count from the linter report, 0 when absent.
    pub fn validation_errors(&self) -> u64 {
        self.validation
            .as_ref()
            .and_then(|v| v.get("errors"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Messages of every error-level linter finding.
    pub fn validation_messages(&self) -> Vec<String> {
        self.validation
            .as_ref()
            .and_then(|v| v.get("messages"))
            .and_then(|v| v.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.get("type").and_then(|t| t.as_str()) == Some("error"))
                    .filter_map(|m| m.get("message").and_then(|t| t.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Version record returned by the version-create endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResult {
    pub id: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_url: Option<String>,
}
