//! Configuration handling for extship.
//!
//! Configuration comes from three layers, lowest precedence first:
//!
//! 1. a `.extship.toml` file,
//! 2. GitHub Action inputs exposed as `INPUT_<NAME>` environment variables,
//! 3. command-line flags (built by the CLI into another [`Config`]).
//!
//! Layers are combined with [`Config::merge`] and then validated into
//! per-store [`Inputs`] with [`Config::resolve`].
//!
//! # Example
//!
//! ```no_run
//! use extship_config::{Config, load_config};
//! use std::path::Path;
//!
//! let file = load_config(Path::new(".")).expect("load config");
//! let env = Config::from_action_env().expect("action inputs");
//! let merged = file.merge(&env);
//! // A store is configured only when its extension id is set.
//! let inputs = merged.resolve();
//! # let _ = inputs;
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use extship_types::{
    Channel, ChromeCredentials, FirefoxCredentials, Projection, PublishTarget, mask_secret,
};
use serde::{Deserialize, Serialize};

/// Default configuration file name
pub const CONFIG_FILE: &str = ".extship.toml";

/// Prefix GitHub Actions puts in front of upper-cased input names
pub const ACTION_INPUT_PREFIX: &str = "INPUT_";

/// Default pause between AMO status checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default budget for AMO processing
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);

/// Get the config file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Package files shared by both stores
    #[serde(default)]
    pub package: PackageConfig,
    /// Chrome Web Store settings
    #[serde(default)]
    pub chrome: ChromeConfig,
    /// addons.mozilla.org settings
    #[serde(default)]
    pub firefox: FirefoxConfig,
}

/// Package file locations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Packed extension archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Source archive attached to AMO versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
}

/// Chrome Web Store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChromeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Publish after uploading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_target: Option<PublishTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Projection>,
    /// Override for `https://www.googleapis.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_root: Option<String>,
}

/// addons.mozilla.org configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirefoxConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    /// Wait for AMO to process the upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_wait: Option<Duration>,
    /// Override for `https://addons.mozilla.org`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_root: Option<String>,
}

impl Config {
    /// Create an empty config layer
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a layer from GitHub Action inputs in the environment.
    ///
    /// Unset and empty inputs are treated alike, as the Actions runner
    /// exports every declared input even when the workflow leaves it blank.
    pub fn from_action_env() -> Result<Config> {
        Ok(Config {
            package: PackageConfig {
                file: action_input("file").map(PathBuf::from),
                source_file: action_input("src_file").map(PathBuf::from),
            },
            chrome: ChromeConfig {
                extension_id: action_input("chrome_extension_id"),
                client_id: action_input("client_id"),
                client_secret: action_input("client_secret"),
                refresh_token: action_input("refresh_token"),
                publish: action_input("publish")
                    .map(|v| parse_bool("publish", &v))
                    .transpose()?,
                publish_target: action_input("publish_target")
                    .map(|v| v.parse::<PublishTarget>())
                    .transpose()?,
                projection: action_input("projection")
                    .map(|v| v.parse::<Projection>())
                    .transpose()?,
                api_root: action_input("chrome_api_root"),
            },
            firefox: FirefoxConfig {
                extension_id: action_input("firefox_extension_id"),
                api_key: action_input("api_key"),
                api_secret: action_input("api_secret"),
                channel: action_input("channel")
                    .map(|v| v.parse::<Channel>())
                    .transpose()?,
                wait: action_input("wait")
                    .map(|v| parse_bool("wait", &v))
                    .transpose()?,
                poll_interval: action_input("poll_interval")
                    .map(|v| parse_duration("poll_interval", &v))
                    .transpose()?,
                max_wait: action_input("max_wait")
                    .map(|v| parse_duration("max_wait", &v))
                    .transpose()?,
                api_root: action_input("firefox_api_root"),
            },
        })
    }

    /// Merge this layer with another (other takes precedence)
    pub fn merge(&self, other: &Config) -> Config {
        Config {
            package: PackageConfig {
                file: pick(&other.package.file, &self.package.file),
                source_file: pick(&other.package.source_file, &self.package.source_file),
            },
            chrome: ChromeConfig {
                extension_id: pick(&other.chrome.extension_id, &self.chrome.extension_id),
                client_id: pick(&other.chrome.client_id, &self.chrome.client_id),
                client_secret: pick(&other.chrome.client_secret, &self.chrome.client_secret),
                refresh_token: pick(&other.chrome.refresh_token, &self.chrome.refresh_token),
                publish: other.chrome.publish.or(self.chrome.publish),
                publish_target: other.chrome.publish_target.or(self.chrome.publish_target),
                projection: other.chrome.projection.or(self.chrome.projection),
                api_root: pick(&other.chrome.api_root, &self.chrome.api_root),
            },
            firefox: FirefoxConfig {
                extension_id: pick(&other.firefox.extension_id, &self.firefox.extension_id),
                api_key: pick(&other.firefox.api_key, &self.firefox.api_key),
                api_secret: pick(&other.firefox.api_secret, &self.firefox.api_secret),
                channel: other.firefox.channel.or(self.firefox.channel),
                wait: other.firefox.wait.or(self.firefox.wait),
                poll_interval: other.firefox.poll_interval.or(self.firefox.poll_interval),
                max_wait: other.firefox.max_wait.or(self.firefox.max_wait),
                api_root: pick(&other.firefox.api_root, &self.firefox.api_root),
            },
        }
    }

    /// Chrome credentials, if a Chrome extension id is configured.
    pub fn chrome_credentials(&self) -> Result<Option<ChromeCredentials>> {
        let Some(extension_id) = non_empty(&self.chrome.extension_id) else {
            return Ok(None);
        };
        Ok(Some(ChromeCredentials {
            extension_id,
            client_id: required(&self.chrome.client_id, "chrome", "client_id")?,
            client_secret: non_empty(&self.chrome.client_secret),
            refresh_token: required(&self.chrome.refresh_token, "chrome", "refresh_token")?,
        }))
    }

    /// Firefox credentials, if a Firefox extension id is configured.
    pub fn firefox_credentials(&self) -> Result<Option<FirefoxCredentials>> {
        let Some(extension_id) = non_empty(&self.firefox.extension_id) else {
            return Ok(None);
        };
        Ok(Some(FirefoxCredentials {
            extension_id,
            api_key: required(&self.firefox.api_key, "firefox", "api_key")?,
            api_secret: required(&self.firefox.api_secret, "firefox", "api_secret")?,
        }))
    }

    /// Validate the merged configuration into per-store inputs.
    pub fn resolve(&self) -> Result<Inputs> {
        let chrome = match self.chrome_credentials()? {
            Some(credentials) => Some(ChromeInputs {
                credentials,
                file: self.package_file("chrome")?,
                publish: self.chrome.publish.unwrap_or(false),
                publish_target: self.chrome.publish_target.unwrap_or_default(),
                projection: self.chrome.projection.unwrap_or_default(),
                api_root: non_empty(&self.chrome.api_root),
            }),
            None => None,
        };

        let firefox = match self.firefox_credentials()? {
            Some(credentials) => Some(FirefoxInputs {
                credentials,
                file: self.package_file("firefox")?,
                source_file: self
                    .package
                    .source_file
                    .clone()
                    .filter(|p| !p.as_os_str().is_empty()),
                channel: self.firefox.channel.unwrap_or_default(),
                wait: self.firefox.wait.unwrap_or(true),
                poll_interval: self.firefox.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
                max_wait: self.firefox.max_wait.unwrap_or(DEFAULT_MAX_WAIT),
                api_root: non_empty(&self.firefox.api_root),
            }),
            None => None,
        };

        Ok(Inputs { chrome, firefox })
    }

    fn package_file(&self, store: &str) -> Result<PathBuf> {
        self.package
            .file
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| anyhow!("{store}: missing required input `file`"))
    }
}

/// Validated inputs for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Inputs {
    pub chrome: Option<ChromeInputs>,
    pub firefox: Option<FirefoxInputs>,
}

impl Inputs {
    /// Whether any store is configured
    pub fn is_empty(&self) -> bool {
        self.chrome.is_none() && self.firefox.is_none()
    }

    /// Human-readable summary with secrets masked
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match &self.chrome {
            Some(c) => {
                lines.push(format!("chrome.extension_id: {}", c.credentials.extension_id));
                lines.push(format!("chrome.client_id: {}", c.credentials.client_id));
                lines.push(format!(
                    "chrome.client_secret: {}",
                    c.credentials
                        .client_secret
                        .as_deref()
                        .map(mask_secret)
                        .unwrap_or_else(|| "(none)".to_string())
                ));
                lines.push(format!(
                    "chrome.refresh_token: {}",
                    mask_secret(&c.credentials.refresh_token)
                ));
                lines.push(format!("chrome.file: {}", c.file.display()));
                lines.push(format!("chrome.publish: {}", c.publish));
                lines.push(format!("chrome.publish_target: {}", c.publish_target));
                lines.push(format!("chrome.projection: {}", c.projection));
                if let Some(root) = &c.api_root {
                    lines.push(format!("chrome.api_root: {root}"));
                }
            }
            None => lines.push("chrome: (not configured)".to_string()),
        }
        match &self.firefox {
            Some(f) => {
                lines.push(format!("firefox.extension_id: {}", f.credentials.extension_id));
                lines.push(format!("firefox.api_key: {}", f.credentials.api_key));
                lines.push(format!(
                    "firefox.api_secret: {}",
                    mask_secret(&f.credentials.api_secret)
                ));
                lines.push(format!("firefox.file: {}", f.file.display()));
                if let Some(src) = &f.source_file {
                    lines.push(format!("firefox.source_file: {}", src.display()));
                }
                lines.push(format!("firefox.channel: {}", f.channel));
                lines.push(format!("firefox.wait: {}", f.wait));
                lines.push(format!(
                    "firefox.poll_interval: {}",
                    humantime::format_duration(f.poll_interval)
                ));
                lines.push(format!(
                    "firefox.max_wait: {}",
                    humantime::format_duration(f.max_wait)
                ));
                if let Some(root) = &f.api_root {
                    lines.push(format!("firefox.api_root: {root}"));
                }
            }
            None => lines.push("firefox: (not configured)".to_string()),
        }
        lines
    }
}

/// Inputs for the Chrome branch
#[derive(Debug, Clone, PartialEq)]
pub struct ChromeInputs {
    pub credentials: ChromeCredentials,
    pub file: PathBuf,
    pub publish: bool,
    pub publish_target: PublishTarget,
    pub projection: Projection,
    pub api_root: Option<String>,
}

/// Inputs for the Firefox branch
#[derive(Debug, Clone, PartialEq)]
pub struct FirefoxInputs {
    pub credentials: FirefoxCredentials,
    pub file: PathBuf,
    pub source_file: Option<PathBuf>,
    pub channel: Channel,
    pub wait: bool,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub api_root: Option<String>,
}

/// Read one GitHub Action input (`INPUT_<NAME>`), treating blank as unset.
pub fn action_input(name: &str) -> Option<String> {
    let key = format!(
        "{ACTION_INPUT_PREFIX}{}",
        name.replace(' ', "_").to_uppercase()
    );
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a boolean the way the Actions toolkit does (YAML 1.2 core schema).
pub fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "true" | "True" | "TRUE" => Ok(true),
        "false" | "False" | "FALSE" => Ok(false),
        other => bail!(
            "input `{name}` does not meet YAML 1.2 \"Core Schema\" specification: `{other}` (use true or false)"
        ),
    }
}

/// Parse a humantime duration (`5s`, `2m`, `1m 30s`).
pub fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("invalid duration for `{name}`: {value}"))
}

fn pick<T: Clone>(preferred: &Option<T>, fallback: &Option<T>) -> Option<T> {
    preferred.as_ref().or(fallback.as_ref()).cloned()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(value: &Option<String>, store: &str, name: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| anyhow!("{store}: missing required input `{name}`"))
}

/// Load configuration from a directory
pub fn load_config(dir: &Path) -> Result<Config> {
    load_config_from_file(&config_path(dir))
}

/// Load configuration from a specific file path. A missing file yields an
/// empty layer.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Find configuration file by walking up the directory tree
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let config_file = current.join(CONFIG_FILE);
        if config_file.exists() {
            return Some(config_file);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}
