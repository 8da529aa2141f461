//! Upload and publish browser extensions to the Chrome Web Store and
//! addons.mozilla.org.
//!
//! A run has up to two branches, one per configured store. They run one
//! after the other (Chrome first) and are isolated: a failure in one is
//! logged and recorded in the [`RunReport`] but never stops the other.
//!
//! ```no_run
//! use extship::{Reporter, run};
//! use extship_config::load_config;
//! use std::path::Path;
//!
//! struct Stderr;
//! impl Reporter for Stderr {
//!     fn info(&mut self, msg: &str) { eprintln!("{msg}") }
//!     fn warn(&mut self, msg: &str) { eprintln!("{msg}") }
//!     fn error(&mut self, msg: &str) { eprintln!("{msg}") }
//! }
//!
//! let inputs = load_config(Path::new("."))?.resolve()?;
//! let report = run(&inputs, &mut Stderr);
//! assert!(report.succeeded());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use extship_amo::{MozillaAddons, PollPolicy};
use extship_chrome::ChromeWebStore;
use extship_config::{ChromeInputs, FirefoxInputs, Inputs};
use extship_types::{ErrorKind, Package, Store, StoreError};
use serde::Serialize;

pub use extship_config as config;
pub use extship_types as types;

/// Sink for progress and failure messages.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Result of one run: one entry per configured store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub branches: Vec<BranchReport>,
}

impl RunReport {
    /// True when at least one branch ran and none failed.
    pub fn succeeded(&self) -> bool {
        !self.branches.is_empty() && self.branches.iter().all(BranchReport::succeeded)
    }

    pub fn branch(&self, store: Store) -> Option<&BranchReport> {
        self.branches.iter().find(|b| b.store == store)
    }

    /// Step outputs in the shape the GitHub Action publishes them.
    ///
    /// Each store reports `success`, `failure` or `skipped`. The Firefox
    /// upload UUID and version are present only when known.
    pub fn outputs(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("chrome_status", self.status_of(Store::Chrome).to_string()),
            ("firefox_status", self.status_of(Store::Firefox).to_string()),
        ];
        if let Some(BranchOutcome::Succeeded(BranchSummary::Firefox(ff))) =
            self.branch(Store::Firefox).map(|b| &b.outcome)
        {
            out.push(("firefox_upload_uuid", ff.upload_uuid.clone()));
            if let Some(version) = &ff.version {
                out.push(("firefox_version", version.clone()));
            }
        }
        out
    }

    fn status_of(&self, store: Store) -> &'static str {
        match self.branch(store) {
            None => "skipped",
            Some(b) if b.succeeded() => "success",
            Some(_) => "failure",
        }
    }
}

/// Outcome of a single store branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchReport {
    pub store: Store,
    pub outcome: BranchOutcome,
}

impl BranchReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, BranchOutcome::Succeeded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOutcome {
    Succeeded(BranchSummary),
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSummary {
    Chrome(ChromeSummary),
    Firefox(FirefoxSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChromeSummary {
    pub item_id: String,
    pub upload_state: Option<String>,
    pub crx_version: Option<String>,
    /// Publish status list; `None` when publishing was not requested
    pub publish_status: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirefoxSummary {
    pub upload_uuid: String,
    pub processed: bool,
    pub version_id: Option<u64>,
    pub version: Option<String>,
    pub edit_url: Option<String>,
}

impl BranchSummary {
    pub fn describe(&self) -> String {
        match self {
            BranchSummary::Chrome(c) => {
                let mut s = format!(
                    "item {} uploaded (state {})",
                    c.item_id,
                    c.upload_state.as_deref().unwrap_or("unknown")
                );
                if let Some(v) = &c.crx_version {
                    s.push_str(&format!(", version {v}"));
                }
                if let Some(status) = &c.publish_status {
                    s.push_str(&format!(", publish status {}", status.join(", ")));
                }
                s
            }
            BranchSummary::Firefox(f) => match (&f.version, f.version_id) {
                (Some(version), Some(id)) => {
                    format!("upload {} created version {version} (id {id})", f.upload_uuid)
                }
                _ if f.processed => format!("upload {} processed", f.upload_uuid),
                _ => format!("upload {} submitted, not waiting for processing", f.upload_uuid),
            },
        }
    }
}

/// Run every configured branch and collect the outcomes.
pub fn run(inputs: &Inputs, reporter: &mut dyn Reporter) -> RunReport {
    let mut report = RunReport::default();

    if inputs.is_empty() {
        reporter.error("no store configured: set a chrome or firefox extension id");
        return report;
    }

    if let Some(chrome) = &inputs.chrome {
        let result = run_chrome(chrome, reporter).map(BranchSummary::Chrome);
        report.branches.push(finish(Store::Chrome, result, reporter));
    }

    if let Some(firefox) = &inputs.firefox {
        let result = run_firefox(firefox, reporter).map(BranchSummary::Firefox);
        report.branches.push(finish(Store::Firefox, result, reporter));
    }

    report
}

fn finish(store: Store, result: Result<BranchSummary>, reporter: &mut dyn Reporter) -> BranchReport {
    let outcome = match result {
        Ok(summary) => {
            reporter.info(&format!("{store}: {}", summary.describe()));
            BranchOutcome::Succeeded(summary)
        }
        Err(err) => {
            let kind = classify(&err);
            let message = format!("{err:#}");
            reporter.error(&format!("{store}: {kind} error: {message}"));
            BranchOutcome::Failed { kind, message }
        }
    };
    BranchReport { store, outcome }
}

/// Classify a branch failure by the store error somewhere in its chain.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StoreError>())
        .map(StoreError::kind)
        .unwrap_or(ErrorKind::Local)
}

/// Upload to the Chrome Web Store and optionally publish.
pub fn run_chrome(inputs: &ChromeInputs, reporter: &mut dyn Reporter) -> Result<ChromeSummary> {
    let package = read_package(&inputs.file)?;
    let mut store = chrome_client(inputs)?;

    reporter.info(&format!(
        "chrome: uploading {} ({} bytes) to item {}",
        package.file_name,
        package.len(),
        store.extension_id()
    ));
    let item = store
        .upload_package(&package.bytes)
        .context("chrome upload failed")?;

    if item.upload_failed() {
        return Err(StoreError::Rejected(format!(
            "upload state FAILURE: {}",
            item.error_summary()
        )))
        .context("chrome upload failed");
    }
    if item.upload_in_progress() {
        reporter.warn("chrome: upload is still IN_PROGRESS on the store side");
    }

    let mut summary = ChromeSummary {
        item_id: item.id,
        upload_state: item.upload_state,
        crx_version: item.crx_version,
        publish_status: None,
    };

    if inputs.publish {
        reporter.info(&format!(
            "chrome: publishing item {} to {}",
            summary.item_id, inputs.publish_target
        ));
        let published = store
            .publish(inputs.publish_target)
            .context("chrome publish failed")?;
        if !published.is_accepted() {
            return Err(StoreError::Rejected(format!(
                "publish status {}",
                published.detail()
            )))
            .context("chrome publish failed");
        }
        summary.publish_status = Some(published.status);
    }

    Ok(summary)
}

/// Upload to addons.mozilla.org, wait for validation and create a version.
pub fn run_firefox(inputs: &FirefoxInputs, reporter: &mut dyn Reporter) -> Result<FirefoxSummary> {
    let package = read_package(&inputs.file)?;
    let source = inputs
        .source_file
        .as_deref()
        .map(read_package)
        .transpose()?;
    let amo = firefox_client(inputs)?;

    reporter.info(&format!(
        "firefox: uploading {} ({} bytes) to the {} channel",
        package.file_name,
        package.len(),
        inputs.channel
    ));
    let status = amo
        .upload_package(&package, inputs.channel, inputs.wait)
        .context("firefox upload failed")?;
    reporter.info(&format!("firefox: upload uuid {}", status.uuid));

    if status.is_rejected() {
        let messages = status.validation_messages();
        return Err(StoreError::Rejected(format!(
            "validation failed with {} error(s){}",
            status.validation_errors(),
            if messages.is_empty() {
                String::new()
            } else {
                format!(": {}", messages.join("; "))
            }
        )))
        .context("firefox upload failed");
    }

    let mut summary = FirefoxSummary {
        upload_uuid: status.uuid.clone(),
        processed: status.processed,
        version_id: None,
        version: status.version.clone(),
        edit_url: None,
    };

    if !inputs.wait {
        reporter.info("firefox: not waiting for processing; skipping version creation");
        return Ok(summary);
    }

    let version = amo
        .create_version(&status.uuid, source.as_ref())
        .context("firefox version creation failed")?;
    summary.version_id = Some(version.id);
    summary.version = Some(version.version);
    summary.edit_url = version.edit_url;

    Ok(summary)
}

fn read_package(path: &Path) -> Result<Package> {
    Package::read(path).with_context(|| format!("failed to read package {}", path.display()))
}

fn chrome_client(inputs: &ChromeInputs) -> Result<ChromeWebStore> {
    let store = ChromeWebStore::new(inputs.credentials.clone())
        .context("failed to create Chrome Web Store client")?;
    Ok(match &inputs.api_root {
        Some(root) => store.with_root_url(root),
        None => store,
    })
}

fn firefox_client(inputs: &FirefoxInputs) -> Result<MozillaAddons> {
    let amo = MozillaAddons::new(inputs.credentials.clone())
        .context("failed to create addons.mozilla.org client")?
        .with_poll_policy(PollPolicy {
            interval: inputs.poll_interval,
            max_wait: inputs.max_wait,
        });
    Ok(match &inputs.api_root {
        Some(root) => amo.with_root_url(root),
        None => amo,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use extship_types::{
        Channel, ChromeCredentials, FirefoxCredentials, Projection, PublishTarget,
    };
    use tempfile::{TempDir, tempdir};
    use tiny_http::{Header, Response, Server, StatusCode};

    use super::*;

    const ITEM_ID: &str = "ecnglinljpjkbgmdpeiglonddahpbkeb";
    const ADDON_ID: &str = "addon@example.com";
    const UUID: &str = "5f0b4cc4aa8e4d6c9b0b1d2a3e4f5a6b";

    #[derive(Default)]
    struct CollectingReporter {
        infos: Vec<String>,
        warns: Vec<String>,
        errors: Vec<String>,
    }

    impl Reporter for CollectingReporter {
        fn info(&mut self, msg: &str) {
            self.infos.push(msg.to_string());
        }

        fn warn(&mut self, msg: &str) {
            self.warns.push(msg.to_string());
        }

        fn error(&mut self, msg: &str) {
            self.errors.push(msg.to_string());
        }
    }

    struct TestServer {
        base_url: String,
        seen: Arc<Mutex<Vec<String>>>,
        handle: thread::JoinHandle<()>,
    }

    impl TestServer {
        fn join(self) -> Vec<String> {
            self.handle.join().expect("join server");
            let seen = self.seen.lock().expect("lock");
            seen.clone()
        }
    }

    /// One server stands in for both stores; routes are `"METHOD /url"`.
    fn spawn_stores(
        mut routes: BTreeMap<String, Vec<(u16, String)>>,
        expected_requests: usize,
    ) -> TestServer {
        let server = Server::http("127.0.0.1:0").expect("server");
        let base_url = format!("http://{}", server.server_addr());
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen_thread = Arc::clone(&seen);

        let handle = thread::spawn(move || {
            for _ in 0..expected_requests {
                let mut req = server.recv().expect("request");
                let mut body = Vec::new();
                req.as_reader().read_to_end(&mut body).expect("body");
                let key = format!("{} {}", req.method(), req.url());
                seen_thread.lock().expect("lock").push(key.clone());

                let (status, body) = match routes.get_mut(&key) {
                    Some(list) if list.len() > 1 => list.remove(0),
                    Some(list) if list.len() == 1 => list[0].clone(),
                    _ => (404, "{}".to_string()),
                };
                let resp = Response::from_string(body)
                    .with_status_code(StatusCode(status))
                    .with_header(
                        Header::from_bytes("Content-Type", "application/json").expect("header"),
                    );
                req.respond(resp).expect("respond");
            }
        });

        TestServer {
            base_url,
            seen,
            handle,
        }
    }

    fn routes(entries: &[(&str, &[(u16, &str)])]) -> BTreeMap<String, Vec<(u16, String)>> {
        entries
            .iter()
            .map(|(key, list)| {
                (
                    key.to_string(),
                    list.iter().map(|(s, b)| (*s, b.to_string())).collect(),
                )
            })
            .collect()
    }

    fn write_package(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"PK\x03\x04fake").expect("write package");
        path
    }

    fn chrome_inputs(base_url: &str, file: PathBuf, publish: bool) -> ChromeInputs {
        ChromeInputs {
            credentials: ChromeCredentials {
                extension_id: ITEM_ID.to_string(),
                client_id: "client".to_string(),
                client_secret: None,
                refresh_token: "refresh".to_string(),
            },
            file,
            publish,
            publish_target: PublishTarget::Default,
            projection: Projection::Draft,
            api_root: Some(base_url.to_string()),
        }
    }

    fn firefox_inputs(base_url: &str, file: PathBuf, wait: bool) -> FirefoxInputs {
        FirefoxInputs {
            credentials: FirefoxCredentials {
                extension_id: ADDON_ID.to_string(),
                api_key: "user:1:2".to_string(),
                api_secret: "secret".to_string(),
            },
            file,
            source_file: None,
            channel: Channel::Listed,
            wait,
            poll_interval: Duration::from_millis(1),
            max_wait: Duration::from_millis(3),
            api_root: Some(base_url.to_string()),
        }
    }

    const TOKEN_OK: &str = r#"{"access_token":"ya29.token"}"#;
    const UPLOAD_OK: &str = r#"{"kind":"chromewebstore#item","id":"ecnglinljpjkbgmdpeiglonddahpbkeb","uploadState":"SUCCESS","crxVersion":"1.2.0"}"#;
    const PUBLISH_OK: &str = r#"{"kind":"chromewebstore#item","item_id":"ecnglinljpjkbgmdpeiglonddahpbkeb","status":["OK"],"statusDetail":["Published."]}"#;

    fn chrome_upload_key() -> String {
        format!("PUT /upload/chromewebstore/v1.1/items/{ITEM_ID}")
    }

    fn chrome_publish_key() -> String {
        format!("POST /chromewebstore/v1.1/items/{ITEM_ID}/publish?publishTarget=default")
    }

    fn amo_pending() -> String {
        format!(r#"{{"uuid":"{UUID}","processed":false,"submitted":false,"valid":null}}"#)
    }

    fn amo_processed(valid: bool) -> String {
        format!(
            r#"{{"uuid":"{UUID}","processed":true,"submitted":false,"valid":{valid},"version":"1.2.0","validation":{{"errors":{},"messages":[{{"type":"error","message":"manifest.json is invalid"}}]}}}}"#,
            if valid { 0 } else { 1 }
        )
    }

    fn amo_version_key() -> String {
        format!("POST /api/v5/addons/addon/{ADDON_ID}/versions/")
    }

    fn amo_status_key() -> String {
        format!("GET /api/v5/addons/upload/{UUID}/")
    }

    #[test]
    fn empty_inputs_fail_the_run() {
        let mut reporter = CollectingReporter::default();
        let report = run(
            &Inputs {
                chrome: None,
                firefox: None,
            },
            &mut reporter,
        );
        assert!(!report.succeeded());
        assert!(report.branches.is_empty());
        assert_eq!(reporter.errors.len(), 1);
        assert!(reporter.errors[0].contains("no store configured"));
    }

    #[test]
    fn chrome_upload_and_publish_succeeds() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.zip");
        let upload_key = chrome_upload_key();
        let publish_key = chrome_publish_key();
        let server = spawn_stores(
            routes(&[
                ("POST /oauth2/v4/token", &[(200, TOKEN_OK)]),
                (upload_key.as_str(), &[(200, UPLOAD_OK)]),
                (publish_key.as_str(), &[(200, PUBLISH_OK)]),
            ]),
            3,
        );

        let mut reporter = CollectingReporter::default();
        let inputs = Inputs {
            chrome: Some(chrome_inputs(&server.base_url, file, true)),
            firefox: None,
        };
        let report = run(&inputs, &mut reporter);
        let seen = server.join();

        assert!(report.succeeded(), "{report:?}");
        assert_eq!(seen, vec!["POST /oauth2/v4/token".to_string(), upload_key, publish_key]);
        match &report.branches[0].outcome {
            BranchOutcome::Succeeded(BranchSummary::Chrome(c)) => {
                assert_eq!(c.item_id, ITEM_ID);
                assert_eq!(c.crx_version.as_deref(), Some("1.2.0"));
                assert_eq!(c.publish_status, Some(vec!["OK".to_string()]));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(reporter.errors.is_empty());
    }

    #[test]
    fn chrome_upload_failure_state_is_rejected_without_publish() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.zip");
        let upload_key = chrome_upload_key();
        let failed = r#"{"id":"ecnglinljpjkbgmdpeiglonddahpbkeb","uploadState":"FAILURE","itemError":[{"error_code":"PKG_INVALID_VERSION_NUMBER","error_detail":"version must be greater"}]}"#;
        let server = spawn_stores(
            routes(&[
                ("POST /oauth2/v4/token", &[(200, TOKEN_OK)]),
                (upload_key.as_str(), &[(200, failed)]),
            ]),
            2,
        );

        let mut reporter = CollectingReporter::default();
        let result = run_chrome(&chrome_inputs(&server.base_url, file, true), &mut reporter);
        server.join();

        let err = result.unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Rejected);
        assert!(format!("{err:#}").contains("PKG_INVALID_VERSION_NUMBER"));
    }

    #[test]
    fn chrome_in_progress_upload_warns() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.zip");
        let upload_key = chrome_upload_key();
        let in_progress = r#"{"id":"ecnglinljpjkbgmdpeiglonddahpbkeb","uploadState":"IN_PROGRESS"}"#;
        let server = spawn_stores(
            routes(&[
                ("POST /oauth2/v4/token", &[(200, TOKEN_OK)]),
                (upload_key.as_str(), &[(200, in_progress)]),
            ]),
            2,
        );

        let mut reporter = CollectingReporter::default();
        let summary = run_chrome(&chrome_inputs(&server.base_url, file, false), &mut reporter)
            .expect("chrome branch");
        server.join();

        assert_eq!(summary.upload_state.as_deref(), Some("IN_PROGRESS"));
        assert_eq!(summary.publish_status, None);
        assert_eq!(reporter.warns.len(), 1);
    }

    #[test]
    fn chrome_publish_not_ok_is_rejected() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.zip");
        let upload_key = chrome_upload_key();
        let publish_key = chrome_publish_key();
        let not_ok = r#"{"item_id":"ecnglinljpjkbgmdpeiglonddahpbkeb","status":["ITEM_NOT_UPDATABLE"],"statusDetail":["Item is not updatable."]}"#;
        let server = spawn_stores(
            routes(&[
                ("POST /oauth2/v4/token", &[(200, TOKEN_OK)]),
                (upload_key.as_str(), &[(200, UPLOAD_OK)]),
                (publish_key.as_str(), &[(200, not_ok)]),
            ]),
            3,
        );

        let mut reporter = CollectingReporter::default();
        let err = run_chrome(&chrome_inputs(&server.base_url, file, true), &mut reporter)
            .unwrap_err();
        server.join();

        assert_eq!(classify(&err), ErrorKind::Rejected);
        assert!(format!("{err:#}").contains("Item is not updatable."));
    }

    #[test]
    fn malformed_token_response_is_auth_error_and_nothing_uploaded() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.zip");
        let server = spawn_stores(
            routes(&[("POST /oauth2/v4/token", &[(200, r#"{"token_type":"Bearer"}"#)])]),
            1,
        );

        let mut reporter = CollectingReporter::default();
        let report = run(
            &Inputs {
                chrome: Some(chrome_inputs(&server.base_url, file, true)),
                firefox: None,
            },
            &mut reporter,
        );
        let seen = server.join();

        assert_eq!(seen.len(), 1);
        assert!(!report.succeeded());
        match &report.branches[0].outcome {
            BranchOutcome::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::Auth),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn missing_package_is_local_error() {
        let td = tempdir().expect("tempdir");
        let mut reporter = CollectingReporter::default();
        let inputs = chrome_inputs("http://127.0.0.1:9", td.path().join("missing.zip"), false);

        let err = run_chrome(&inputs, &mut reporter).unwrap_err();
        assert_eq!(classify(&err), ErrorKind::Local);
        assert!(err.to_string().contains("failed to read package"));
    }

    #[test]
    fn firefox_waits_then_creates_version() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.xpi");
        let pending = amo_pending();
        let processed = amo_processed(true);
        let status_key = amo_status_key();
        let version_key = amo_version_key();
        let version_body =
            r#"{"id":5512,"version":"1.2.0","channel":"listed","edit_url":"https://addons.mozilla.org/developers/addon/x/versions/5512"}"#;
        let server = spawn_stores(
            routes(&[
                ("POST /api/v5/addons/upload/", &[(201, pending.as_str())]),
                (status_key.as_str(), &[(200, pending.as_str()), (200, processed.as_str())]),
                (version_key.as_str(), &[(201, version_body)]),
            ]),
            4,
        );

        let mut reporter = CollectingReporter::default();
        let summary = run_firefox(&firefox_inputs(&server.base_url, file, true), &mut reporter)
            .expect("firefox branch");
        let seen = server.join();

        assert_eq!(
            seen,
            vec![
                "POST /api/v5/addons/upload/".to_string(),
                status_key.clone(),
                status_key,
                version_key,
            ]
        );
        assert_eq!(summary.upload_uuid, UUID);
        assert_eq!(summary.version_id, Some(5512));
        assert_eq!(summary.version.as_deref(), Some("1.2.0"));
        assert!(summary.edit_url.is_some());
    }

    #[test]
    fn firefox_validation_failure_is_rejected() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.xpi");
        let rejected = amo_processed(false);
        let server = spawn_stores(
            routes(&[("POST /api/v5/addons/upload/", &[(201, rejected.as_str())])]),
            1,
        );

        let mut reporter = CollectingReporter::default();
        let err = run_firefox(&firefox_inputs(&server.base_url, file, true), &mut reporter)
            .unwrap_err();
        server.join();

        assert_eq!(classify(&err), ErrorKind::Rejected);
        let message = format!("{err:#}");
        assert!(message.contains("1 error(s)"));
        assert!(message.contains("manifest.json is invalid"));
    }

    #[test]
    fn firefox_timeout_is_classified() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.xpi");
        let pending = amo_pending();
        let status_key = amo_status_key();
        // max_wait 3ms / interval 1ms = 3 status checks
        let server = spawn_stores(
            routes(&[
                ("POST /api/v5/addons/upload/", &[(201, pending.as_str())]),
                (status_key.as_str(), &[(200, pending.as_str())]),
            ]),
            4,
        );

        let mut reporter = CollectingReporter::default();
        let err = run_firefox(&firefox_inputs(&server.base_url, file, true), &mut reporter)
            .unwrap_err();
        let seen = server.join();

        assert_eq!(seen.len(), 4);
        assert_eq!(classify(&err), ErrorKind::Timeout);
        assert!(format!("{err:#}").contains("validation wait exceeded"));
    }

    #[test]
    fn firefox_without_wait_stops_after_upload() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.xpi");
        let pending = amo_pending();
        let server = spawn_stores(
            routes(&[("POST /api/v5/addons/upload/", &[(201, pending.as_str())])]),
            1,
        );

        let mut reporter = CollectingReporter::default();
        let summary = run_firefox(&firefox_inputs(&server.base_url, file, false), &mut reporter)
            .expect("firefox branch");
        server.join();

        assert_eq!(summary.upload_uuid, UUID);
        assert!(!summary.processed);
        assert_eq!(summary.version_id, None);
        assert!(
            BranchSummary::Firefox(summary)
                .describe()
                .contains("not waiting")
        );
    }

    #[test]
    fn chrome_failure_does_not_stop_firefox() {
        let td = tempdir().expect("tempdir");
        let file = write_package(&td, "ext.zip");
        let upload_key = chrome_upload_key();
        let publish_key = chrome_publish_key();
        let processed = amo_processed(true);
        let version_key = amo_version_key();
        let server = spawn_stores(
            routes(&[
                ("POST /oauth2/v4/token", &[(200, TOKEN_OK)]),
                (upload_key.as_str(), &[(200, UPLOAD_OK)]),
                (publish_key.as_str(), &[(500, r#"{"error":"backend"}"#)]),
                ("POST /api/v5/addons/upload/", &[(201, processed.as_str())]),
                (version_key.as_str(), &[(201, r#"{"id":7,"version":"1.2.0"}"#)]),
            ]),
            5,
        );

        let mut reporter = CollectingReporter::default();
        let inputs = Inputs {
            chrome: Some(chrome_inputs(&server.base_url, file.clone(), true)),
            firefox: Some(firefox_inputs(&server.base_url, file, true)),
        };
        let report = run(&inputs, &mut reporter);
        let seen = server.join();

        assert_eq!(seen.len(), 5);
        assert!(!report.succeeded());

        let chrome = report.branch(Store::Chrome).expect("chrome branch");
        match &chrome.outcome {
            BranchOutcome::Failed { kind, message } => {
                assert_eq!(*kind, ErrorKind::Api);
                assert!(message.contains("500"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(report.branch(Store::Firefox).expect("firefox").succeeded());
        assert_eq!(reporter.errors.len(), 1);
        assert!(reporter.errors[0].starts_with("chrome: api error"));

        let outputs: BTreeMap<&str, String> = report.outputs().into_iter().collect();
        insta::assert_yaml_snapshot!(outputs, @r#"
        chrome_status: failure
        firefox_status: success
        firefox_upload_uuid: 5f0b4cc4aa8e4d6c9b0b1d2a3e4f5a6b
        firefox_version: 1.2.0
        "#);
    }

    #[test]
    fn outputs_mark_unconfigured_store_skipped() {
        let report = RunReport {
            branches: vec![BranchReport {
                store: Store::Chrome,
                outcome: BranchOutcome::Succeeded(BranchSummary::Chrome(ChromeSummary {
                    item_id: ITEM_ID.to_string(),
                    upload_state: Some("SUCCESS".to_string()),
                    crx_version: None,
                    publish_status: None,
                })),
            }],
        };
        assert!(report.succeeded());
        assert_eq!(
            report.outputs(),
            vec![
                ("chrome_status", "success".to_string()),
                ("firefox_status", "skipped".to_string()),
            ]
        );
    }

    #[test]
    fn report_serializes_outcomes() {
        let report = RunReport {
            branches: vec![BranchReport {
                store: Store::Firefox,
                outcome: BranchOutcome::Failed {
                    kind: ErrorKind::Timeout,
                    message: "timed out: validation wait exceeded".to_string(),
                },
            }],
        };
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["branches"][0]["store"], "firefox");
        assert_eq!(json["branches"][0]["outcome"]["failed"]["kind"], "timeout");
    }
}
