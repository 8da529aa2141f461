use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use extship::config::{
    ChromeConfig, Config, FirefoxConfig, PackageConfig, find_config, load_config_from_file,
};
use extship::types::{Channel, Projection, PublishTarget};
use extship::{BranchOutcome, Reporter, RunReport};
use extship_amo::MozillaAddons;
use extship_chrome::ChromeWebStore;

#[derive(Parser, Debug)]
#[command(name = "extship", version)]
#[command(about = "Upload and publish browser extensions to the Chrome Web Store and addons.mozilla.org")]
struct Cli {
    /// Config file (default: nearest .extship.toml walking up from the working directory)
    #[arg(long, global = true, env = "EXTSHIP_CONFIG")]
    config: Option<PathBuf>,

    /// Packed extension archive (zip/xpi)
    #[arg(long, global = true, env = "EXTSHIP_FILE")]
    file: Option<PathBuf>,

    /// Source archive attached to the AMO version
    #[arg(long, global = true, env = "EXTSHIP_SOURCE_FILE")]
    source_file: Option<PathBuf>,

    /// Chrome Web Store item id
    #[arg(long, global = true, env = "EXTSHIP_CHROME_EXTENSION_ID")]
    chrome_extension_id: Option<String>,

    /// Google OAuth client id
    #[arg(long, global = true, env = "EXTSHIP_CHROME_CLIENT_ID")]
    chrome_client_id: Option<String>,

    /// Google OAuth client secret
    #[arg(long, global = true, env = "EXTSHIP_CHROME_CLIENT_SECRET", hide_env_values = true)]
    chrome_client_secret: Option<String>,

    /// Google OAuth refresh token
    #[arg(long, global = true, env = "EXTSHIP_CHROME_REFRESH_TOKEN", hide_env_values = true)]
    chrome_refresh_token: Option<String>,

    /// Publish the Chrome item after uploading
    #[arg(long, global = true, env = "EXTSHIP_PUBLISH", num_args = 0..=1, require_equals = true, default_missing_value = "true", value_parser = parse_flag)]
    publish: Option<bool>,

    /// Chrome publish audience (default, trustedTesters)
    #[arg(long, global = true, env = "EXTSHIP_PUBLISH_TARGET")]
    publish_target: Option<PublishTarget>,

    /// Chrome item projection for chrome-status (DRAFT, PUBLISHED)
    #[arg(long, global = true, env = "EXTSHIP_PROJECTION")]
    projection: Option<Projection>,

    /// Chrome Web Store API root (default: https://www.googleapis.com)
    #[arg(long, global = true, env = "EXTSHIP_CHROME_API_ROOT")]
    chrome_api_root: Option<String>,

    /// AMO add-on id or GUID
    #[arg(long, global = true, env = "EXTSHIP_FIREFOX_EXTENSION_ID")]
    firefox_extension_id: Option<String>,

    /// AMO JWT issuer
    #[arg(long, global = true, env = "EXTSHIP_FIREFOX_API_KEY")]
    firefox_api_key: Option<String>,

    /// AMO JWT secret
    #[arg(long, global = true, env = "EXTSHIP_FIREFOX_API_SECRET", hide_env_values = true)]
    firefox_api_secret: Option<String>,

    /// AMO distribution channel (listed, unlisted)
    #[arg(long, global = true, env = "EXTSHIP_CHANNEL")]
    channel: Option<Channel>,

    /// Wait for AMO to process the upload before creating a version
    #[arg(long, global = true, env = "EXTSHIP_WAIT", num_args = 0..=1, require_equals = true, default_missing_value = "true", value_parser = parse_flag)]
    wait: Option<bool>,

    /// Pause between AMO status checks (e.g. 5s)
    #[arg(long, global = true, env = "EXTSHIP_POLL_INTERVAL", value_parser = parse_duration)]
    poll_interval: Option<Duration>,

    /// Budget for AMO processing (e.g. 2m)
    #[arg(long, global = true, env = "EXTSHIP_MAX_WAIT", value_parser = parse_duration)]
    max_wait: Option<Duration>,

    /// AMO API root (default: https://addons.mozilla.org)
    #[arg(long, global = true, env = "EXTSHIP_FIREFOX_API_ROOT")]
    firefox_api_root: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload to every configured store (and publish / create a version).
    Publish,
    /// Show the Chrome Web Store item.
    ChromeStatus,
    /// Show the processing status of an AMO upload.
    FirefoxStatus {
        /// Upload UUID returned by a previous upload
        uuid: String,
    },
    /// Print the resolved configuration with secrets masked.
    Config,
}

struct CliReporter {
    github_actions: bool,
}

impl CliReporter {
    fn from_env() -> Self {
        Self {
            github_actions: env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true"),
        }
    }
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
        if self.github_actions {
            println!("::warning::{}", escape_workflow_data(msg));
        }
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
        if self.github_actions {
            println!("::error::{}", escape_workflow_data(msg));
        }
    }
}

/// Escape a message for a workflow command.
fn escape_workflow_data(msg: &str) -> String {
    msg.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_layers(&cli)?;
    let mut reporter = CliReporter::from_env();

    match cli.cmd {
        Commands::Publish => {
            let inputs = config.resolve()?;
            let report = extship::run(&inputs, &mut reporter);
            print_report(&report);
            write_github_outputs(&report)?;
            if !report.succeeded() {
                bail!("publish failed");
            }
        }
        Commands::ChromeStatus => run_chrome_status(&config, &mut reporter)?,
        Commands::FirefoxStatus { uuid } => run_firefox_status(&config, &uuid, &mut reporter)?,
        Commands::Config => {
            for line in config.resolve()?.describe() {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// File < action inputs < flags.
fn load_layers(cli: &Cli) -> Result<Config> {
    let file = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            load_config_from_file(path)?
        }
        None => {
            let cwd = env::current_dir().context("failed to read current directory")?;
            match find_config(&cwd) {
                Some(path) => load_config_from_file(&path)?,
                None => Config::default(),
            }
        }
    };
    let action = Config::from_action_env().context("invalid action input")?;
    Ok(file.merge(&action).merge(&cli_layer(cli)))
}

fn cli_layer(cli: &Cli) -> Config {
    Config {
        package: PackageConfig {
            file: cli.file.clone(),
            source_file: cli.source_file.clone(),
        },
        chrome: ChromeConfig {
            extension_id: cli.chrome_extension_id.clone(),
            client_id: cli.chrome_client_id.clone(),
            client_secret: cli.chrome_client_secret.clone(),
            refresh_token: cli.chrome_refresh_token.clone(),
            publish: cli.publish,
            publish_target: cli.publish_target,
            projection: cli.projection,
            api_root: cli.chrome_api_root.clone(),
        },
        firefox: FirefoxConfig {
            extension_id: cli.firefox_extension_id.clone(),
            api_key: cli.firefox_api_key.clone(),
            api_secret: cli.firefox_api_secret.clone(),
            channel: cli.channel,
            wait: cli.wait,
            poll_interval: cli.poll_interval,
            max_wait: cli.max_wait,
            api_root: cli.firefox_api_root.clone(),
        },
    }
}

fn parse_flag(s: &str) -> std::result::Result<bool, String> {
    extship::config::parse_bool("flag", s).map_err(|e| e.to_string())
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| format!("invalid duration `{s}`: {e}"))
}

fn print_report(report: &RunReport) {
    for branch in &report.branches {
        match &branch.outcome {
            BranchOutcome::Succeeded(summary) => {
                println!("{}: success: {}", branch.store, summary.describe());
            }
            BranchOutcome::Failed { kind, message } => {
                println!("{}: failure ({kind}): {message}", branch.store);
            }
        }
    }
}

fn write_github_outputs(report: &RunReport) -> Result<()> {
    let Some(path) = env::var_os("GITHUB_OUTPUT").filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    append_outputs(Path::new(&path), &report.outputs())
}

fn append_outputs(path: &Path, outputs: &[(&str, String)]) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open GITHUB_OUTPUT file {}", path.display()))?;
    for (name, value) in outputs {
        writeln!(f, "{name}={value}")
            .with_context(|| format!("failed to write GITHUB_OUTPUT file {}", path.display()))?;
    }
    Ok(())
}

fn run_chrome_status(config: &Config, reporter: &mut dyn Reporter) -> Result<()> {
    let Some(credentials) = config.chrome_credentials()? else {
        bail!("chrome is not configured: set a chrome extension id");
    };
    let mut store = ChromeWebStore::new(credentials)?;
    if let Some(root) = config.chrome.api_root.as_deref().filter(|r| !r.is_empty()) {
        store = store.with_root_url(root);
    }
    let projection = config.chrome.projection.unwrap_or_default();

    reporter.info(&format!(
        "fetching chrome item {} ({projection})",
        store.extension_id()
    ));
    let item = store
        .get_item(projection)
        .context("chrome item request failed")?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

fn run_firefox_status(config: &Config, uuid: &str, reporter: &mut dyn Reporter) -> Result<()> {
    let Some(credentials) = config.firefox_credentials()? else {
        bail!("firefox is not configured: set a firefox extension id");
    };
    let mut amo = MozillaAddons::new(credentials)?;
    if let Some(root) = config.firefox.api_root.as_deref().filter(|r| !r.is_empty()) {
        amo = amo.with_root_url(root);
    }

    reporter.info(&format!("fetching firefox upload {uuid}"));
    let status = amo
        .check_package_status(uuid)
        .context("firefox status request failed")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
