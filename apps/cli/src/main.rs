//! zmqproxy
//!
//! Command-line entry point for the zmqhub relay.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use zmqhub_core::CspVersion;
use zmqhub_keystore::generate_keypair;
use zmqhub_logging::LogLevel;
use zmqhub_relay::{diagnostic_channel, run_sink, Hub, RelayContext, DIAGNOSTIC_QUEUE_DEPTH};
use zmqhub_settings::Settings;

/// zmqproxy - ZeroMQ XSUB/XPUB relay for CSP traffic
#[derive(Parser, Debug)]
#[command(name = "zmqproxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Print connection events and decoded packet headers
    #[arg(short, long)]
    debug: bool,

    /// CSP header version used to decode captured packets (1 or 2)
    #[arg(short = 'v', long = "csp-version")]
    csp_version: Option<CspVersion>,

    /// Subscriber-facing bind address (publishers connect here)
    #[arg(short = 's', long = "sub")]
    sub: Option<String>,

    /// Publisher-facing bind address (subscribers connect here)
    #[arg(short = 'p', long = "pub")]
    publ: Option<String>,

    /// Append captured packets to this file (requires --debug)
    #[arg(short = 'f', long)]
    logfile: Option<PathBuf>,

    /// Enable CURVE authentication and encryption
    #[arg(short, long)]
    auth: bool,

    /// Generate a new CURVE keypair and exit
    #[arg(short, long)]
    generate: bool,

    /// Secret key file (defaults to ~/zmqauth.cfg)
    #[arg(long)]
    keyfile: Option<PathBuf>,

    /// JSON settings file; command-line flags take precedence.
    /// Without it, ~/.config/zmqhub/zmqproxy.json is used when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Save the effective settings to the settings file and exit
    #[arg(long)]
    write_config: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    /// Merge the settings file (if any) with command-line overrides
    fn settings(&self) -> Result<Settings> {
        // An explicit file must exist; a typo must not fall back to defaults
        let mut settings = match &self.config {
            Some(path) => Settings::load_existing(path)
                .with_context(|| format!("Failed to load settings from {:?}", path))?,
            None => Settings::load_or_default().context("Failed to load default settings")?,
        };

        if self.debug {
            settings.capture.debug = true;
        }
        if let Some(version) = self.csp_version {
            settings.relay.csp_version = version;
        }
        if let Some(sub) = &self.sub {
            settings.relay.subscriber_endpoint = sub.clone();
        }
        if let Some(publ) = &self.publ {
            settings.relay.publisher_endpoint = publ.clone();
        }
        if let Some(logfile) = &self.logfile {
            settings.capture.log_file = Some(logfile.clone());
        }
        if self.auth {
            settings.security.auth = true;
        }
        if let Some(keyfile) = &self.keyfile {
            settings.security.keyfile = Some(keyfile.clone());
        }
        Ok(settings)
    }

    fn log_level(&self) -> LogLevel {
        if self.verbose {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate {
        let (public, secret) = generate_keypair().context("Failed to generate keypair")?;
        println!("Secret key: {}", secret);
        println!("Public key: {}", public);
        return Ok(());
    }

    zmqhub_logging::init(cli.log_level());

    let settings = cli.settings()?;
    if cli.write_config {
        settings.validate().context("Refusing to save invalid settings")?;
        settings.save().context("Failed to save settings")?;
        println!("Settings written to {}", settings.config_path().display());
        return Ok(());
    }
    run_relay(settings).await
}

async fn run_relay(settings: Settings) -> Result<()> {
    let ctx = RelayContext::new(settings).context("Failed to initialize relay")?;

    let (diagnostics, rx) = diagnostic_channel(DIAGNOSTIC_QUEUE_DEPTH);
    let sink = tokio::spawn(run_sink(rx, tokio::io::stdout()));

    let mut hub = Hub::start(&ctx, diagnostics).context("Failed to start relay")?;
    info!(
        "Forwarding {} <-> {}",
        hub.endpoints().subscriber,
        hub.endpoints().publisher
    );

    let outcome = tokio::select! {
        result = hub.wait() => result.context("Relay stopped unexpectedly"),
        signal = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
            signal.context("Failed to listen for Ctrl-C")
        }
    };

    let stopped = hub.shutdown().await.context("Relay shutdown failed");

    match sink.await {
        Ok(Ok(lines)) => debug!("Diagnostic sink wrote {} lines", lines),
        Ok(Err(e)) => warn!("Diagnostic output failed: {}", e),
        Err(e) => warn!("Diagnostic sink task failed: {}", e),
    }

    outcome?;
    stopped?;
    info!("Relay stopped");
    Ok(())
}
