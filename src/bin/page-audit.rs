//! CLI binary for webpage-audit.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AuditConfig` and either runs one audit or serves the HTTP API.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use webpage_audit::{
    attachment_filename, audit_to_file, AuditConfig, AuditProgressCallback, AuditServer,
    AuditStats, CaptureStrategy, PipelineStage, ProgressCallback,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner driven by real pipeline events.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl AuditProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: PipelineStage) {
        let (prefix, msg) = match stage {
            PipelineStage::Idle => ("Starting", ""),
            PipelineStage::Capturing => ("Capturing", "loading and scrolling the page…"),
            PipelineStage::Chunking => ("Chunking", "cutting bands…"),
            PipelineStage::Assembling => ("Assembling", "building the document…"),
            PipelineStage::Done | PipelineStage::Failed => return,
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_band_captured(&self, index: usize, total: usize) {
        self.bar.set_message(format!("band {}/{}", index + 1, total));
    }

    fn on_audit_complete(&self, stats: &AuditStats) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} chunks  {}",
            green("✔"),
            bold(&stats.chunk_count.to_string()),
            dim(&format!("{}x{} px", stats.source_width, stats.source_height)),
        );
    }

    fn on_audit_failed(&self, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Audit a page with local Chrome, write ./audit-report.docx
  page-audit capture https://example.com

  # Name the report
  page-audit capture https://example.com --report-name "Homepage Q3"

  # Use a remote screenshot provider instead of Chrome
  page-audit capture https://example.com --strategy remote \
      --provider-endpoint https://shots.example.com/v1/capture

  # Run the HTTP API
  page-audit serve --listen 0.0.0.0:3001
  curl -X POST localhost:3001/api/generate-audit \
      -H 'Content-Type: application/json' \
      -d '{"url":"https://example.com"}' -o report.docx

ENVIRONMENT VARIABLES:
  CHROME_PATH                Chrome/Chromium executable (skips discovery)
  AUDIT_STRATEGY             local | remote
  AUDIT_PROVIDER_ENDPOINT    Screenshot provider capture endpoint
  AUDIT_PROVIDER_KEY         Bearer token for the provider
  AUDIT_LISTEN               Listen address for `serve`
  RUST_LOG                   Overrides --verbose / --quiet
"#;

/// Capture web pages as DOCX audit reports.
#[derive(Parser, Debug)]
#[command(
    name = "page-audit",
    version,
    about = "Capture a full-page screenshot of a URL and package it as a DOCX report",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "AUDIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "AUDIT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Audit one URL and write the report to a file.
    Capture {
        /// Absolute http(s) URL of the page.
        url: String,

        /// Output file. Default: the sanitised report name, or audit-report.docx.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report name used for the default output file name.
        #[arg(long)]
        report_name: Option<String>,

        /// Print run statistics as JSON on stdout.
        #[arg(long)]
        json: bool,

        /// Disable the progress spinner.
        #[arg(long, env = "AUDIT_NO_PROGRESS")]
        no_progress: bool,

        #[command(flatten)]
        audit: AuditArgs,
    },

    /// Serve POST /api/generate-audit.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "AUDIT_LISTEN", default_value = "127.0.0.1:3001")]
        listen: String,

        #[command(flatten)]
        audit: AuditArgs,
    },
}

/// Flags shared by every subcommand that runs the pipeline.
#[derive(Args, Debug)]
struct AuditArgs {
    /// Capture strategy.
    #[arg(long, env = "AUDIT_STRATEGY", value_enum, default_value = "local")]
    strategy: StrategyArg,

    /// Screenshot provider endpoint (remote strategy).
    #[arg(long, env = "AUDIT_PROVIDER_ENDPOINT")]
    provider_endpoint: Option<String>,

    /// Bearer token for the screenshot provider.
    #[arg(long, env = "AUDIT_PROVIDER_KEY", hide_env_values = true)]
    provider_key: Option<String>,

    /// Chrome/Chromium executable (local strategy).
    #[arg(long, env = "CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Extra Chrome switch (repeatable), e.g. --chrome-arg=--proxy-server=host:3128.
    #[arg(long = "chrome-arg", value_name = "ARG", allow_hyphen_values = true)]
    chrome_args: Vec<String>,

    /// Maximum height of one embedded image, in pixels.
    #[arg(long, env = "AUDIT_CHUNK_HEIGHT", default_value_t = 1200,
          value_parser = clap::value_parser!(u32).range(1..))]
    chunk_height: u32,

    /// Display width of every image in the document, in CSS pixels.
    #[arg(long, env = "AUDIT_DISPLAY_WIDTH", default_value_t = 600.0)]
    display_width: f64,

    /// JPEG quality (1–100).
    #[arg(long, env = "AUDIT_JPEG_QUALITY", default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Overall deadline per audit, in seconds.
    #[arg(long, env = "AUDIT_DEADLINE", default_value_t = 60)]
    deadline: u64,

    /// Navigation timeout, in seconds (local strategy).
    #[arg(long, env = "AUDIT_NAV_TIMEOUT", default_value_t = 60)]
    nav_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Local,
    Remote,
}

impl From<StrategyArg> for CaptureStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Local => CaptureStrategy::LocalRenderer,
            StrategyArg::Remote => CaptureStrategy::RemoteProvider,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs for a single capture; `serve` has no
    // spinner and logs at INFO by default.
    let show_progress = match cli.command {
        Command::Capture {
            json, no_progress, ..
        } => !cli.quiet && !no_progress && !json,
        Command::Serve { .. } => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Capture {
            url,
            output,
            report_name,
            json,
            audit,
            ..
        } => {
            let progress_cb: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn AuditProgressCallback>)
            } else {
                None
            };
            let config = build_config(&audit, progress_cb)?;

            let output_path =
                output.unwrap_or_else(|| PathBuf::from(attachment_filename(report_name.as_deref())));
            let stats = audit_to_file(&url, &output_path, &config)
                .await
                .with_context(|| format!("Audit of {url} failed"))?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&stats).context("Failed to serialise stats")?
                );
            } else if !cli.quiet {
                eprintln!(
                    "   {}  →  {}",
                    dim(&format!(
                        "{} bytes, capture {}ms, total {}ms",
                        stats.document_bytes, stats.capture_ms, stats.total_ms
                    )),
                    bold(&output_path.display().to_string()),
                );
            }
        }
        Command::Serve { listen, audit } => {
            let config = build_config(&audit, None)?;
            let server = AuditServer::bind(&listen, config)
                .with_context(|| format!("Failed to bind {listen}"))?;
            if !cli.quiet {
                eprintln!(
                    "{} listening on {}",
                    green("●"),
                    bold(&format!("http://{}/api/generate-audit", server.local_addr()))
                );
            }
            let shutdown = server.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.shutdown();
                }
            });
            server.run().await.context("Server stopped")?;
        }
    }

    Ok(())
}

/// Map CLI args to `AuditConfig`.
fn build_config(args: &AuditArgs, progress: Option<ProgressCallback>) -> Result<AuditConfig> {
    let mut builder = AuditConfig::builder()
        .strategy(args.strategy.into())
        .chunk_height(args.chunk_height)
        .display_width(args.display_width)
        .jpeg_quality(args.jpeg_quality)
        .deadline_secs(args.deadline)
        .navigation_timeout_secs(args.nav_timeout);

    if let Some(ref endpoint) = args.provider_endpoint {
        builder = builder.provider_endpoint(endpoint.clone());
    }
    if let Some(ref key) = args.provider_key {
        builder = builder.provider_api_key(key.clone());
    }
    if let Some(ref path) = args.chrome_path {
        builder = builder.chrome_executable(path.clone());
    }
    for arg in &args.chrome_args {
        builder = builder.chrome_arg(arg.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
