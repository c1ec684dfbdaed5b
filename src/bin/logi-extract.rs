//! CLI binary for logi-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use logi_extract::{
    run_batch, BatchProgressCallback, BatchSummary, ExtractionConfig, ProgressCallback,
    SchemaVariant,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the pending documents plus a log
/// line per document.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start time of the document in flight.
    current: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading existing results…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            current: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.current
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize, already_processed: usize, pending: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(pending as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("Found {total} PDF files")),
            dim(&format!(
                "already processed {already_processed}, remaining {pending}"
            )),
        ));
    }

    fn on_document_start(&self, _index: usize, _pending: usize, document: &str) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(Instant::now());
        }
        self.bar.set_message(document.to_string());
    }

    fn on_document_complete(&self, index: usize, pending: usize, document: &str, rows: usize) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            green("✓"),
            index,
            pending,
            document,
            dim(&format!("{rows} rows")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, pending: usize, document: &str, error: &str) {
        let secs = self.elapsed_secs();
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 100 {
            let head: String = error.chars().take(99).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            index,
            pending,
            document,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_commit_error(&self, error: &str) {
        self.bar
            .println(format!("  {} {}", cyan("⚠"), red(&format!("save failed: {error}"))));
    }

    fn on_batch_complete(&self, attempted: usize, succeeded: usize, total_rows: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} documents extracted  {}",
                green("✔"),
                bold(&succeeded.to_string()),
                dim(&format!("{total_rows} rows in table")),
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed, retried on next run)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                attempted,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every PDF in a folder into Results.xlsx (resumes automatically)
  logi-extract run ./invoices -o Results.xlsx

  # One row per invoice instead of one row per container
  logi-extract run ./invoices -o Summary.xlsx --variant invoice-summary

  # Custom field instructions, no pause between documents
  logi-extract run ./invoices --prompt-file fields.txt --delay-ms 0

  # Use another provider through edgequake-llm
  logi-extract run ./invoices --provider openai --model gpt-4.1

  # Serve the upload API on port 5000
  logi-extract serve --port 5000 -o Results.xlsx

OUTPUT:
  .xlsx and .csv are supported; the format follows the extension.
  Documents already present in the output are skipped. Failed documents
  are not written and are attempted again on the next run.

ENVIRONMENT VARIABLES:
  GOOGLE_API_KEY / GEMINI_API_KEY  Gemini API key (default backend)
  OPENAI_API_KEY, ANTHROPIC_API_KEY, …  Keys for --provider backends
  LOGI_OUTPUT                      Output table path
  LOGI_VARIANT                     container-lines | invoice-summary
  RUST_LOG                         Override log filter
"#;

/// Extract logistics invoice fields from PDFs into a spreadsheet.
#[derive(Parser, Debug)]
#[command(
    name = "logi-extract",
    version,
    about = "Extract logistics invoice fields from PDFs into a resumable spreadsheet",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LOGI_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LOGI_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every PDF in a directory, skipping those already in the output.
    Run(RunArgs),
    /// Serve the HTTP upload API.
    #[cfg(feature = "server")]
    Serve(ServeArgs),
}

/// Options shared by `run` and `serve`.
#[derive(Args, Debug)]
struct ModelArgs {
    /// Output table layout.
    #[arg(long, env = "LOGI_VARIANT", value_enum, default_value = "container-lines")]
    variant: VariantArg,

    /// Model ID (default: gemini-2.5-flash).
    #[arg(long, env = "LOGI_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider for `run`: openai, anthropic, ollama, … (default: Gemini REST).
    /// `serve` accepts only the default.
    #[arg(long, env = "LOGI_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file with custom field instructions.
    #[arg(long, env = "LOGI_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Max model output tokens per document.
    #[arg(long, env = "LOGI_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "LOGI_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per document on transient model failures.
    #[arg(long, env = "LOGI_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "LOGI_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum VariantArg {
    /// One row per container (file_name, …, container_number, gross_weight).
    ContainerLines,
    /// One row per invoice (filename, …, total_payable_amount).
    InvoiceSummary,
}

impl From<VariantArg> for SchemaVariant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::ContainerLines => SchemaVariant::ContainerLines,
            VariantArg::InvoiceSummary => SchemaVariant::InvoiceSummary,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory containing the PDF files.
    #[arg(env = "LOGI_SOURCE_DIR")]
    source_dir: PathBuf,

    /// Output table (.xlsx or .csv).
    #[arg(short, long, env = "LOGI_OUTPUT", default_value = "Results.xlsx")]
    output: PathBuf,

    /// Google API key (otherwise GOOGLE_API_KEY / GEMINI_API_KEY).
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Pause between documents in milliseconds.
    #[arg(long, env = "LOGI_DELAY_MS", default_value_t = 1000)]
    delay_ms: u64,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "LOGI_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    model: ModelArgs,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "LOGI_HOST", default_value = "127.0.0.1")]
    host: std::net::IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "LOGI_PORT", default_value_t = 5000)]
    port: u16,

    /// Output table (.xlsx or .csv).
    #[arg(short, long, env = "LOGI_OUTPUT", default_value = "Results.xlsx")]
    output: PathBuf,

    #[command(flatten)]
    model: ModelArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress && !args.json,
        #[cfg(feature = "server")]
        Command::Serve(_) => false,
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
        Command::Run(args) => run(args, cli.quiet, show_progress).await,
        #[cfg(feature = "server")]
        Command::Serve(args) => serve(args).await,
    }
}

async fn run(args: RunArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let mut builder = build_config(&args.model)
        .await?
        .inter_document_delay_ms(args.delay_ms);
    if let Some(ref key) = args.api_key {
        builder = builder.api_key(key.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let summary = run_batch(&args.source_dir, &args.output, &config)
        .await
        .context("Batch failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    eprintln!(
        "{}  {}/{} documents  {} rows added  {}ms  →  {}",
        if summary.failed() == 0 {
            green("✔")
        } else {
            cyan("⚠")
        },
        summary.succeeded,
        summary.attempted,
        summary.rows_added,
        summary.total_duration_ms,
        bold(&summary.output.display().to_string()),
    );
    eprintln!(
        "   {} total rows  /  {} documents still pending",
        dim(&summary.total_rows.to_string()),
        dim(&summary.remaining().to_string()),
    );
    for failure in &summary.failures {
        eprintln!("   {} {}", red("✗"), failure);
    }
    if !summary.persisted {
        eprintln!(
            "   {} the output file could not be written; rerun to retry",
            red("✘")
        );
    }
}

#[cfg(feature = "server")]
async fn serve(args: ServeArgs) -> Result<()> {
    use logi_extract::service::{serve as serve_http, ServiceState};
    use logi_extract::TableSink;

    check_serve_provider(args.model.provider.as_deref())?;
    let config = build_config(&args.model)
        .await?
        .build()
        .context("Invalid configuration")?;
    let sink = TableSink::new(&args.output).context("Invalid output path")?;
    let state = ServiceState::new(sink, config);

    let addr = std::net::SocketAddr::new(args.host, args.port);
    eprintln!(
        "{} {}  {}",
        cyan("◆"),
        bold(&format!("Serving on http://{addr}")),
        dim(&format!("results → {}", args.output.display())),
    );
    serve_http(addr, state).await.context("Server failed")
}

/// The service builds a Gemini backend per request from the uploaded API
/// key, so only the default provider is accepted.
#[cfg(feature = "server")]
fn check_serve_provider(provider: Option<&str>) -> Result<()> {
    match provider.map(str::trim) {
        None | Some("") => Ok(()),
        Some(p) if p.eq_ignore_ascii_case("google") => Ok(()),
        Some(p) => anyhow::bail!(
            "`serve` only supports the Gemini backend (got --provider {p}); \
             use `run` for other providers"
        ),
    }
}

/// Map shared CLI args to an `ExtractionConfig` builder.
async fn build_config(args: &ModelArgs) -> Result<logi_extract::ExtractionConfigBuilder> {
    let mut builder = ExtractionConfig::builder()
        .variant(args.variant.into())
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout);

    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt file {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    Ok(builder)
}
