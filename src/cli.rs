//! CLI surface: argument parsing, configuration layering, and the runtime
//! entrypoints. Library code never exits the process; this module maps
//! errors to the documented exit codes.

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing::error;

use bioetl_config::{load, LoadOptions};
use bioetl_engine::{Pipeline, PipelineOptions};
use bioetl_http::ReqwestTransport;
use bioetl_schema::SchemaRegistry;
use bioetl_util::logging::init_tracing;
use bioetl_util::{CancelToken, EtlError, ExitCode};

#[derive(Parser)]
#[command(
    name = "bioetl",
    version,
    about = "Deterministic ETL engine for bioactivity dataset acquisition"
)]
struct Cli {
    /// Verbose structured logging.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute the pipeline: Extract → Normalize → Validate → Load.
    Run(RunArgs),
    /// Print the resolved configuration and its fingerprint.
    Config(ConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to a YAML configuration profile.
    #[arg(long)]
    config: Option<String>,

    /// Override a configuration key (repeatable), e.g.
    /// `--set http.max_attempts=3`.
    #[arg(long = "set", value_name = "KEY.PATH=VALUE")]
    set: Vec<String>,

    /// Keep only the first N input identifiers.
    #[arg(long)]
    limit: Option<usize>,

    /// Keep a deterministic fraction of input identifiers, in (0, 1].
    #[arg(long)]
    sample: Option<f64>,

    /// Seed for the deterministic sampler.
    #[arg(long)]
    sample_seed: Option<u64>,

    /// Compare committed artifacts byte-exactly against this directory.
    #[arg(long)]
    golden: Option<Utf8PathBuf>,

    /// Execute Extract + Normalize + Validate; skip Load.
    #[arg(long)]
    dry_run: bool,

    /// Elevate schema major-version drift to a hard error.
    #[arg(long)]
    fail_on_schema_drift: bool,

    /// Reject undeclared fields from enrichment sources.
    #[arg(long)]
    strict_enrichment: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to a YAML configuration profile.
    #[arg(long)]
    config: Option<String>,

    /// Override a configuration key (repeatable).
    #[arg(long = "set", value_name = "KEY.PATH=VALUE")]
    set: Vec<String>,
}

/// CLI entrypoint. Returns the exit code on failure; prints a one-line
/// error kind to stderr and structured diagnostics to the log.
///
/// # Errors
///
/// The mapped [`ExitCode`] for any failure.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();
    let _ = init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => run_pipeline(args),
        Command::Config(args) => show_config(args),
    }
}

fn run_pipeline(args: RunArgs) -> Result<(), ExitCode> {
    let mut overrides = args.set.clone();
    if let Some(limit) = args.limit {
        overrides.push(format!("input.limit={limit}"));
    }
    if let Some(sample) = args.sample {
        overrides.push(format!("input.sample={sample}"));
    }
    if let Some(seed) = args.sample_seed {
        overrides.push(format!("input.sample_seed={seed}"));
    }
    if args.fail_on_schema_drift {
        overrides.push("validation.strict_schema_drift=true".into());
    }
    if args.strict_enrichment {
        overrides.push("validation.strict_enrichment=true".into());
    }

    let resolved = load(&LoadOptions {
        profile: args.config.clone(),
        overrides,
        env: None,
    })
    .map_err(|e| {
        eprintln!("{}: {e}", e.kind());
        ExitCode::CLI_ARGS
    })?;

    let transport = ReqwestTransport::new(
        std::time::Duration::from_secs(resolved.config.http.connect_timeout_secs),
        &resolved.config.http.user_agent,
    )
    .map_err(|e| {
        eprintln!("Network: {e}");
        ExitCode::INTERNAL
    })?;

    let cancel = CancelToken::new();
    let pipeline = Pipeline::new(
        resolved,
        SchemaRegistry::builtin(),
        Arc::new(transport),
        cancel.clone(),
    );
    let options = PipelineOptions {
        dry_run: args.dry_run,
        golden: args.golden.clone(),
    };

    let runtime = tokio::runtime::Runtime::new().map_err(|e| {
        eprintln!("Internal: failed to start runtime: {e}");
        ExitCode::INTERNAL
    })?;

    let outcome = runtime.block_on(async {
        let ctrl_c_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c_cancel.cancel();
            }
        });
        pipeline.run(&options).await
    });

    match outcome {
        Ok(summary) => {
            println!(
                "run {} complete: {} rows, {} artifact(s), release {}",
                summary.run_id,
                summary.rows,
                summary.artifacts.len(),
                summary.release
            );
            for warning in &summary.warnings {
                eprintln!("warning: {warning}");
            }
            Ok(())
        }
        Err(err) => Err(report(&err)),
    }
}

fn show_config(args: ConfigArgs) -> Result<(), ExitCode> {
    let resolved = load(&LoadOptions {
        profile: args.config,
        overrides: args.set,
        env: None,
    })
    .map_err(|e| {
        eprintln!("{}: {e}", e.kind());
        ExitCode::CLI_ARGS
    })?;

    let rendered = serde_json::to_string_pretty(&resolved.config)
        .unwrap_or_else(|_| "<unserializable>".to_string());
    println!("{rendered}");
    println!("fingerprint: {}", resolved.fingerprint);
    for (key, source) in &resolved.attribution {
        println!("override: {key} ({source:?})");
    }
    Ok(())
}

/// One-line kind on stderr; full chain in the structured log.
fn report(err: &EtlError) -> ExitCode {
    eprintln!("{}: {err}", err.kind());
    error!(kind = err.kind(), error = %err, "run failed");
    err.to_exit_code()
}
