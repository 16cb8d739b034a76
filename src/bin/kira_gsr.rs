use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_geneset_reconciler::authority::{CachedAuthority, HgncHttpClient};
use kira_geneset_reconciler::cache::{FileAuthorityCache, MemoryAuthorityCache};
use kira_geneset_reconciler::config::ConfigLoader;
use kira_geneset_reconciler::domain::LookupMode;
use kira_geneset_reconciler::error::KiraError;
use kira_geneset_reconciler::normalize::{accession_key, normalize, strip_version_prefix};
use kira_geneset_reconciler::output::{JsonOutput, NormalizedValue, OutputMode, progress_sink};
use kira_geneset_reconciler::pipeline::Reconciler;

#[derive(Parser)]
#[command(name = "kira-gsr")]
#[command(about = "Reconcile gene identities across curated gene-set tables")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Merge all configured sources into one reconciled table")]
    Reconcile(ReconcileArgs),
    #[command(about = "Look up one identifier at the authority")]
    Lookup(LookupArgs),
    #[command(about = "Show the normalized forms of a value")]
    Normalize(NormalizeArgs),
}

#[derive(Args)]
struct ReconcileArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct LookupArgs {
    query: String,

    #[arg(long, value_enum, default_value_t = LookupMode::Symbol)]
    mode: LookupMode,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    no_cache: bool,
}

#[derive(Args)]
struct NormalizeArgs {
    value: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::MissingRequiredInput(_) => 2,
        KiraError::SchemaMismatch { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Verbose
    };

    match cli.command {
        Commands::Reconcile(args) => run_reconcile(args, output_mode),
        Commands::Lookup(args) => run_lookup(args),
        Commands::Normalize(args) => {
            let value = NormalizedValue {
                normalized: normalize(&args.value),
                accession_key: accession_key(&args.value),
                numeric: strip_version_prefix(&args.value),
                input: args.value,
            };
            JsonOutput::print_normalized(&value).into_diagnostic()
        }
    }
}

fn run_reconcile(args: ReconcileArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let client = HgncHttpClient::with_base_url(&config.authority.base_url)?;
    let sink = progress_sink(output_mode);

    let summary = if args.no_cache {
        let reconciler = Reconciler::new(CachedAuthority::new(client, MemoryAuthorityCache::new()));
        reconciler.run(&config, sink)?
    } else {
        let cache = FileAuthorityCache::open(cache_path(config.authority.cache_path.clone())?)?;
        let reconciler = Reconciler::new(CachedAuthority::new(client, cache));
        reconciler.run(&config, sink)?
    };

    JsonOutput::print_summary(&summary).into_diagnostic()
}

fn run_lookup(args: LookupArgs) -> miette::Result<()> {
    let client = match &args.base_url {
        Some(url) => HgncHttpClient::with_base_url(url)?,
        None => HgncHttpClient::new()?,
    };

    let record = if args.no_cache {
        CachedAuthority::new(client, MemoryAuthorityCache::new()).lookup(&args.query, args.mode)
    } else {
        let cache = FileAuthorityCache::open(cache_path(None)?)?;
        CachedAuthority::new(client, cache).lookup(&args.query, args.mode)
    };

    JsonOutput::print_record(&record).into_diagnostic()
}

fn cache_path(configured: Option<Utf8PathBuf>) -> Result<Utf8PathBuf, KiraError> {
    match configured {
        Some(path) => Ok(path),
        None => FileAuthorityCache::default_path(),
    }
}
