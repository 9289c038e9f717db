//! StratForge CLI — spec validation, compilation, sweeps, and batch runs.
//!
//! Commands:
//! - `validate` — check spec files locally without touching the network
//! - `compile` — generate program source from a spec
//! - `sweep` — expand a spec's parameter ranges into child spec files
//! - `run` — drive the full batch pipeline against the execution service
//! - `rank` — re-rank from saved validation artifacts, no network
//! - `status` — summarize the spec registry

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use stratforge_core::signals::Bar;
use stratforge_core::spec::{sweep, StrategySpec};
use stratforge_core::{compile, DateRange, Registry, SpecId};
use stratforge_runner::{
    rank, save_report, HttpExecutionService, Pipeline, PipelineConfig, RankCandidate,
    RankerConfig, SpecOutcome, ValidationResult,
};

#[derive(Parser)]
#[command(
    name = "stratforge",
    about = "StratForge CLI — strategy factory pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate spec files locally. Exits non-zero if any spec is invalid.
    Validate {
        /// Spec JSON files.
        #[arg(required = true)]
        specs: Vec<PathBuf>,
    },
    /// Compile a spec into program source.
    Compile {
        /// Spec JSON file.
        spec: PathBuf,

        /// Backtest start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// Backtest end date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Write the program here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Expand a spec's parameter ranges into child spec files.
    Sweep {
        /// Parent spec JSON file.
        spec: PathBuf,

        /// Directory for the generated child specs.
        #[arg(long, default_value = "sweep")]
        output_dir: PathBuf,
    },
    /// Run the full batch pipeline: compile, execute, validate, rank.
    Run {
        /// Pipeline config TOML.
        #[arg(long)]
        config: PathBuf,

        /// Spec JSON files to run.
        #[arg(required = true)]
        specs: Vec<PathBuf>,

        /// Reference index bars as CSV (date,open,high,low,close,volume),
        /// used for regime labels. Windows stay unlabeled without it.
        #[arg(long)]
        index: Option<PathBuf>,
    },
    /// Re-rank previously validated specs from their saved artifacts.
    Rank {
        /// Directory holding `validations/<spec_id>.json` from an earlier run.
        #[arg(long)]
        results: PathBuf,

        /// Where to write the regenerated report and summary.
        #[arg(long, default_value = "out")]
        output_dir: PathBuf,
    },
    /// Summarize the spec registry.
    Status {
        /// Registry directory.
        #[arg(long, default_value = "registry")]
        registry_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { specs } => run_validate(&specs),
        Commands::Compile { spec, start, end, output } => {
            run_compile(&spec, &start, &end, output.as_deref())
        }
        Commands::Sweep { spec, output_dir } => run_sweep(&spec, &output_dir),
        Commands::Run { config, specs, index } => {
            run_pipeline(&config, &specs, index.as_deref())
        }
        Commands::Rank { results, output_dir } => run_rank(&results, &output_dir),
        Commands::Status { registry_dir } => run_status(&registry_dir),
    }
}

fn load_spec(path: &Path) -> Result<StrategySpec> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("cannot read spec file {}", path.display()))?;
    StrategySpec::from_json(&json)
        .with_context(|| format!("spec {} failed validation", path.display()))
}

fn run_validate(paths: &[PathBuf]) -> Result<()> {
    let mut failed = 0usize;
    for path in paths {
        match load_spec(path) {
            Ok(spec) => println!("ok   {} ({})", path.display(), spec.id().short()),
            Err(err) => {
                eprintln!("FAIL {}: {err:#}", path.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} specs failed validation", paths.len());
    }
    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("'{s}' is not a YYYY-MM-DD date"))
}

fn run_compile(path: &Path, start: &str, end: &str, output: Option<&Path>) -> Result<()> {
    let spec = load_spec(path)?;
    let range = DateRange::new(parse_date(start)?, parse_date(end)?);
    let program = compile(&spec, range)?;

    match output {
        Some(out) => {
            fs::write(out, &program.source)?;
            println!(
                "{} -> {} (program {})",
                spec.id().short(),
                out.display(),
                program.program_hash.short()
            );
        }
        None => print!("{}", program.source),
    }
    Ok(())
}

fn run_sweep(path: &Path, output_dir: &Path) -> Result<()> {
    let spec = load_spec(path)?;
    let children = sweep::expand(&spec)?;
    if children.is_empty() {
        bail!("spec '{}' declares no parameter ranges", spec.name);
    }

    fs::create_dir_all(output_dir)?;
    for child in &children {
        let out = output_dir.join(format!("{}.json", child.id().short()));
        fs::write(&out, serde_json::to_string_pretty(child)?)?;
    }
    println!(
        "{} children of {} written to {}",
        children.len(),
        spec.id().short(),
        output_dir.display()
    );
    Ok(())
}

/// Load reference index bars from CSV: date,open,high,low,close,volume.
fn load_index(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("cannot read index CSV {}", path.display()))?;
    let mut bars = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < 6 {
            bail!("index CSV row has {} fields, expected 6", record.len());
        }
        bars.push(Bar {
            date: parse_date(&record[0])?,
            open: record[1].parse()?,
            high: record[2].parse()?,
            low: record[3].parse()?,
            close: record[4].parse()?,
            volume: record[5].parse()?,
        });
    }
    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

fn run_pipeline(config_path: &Path, spec_paths: &[PathBuf], index: Option<&Path>) -> Result<()> {
    let config = PipelineConfig::load(config_path)?;

    let mut specs = Vec::with_capacity(spec_paths.len());
    for path in spec_paths {
        specs.push(load_spec(path)?);
    }
    let index_bars = match index {
        Some(path) => load_index(path)?,
        None => Vec::new(),
    };

    let token = std::env::var(&config.service.token_env).with_context(|| {
        format!("API token env var {} is not set", config.service.token_env)
    })?;
    let service = HttpExecutionService::new(config.service.base_url.clone(), token);
    let pipeline = Pipeline::new(service, config)?;

    let batch = pipeline.run(&specs, &index_bars)?;
    for (spec_id, outcome) in &batch.outcomes {
        let line = match outcome {
            SpecOutcome::Ranked { score } => format!("ranked (score {score:.4})"),
            SpecOutcome::Disqualified { reasons } => format!("disqualified ({reasons:?})"),
            SpecOutcome::Inconclusive { reason } => format!("inconclusive: {reason}"),
            SpecOutcome::InvalidSpec { message } => format!("invalid spec: {message}"),
            SpecOutcome::CompileRejected { message } => format!("compile rejected: {message}"),
            SpecOutcome::Failed { message } => format!("failed: {message}"),
            SpecOutcome::TimedOut { waited_secs } => format!("timed out after {waited_secs}s"),
            SpecOutcome::ParseFailed { message } => format!("unparseable result: {message}"),
        };
        println!("{}  {line}", spec_id.short());
    }
    println!("Report written to {}", batch.paths.markdown.display());
    Ok(())
}

/// Rebuild the ranking from saved `validations/<spec_id>.json` artifacts.
fn run_rank(results: &Path, output_dir: &Path) -> Result<()> {
    let validation_dir = results.join("validations");
    let mut validations = Vec::new();
    for entry in fs::read_dir(&validation_dir)
        .with_context(|| format!("cannot read {}", validation_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("validation artifact has no file name")?;
        let json = fs::read_to_string(&path)?;
        let validation: ValidationResult = serde_json::from_str(&json)
            .with_context(|| format!("{} is not a validation artifact", path.display()))?;
        validations.push((SpecId(stem.to_string()), validation));
    }
    if validations.is_empty() {
        bail!("no validation artifacts under {}", validation_dir.display());
    }

    let candidates: Vec<RankCandidate> = validations
        .iter()
        .map(|(spec_id, validation)| RankCandidate {
            spec_id: spec_id.clone(),
            validation: validation.clone(),
        })
        .collect();
    let report = rank(&candidates, &RankerConfig::default());
    let paths = save_report(output_dir, &report, &validations)?;
    println!(
        "{} ranked, {} disqualified, {} for review; report at {}",
        report.ranked.len(),
        report.disqualified.len(),
        report.for_review.len(),
        paths.markdown.display()
    );
    Ok(())
}

fn run_status(registry_dir: &Path) -> Result<()> {
    let registry = Registry::open(registry_dir)?;
    let index = registry.index()?;
    if index.is_empty() {
        println!("registry is empty");
        return Ok(());
    }
    for (id, meta) in &index {
        let score = meta
            .best_score
            .map(|s| format!(" best {s:.4}"))
            .unwrap_or_default();
        let parent = meta
            .parent_id
            .as_ref()
            .map(|p| format!(" (child of {})", p.short()))
            .unwrap_or_default();
        println!("{}  {:?}{score}  {}{parent}", id.short(), meta.status, meta.name);
    }
    Ok(())
}
