use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use odds_automl::{
    batch::read_csv, BatchRunner, Cash, CsvDirectorySource, EngineConfig, EngineTelemetry,
    Evaluator, FailurePolicy, Objective, ResultsTable, SamplerKind,
};
use serde::Serialize;
use serde_json::json;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "odds", version, about = "AutoML outlier-detector selection over labelled datasets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Searches, retrains and evaluates every CSV in the data directory.
    Run(RunArgs),
    /// Searches a single CSV file and prints the trial log.
    Search {
        /// Labelled CSV file.
        #[arg(long)]
        file: PathBuf,
        #[command(flatten)]
        overrides: SearchOverrides,
    },
    /// Lists candidate families and their hyperparameter domains.
    Families {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Engine TOML; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    report_dir: Option<PathBuf>,
    #[arg(long)]
    table: Option<PathBuf>,
    /// Skip evaluation even when a `label` column exists.
    #[arg(long)]
    no_ground_truth: bool,
    /// Stop at the first failing dataset.
    #[arg(long)]
    fail_fast: bool,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long)]
    event_log: Option<PathBuf>,
    #[command(flatten)]
    overrides: SearchOverrides,
}

#[derive(Parser, Debug)]
struct SearchOverrides {
    #[arg(long)]
    max_evals: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// `tpe` or `random`.
    #[arg(long)]
    sampler: Option<SamplerKind>,
    /// `f1` or `roc_auc`.
    #[arg(long)]
    objective: Option<Objective>,
    /// Comma separated family ids, e.g. `knn,lof`.
    #[arg(long, value_delimiter = ',')]
    families: Vec<String>,
}

impl SearchOverrides {
    fn apply(self, config: &mut EngineConfig) {
        if let Some(max_evals) = self.max_evals {
            config.search.max_evals = max_evals;
        }
        if let Some(seed) = self.seed {
            config.search.seed = seed;
        }
        if let Some(sampler) = self.sampler {
            config.search.sampler = sampler;
        }
        if let Some(objective) = self.objective {
            config.search.objective = objective;
        }
        if !self.families.is_empty() {
            config.search.families = Some(self.families);
        }
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    run_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    evaluated: usize,
    reports: Vec<PathBuf>,
    failures: Vec<String>,
    table: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Search { file, overrides } => {
            let mut config = EngineConfig::default();
            overrides.apply(&mut config);
            config.validate()?;
            handle_search(&config, &file)
        }
        Commands::Families { config } => {
            let config = load_config(config.as_ref())?;
            for family in config.candidate_space()?.families() {
                println!("{}", family.id());
                for (name, domain) in family.space().iter() {
                    println!("    {name}: {domain}");
                }
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn handle_run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    args.overrides.apply(&mut config);
    if let Some(dir) = args.data_dir {
        config.batch.data_dir = dir;
    }
    if let Some(dir) = args.report_dir {
        config.batch.report_dir = dir;
    }
    if let Some(table) = args.table {
        config.batch.table_path = Some(table);
    }
    if args.no_ground_truth {
        config.batch.ground_truth = false;
    }
    if args.fail_fast {
        config.batch.failure_policy = FailurePolicy::Abort;
    }
    if args.log_file.is_some() {
        config.telemetry.log_path = args.log_file;
    }
    if args.event_log.is_some() {
        config.telemetry.event_log = args.event_log;
    }
    config.validate()?;
    if !config.batch.data_dir.is_dir() {
        bail!("data directory {} not found", config.batch.data_dir.display());
    }

    let telemetry = build_telemetry(&config)?;
    let cash = Cash::new(config.candidate_space()?, config.cash_settings());
    let runner = BatchRunner::new(cash, config.batch_settings()).with_telemetry(telemetry.clone());
    let source = CsvDirectorySource::new(&config.batch.data_dir);
    let outcome = runner
        .run(&source)
        .with_context(|| format!("batch over {}", config.batch.data_dir.display()))?;

    for report in &outcome.reports {
        match &report.metrics {
            Some(metrics) => println!(
                "{} | f1={:.4} | roc={:.4} | {:.3}s | {}",
                report.dataset, metrics.f1, metrics.roc_auc, metrics.elapsed_secs, metrics.model
            ),
            None => println!("{} | not evaluated | {}", report.dataset, report.best.configuration),
        }
    }
    for failure in &outcome.failures {
        eprintln!("FAILED {failure}");
    }
    if let Err(err) = telemetry.log(
        LogLevel::Info,
        "batch finished",
        json!({ "run_id": outcome.run_id, "evaluated": outcome.table.len() }),
    ) {
        eprintln!("telemetry log `batch finished` failed: {err:?}");
    }
    let summary = RunSummary {
        run_id: outcome.run_id,
        started_at: outcome.started_at,
        finished_at: Utc::now(),
        evaluated: outcome.table.len(),
        reports: outcome.reports.into_iter().map(|report| report.path).collect(),
        failures: outcome.failures.iter().map(ToString::to_string).collect(),
        table: config.batch.table_path,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn handle_search(config: &EngineConfig, file: &Path) -> Result<()> {
    let (data, labels) = read_csv(file)?;
    let cash = Cash::new(config.candidate_space()?, config.cash_settings());
    let outcome = cash
        .search(&data, labels.as_ref())
        .with_context(|| format!("searching {}", file.display()))?;
    println!("{}", outcome.log);
    match labels {
        Some(truth) => {
            let id = file
                .file_stem()
                .map_or_else(|| "dataset".into(), |stem| stem.to_string_lossy());
            let mut table = ResultsTable::new();
            let evaluation = Evaluator.evaluate(
                &*outcome.model,
                &data,
                &truth,
                &id,
                outcome.retrain_elapsed,
                &mut table,
            )?;
            println!("FINAL RESULT AFTER RETRAINING");
            print!("{}", evaluation.report.diagnostics);
        }
        None => println!("model: {}", outcome.model.describe()),
    }
    Ok(())
}

fn build_telemetry(config: &EngineConfig) -> Result<EngineTelemetry> {
    let mut builder = EngineTelemetry::builder("odds").min_level(config.telemetry.min_level);
    if let Some(path) = &config.telemetry.log_path {
        builder = builder.log_path(path);
    }
    if let Some(path) = &config.telemetry.event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    builder.build()
}
