//! Specflow - spec-driven implementation pipeline
//!
//! Command-line entry point: batch feature runs, checkpoint resume, status
//! queries, state resets, and gate inspection.

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use specflow::agent::ClaudeAgent;
use specflow::config::ProjectConfig;
use specflow::error::{Result, SpecflowError};
use specflow::gates::{candidate_command, GateKind, GateRunner};
use specflow::orchestrator::ImplementationSummary;
use specflow::pipeline::Pipeline;
use specflow::state::StateStore;
use specflow::status::StatusDetector;

#[derive(Parser)]
#[command(name = "specflow")]
#[command(version = "0.1.0")]
#[command(about = "Spec-driven implementation pipeline with quality-gated retry loops", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one or more features
    Run {
        /// Feature identifiers; defaults to every feature under specs/
        features: Vec<String>,

        /// Feature description seeding the specify step
        #[arg(short, long, default_value = "")]
        description: String,

        /// Skip the test gate
        #[arg(long)]
        skip_tests: bool,

        /// Skip the lint gate
        #[arg(long)]
        skip_lint: bool,

        /// Skip the build gate
        #[arg(long)]
        skip_build: bool,

        /// Emit machine-readable JSON results
        #[arg(long)]
        json: bool,
    },

    /// Resume an interrupted run from the persisted checkpoint
    Resume {
        /// Feature to resume; defaults to the one recorded mid-run
        feature: Option<String>,
    },

    /// Show per-feature status, retry counts, and failing gates
    Status {
        /// Feature identifiers; defaults to everything known
        features: Vec<String>,

        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset feature state so a feature can be attempted again
    Reset {
        /// Feature to reset
        feature: Option<String>,

        /// Reset the entire pipeline state
        #[arg(long)]
        all: bool,
    },

    /// Show detected quality gates, optionally running them once
    Gates {
        /// Execute the detected gates and report results
        #[arg(long)]
        run: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "specflow=debug" } else { "specflow=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr so `--json` output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let project = cli.project;

    match cli.command {
        Commands::Run {
            features,
            description,
            skip_tests,
            skip_lint,
            skip_build,
            json,
        } => {
            let mut config = ProjectConfig::load(&project)?;
            if skip_tests {
                config.gates.test.enabled = false;
            }
            if skip_lint {
                config.gates.lint.enabled = false;
            }
            if skip_build {
                config.gates.build.enabled = false;
            }
            run_features(&project, &config, features, &description, json).await
        }

        Commands::Resume { feature } => {
            let config = ProjectConfig::load(&project)?;
            resume_run(&project, &config, feature).await
        }

        Commands::Status { features, json } => {
            let config = ProjectConfig::load(&project)?;
            show_status(&project, &config, features, json)
        }

        Commands::Reset { feature, all } => {
            let config = ProjectConfig::load(&project)?;
            reset_state(&project, &config, feature, all)
        }

        Commands::Gates { run } => {
            let config = ProjectConfig::load(&project)?;
            show_gates(&project, &config, run).await
        }
    }
}

/// Run the pipeline for every admitted feature, one at a time.
async fn run_features(
    project: &PathBuf,
    config: &ProjectConfig,
    features: Vec<String>,
    description: &str,
    json: bool,
) -> Result<i32> {
    let mut store = StateStore::open(config.state_dir(project))?;

    let ids = if features.is_empty() {
        discover_features(project, config)
    } else {
        features
    };

    if ids.is_empty() {
        println!("{}", "No features to run.".yellow());
        return Ok(0);
    }

    // Admission is the status detector's call alone: pending features, plus
    // failed ones still inside the retry budget.
    let admitted = {
        let detector = StatusDetector::new(&store, config);
        detector.filter_pending(&ids)
    };

    if admitted.is_empty() {
        println!(
            "{}",
            "Nothing eligible: every requested feature is completed, skipped, \
             or out of retries."
                .yellow()
        );
        return Ok(0);
    }

    let agent = ClaudeAgent::new(&config.agent);
    let gates = GateRunner::new(project, config);
    let pipeline = Pipeline::new(&agent, &gates, config, project);

    let progress = ProgressBar::new(admitted.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .expect("static progress template"),
    );

    let mut summaries: Vec<ImplementationSummary> = Vec::new();
    let mut failures = 0usize;

    for id in &admitted {
        progress.set_message(id.clone());

        match pipeline.run(&mut store, id, description, false).await {
            Ok(report) => {
                if let Some(result) = &report.implementation {
                    summaries.push(ImplementationSummary::from(result));
                }
                progress.println(format!("{} {id}", "✅".green()));
            }
            Err(e) if e.is_recoverable() => {
                // One feature failing must not sink the rest of the batch.
                failures += 1;
                progress.println(format!("{} {id}: {e}", "❌".red()));
            }
            Err(e) => return Err(e),
        }

        progress.inc(1);
    }

    progress.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print_batch_summary(&store, config, &admitted);
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

/// Resume from the persisted checkpoint.
async fn resume_run(
    project: &PathBuf,
    config: &ProjectConfig,
    feature: Option<String>,
) -> Result<i32> {
    let mut store = StateStore::open(config.state_dir(project))?;

    let feature_id = feature
        .or_else(|| store.state().current_feature_id.clone())
        .ok_or_else(|| {
            SpecflowError::config("no interrupted run recorded; nothing to resume")
        })?;

    let Some(checkpoint) = store.checkpoint() else {
        println!("{}", "No checkpoint recorded; run `specflow run` instead.".yellow());
        return Ok(0);
    };

    println!(
        "Resuming '{}' from step '{}'",
        feature_id.bold(),
        checkpoint.to_string().cyan()
    );

    let agent = ClaudeAgent::new(&config.agent);
    let gates = GateRunner::new(project, config);
    let pipeline = Pipeline::new(&agent, &gates, config, project);

    match pipeline.run(&mut store, &feature_id, "", true).await {
        Ok(_report) => {
            println!("{} {feature_id}", "✅".green());
            Ok(0)
        }
        Err(e) if e.is_recoverable() => {
            println!("{} {feature_id}: {e}", "❌".red());
            Ok(1)
        }
        Err(e) => Err(e),
    }
}

/// Print the status table or JSON report.
fn show_status(
    project: &PathBuf,
    config: &ProjectConfig,
    features: Vec<String>,
    json: bool,
) -> Result<i32> {
    let store = StateStore::open(config.state_dir(project))?;

    let ids = if features.is_empty() {
        let mut ids = discover_features(project, config);
        for (id, _) in store.features() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();
        ids
    } else {
        features
    };

    let detector = StatusDetector::new(&store, config);

    if json {
        let reports: std::collections::BTreeMap<&String, specflow::status::StatusReport> =
            ids.iter().map(|id| (id, detector.report(id))).collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(0);
    }

    if ids.is_empty() {
        println!("{}", "No features known.".yellow());
        return Ok(0);
    }

    println!(
        "{:<24} {:<12} {:>7}  {}",
        "FEATURE".bold(),
        "STATUS".bold(),
        "RETRIES".bold(),
        "FAILING GATES".bold()
    );

    for id in &ids {
        let report = detector.report(id);
        let status = colorize_status(report.status);
        let gates = if report.failed_checks.is_empty() {
            "-".to_string()
        } else {
            report
                .failed_checks
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("{id:<24} {status:<12} {:>7}  {gates}", report.retry_count);
    }

    let summary = detector.summary(&ids);
    println!(
        "\n{} total: {} completed, {} failed, {} pending",
        summary.total(),
        summary.completed.to_string().green(),
        summary.failed.to_string().red(),
        summary.pending
    );

    Ok(0)
}

/// Reset one feature or the whole pipeline.
fn reset_state(
    project: &PathBuf,
    config: &ProjectConfig,
    feature: Option<String>,
    all: bool,
) -> Result<i32> {
    let mut store = StateStore::open(config.state_dir(project))?;

    match (feature, all) {
        (_, true) => {
            store.reset_all();
            store.save()?;
            println!("{}", "Pipeline state reset.".green());
        }
        (Some(id), false) => {
            store.reset_feature(&id);
            store.save()?;
            println!("Feature '{}' reset to pending.", id.bold());
        }
        (None, false) => {
            return Err(SpecflowError::config(
                "pass a feature id or --all to reset",
            ));
        }
    }

    Ok(0)
}

/// Report gate detection, optionally executing the gates.
async fn show_gates(project: &PathBuf, config: &ProjectConfig, run: bool) -> Result<i32> {
    for kind in GateKind::ALL {
        let gate = config.gate(kind);
        let resolved = gate
            .command
            .clone()
            .or_else(|| candidate_command(project, kind));

        let line = match (&resolved, gate.enabled) {
            (_, false) => format!("{kind}: {}", "disabled".yellow()),
            (Some(cmd), true) => format!("{kind}: {}", cmd.cyan()),
            (None, true) => format!("{kind}: {}", "not detected".dimmed()),
        };
        println!("{line}");
    }

    if !run {
        return Ok(0);
    }

    let runner = GateRunner::new(project, config);
    let results = runner.run_all().await?;
    let mut failed = false;

    println!();
    for result in &results {
        println!("{}", result.summary());
        failed |= !result.passed;
    }

    Ok(if failed { 1 } else { 0 })
}

/// Color a status for terminal display.
fn colorize_status(status: specflow::state::FeatureStatus) -> colored::ColoredString {
    use specflow::state::FeatureStatus;
    let text = status.to_string();
    match status {
        FeatureStatus::Completed => text.green(),
        FeatureStatus::Failed => text.red(),
        FeatureStatus::InProgress | FeatureStatus::Testing => text.cyan(),
        FeatureStatus::Skipped => text.dimmed(),
        FeatureStatus::Pending => text.normal(),
    }
}

/// Feature ids are the subdirectories of the specs directory.
fn discover_features(project: &PathBuf, config: &ProjectConfig) -> Vec<String> {
    let specs_dir = config.specs_dir(project);
    let Ok(entries) = std::fs::read_dir(specs_dir) else {
        return Vec::new();
    };

    let mut ids: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    ids.sort();
    ids
}

fn print_batch_summary(store: &StateStore, config: &ProjectConfig, ids: &[String]) {
    let detector = StatusDetector::new(store, config);
    let summary = detector.summary(ids);
    println!(
        "\n{} feature(s): {} completed, {} failed",
        ids.len(),
        summary.completed.to_string().green(),
        summary.failed.to_string().red()
    );

    for id in ids {
        let report = detector.report(id);
        if !report.failed_checks.is_empty() {
            println!(
                "  {} {id}: failing gates: {}",
                "↳".dimmed(),
                report
                    .failed_checks
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
}
