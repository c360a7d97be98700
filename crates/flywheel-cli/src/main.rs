//! Compliance Flywheel CLI
//!
//! The `flywheel` command evaluates agent traces against compliance scenario
//! catalogs and drives the self-improvement loop.
//!
//! ## Commands
//!
//! - `evaluate`: Score a trace set against a domain catalog (CI gate)
//! - `run`: Run the flywheel with pre-staged remediated trace sets
//! - `calibrate`: Check risk-score consistency across repeated evaluations
//! - `catalog`: List the scenarios of a domain
//!
//! Exit codes: 0 clean, 1 critical violations remain, 2 could not run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn, Level};

use flywheel_core::{
    calibrate, evaluate_gate, normalize_all, read_history_artifact, score, write_history_artifact,
    EvaluationResult, Evaluator, ExitStatus, FlywheelConfig, FlywheelController, GateVerdict,
    HistoryArtifact, HttpJudge, HttpJudgeConfig, JudgeService, NormalizedTrace, RiskAssessment,
    ScenarioCatalog, SkippedTrace, StagedTraceRemediator,
};

#[derive(Parser)]
#[command(name = "flywheel")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compliance scenario evaluation and self-improvement flywheel", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Flywheel config file (TOML)
    #[arg(short, long, global = true, env = "FLYWHEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Scenario catalog file (JSON); defaults to the built-in catalogs
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a trace set and gate on unresolved critical violations
    Evaluate {
        /// Scenario domain (finance, security, ml_governance, ...)
        #[arg(short, long)]
        domain: String,

        /// Trace file (one trace or an array of traces, JSON)
        #[arg(short, long)]
        traces: PathBuf,

        /// Restrict evaluation to these scenario ids
        #[arg(short, long)]
        scenario: Vec<String>,

        /// External judge endpoint for rationale generation
        #[arg(long, env = "FLYWHEEL_JUDGE_URL")]
        judge_url: Option<String>,

        /// Write the report to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the flywheel using pre-staged remediated trace sets
    Run {
        #[arg(short, long)]
        domain: String,

        /// Baseline trace file
        #[arg(short, long)]
        traces: PathBuf,

        /// Directory holding iteration-<n>.json trace sets
        #[arg(long)]
        stages: PathBuf,

        /// Root directory for run history artifacts
        #[arg(long, default_value = ".flywheel/runs")]
        artifacts_dir: PathBuf,

        /// Resume the run with this id from its history artifact
        #[arg(long)]
        resume: Option<String>,

        #[arg(long, env = "FLYWHEEL_JUDGE_URL")]
        judge_url: Option<String>,
    },

    /// Evaluate the same traces repeatedly and check score variance
    Calibrate {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        traces: PathBuf,

        /// Number of repeated evaluations
        #[arg(short, long, default_value = "5")]
        runs: usize,

        #[arg(long, env = "FLYWHEEL_JUDGE_URL")]
        judge_url: Option<String>,
    },

    /// List the scenarios of a domain (or all domains)
    Catalog {
        #[arg(short, long)]
        domain: Option<String>,
    },
}

#[derive(Serialize)]
struct EvaluationReport<'a> {
    domain: &'a str,
    catalog_version: &'a str,
    assessment: RiskAssessment,
    gate: GateVerdict,
    skipped: Vec<SkippedTrace>,
    results: Vec<EvaluationResult>,
    judge_cost: f64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    flywheel_core::init_tracing(cli.json, level);

    match dispatch(cli).await {
        Ok(status) => ExitCode::from(status.code() as u8),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(ExitStatus::CouldNotRun.code() as u8)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitStatus> {
    let config = load_config(cli.config.as_deref())?;
    let catalog = Arc::new(load_catalog(cli.catalog.as_deref())?);

    match cli.command {
        Commands::Evaluate {
            domain,
            traces,
            scenario,
            judge_url,
            output,
        } => {
            cmd_evaluate(
                &catalog,
                &config,
                &domain,
                &traces,
                &scenario,
                judge_url,
                output.as_deref(),
            )
            .await
        }
        Commands::Run {
            domain,
            traces,
            stages,
            artifacts_dir,
            resume,
            judge_url,
        } => {
            cmd_run(
                catalog,
                config,
                &domain,
                &traces,
                &stages,
                &artifacts_dir,
                resume.as_deref(),
                judge_url,
            )
            .await
        }
        Commands::Calibrate {
            domain,
            traces,
            runs,
            judge_url,
        } => cmd_calibrate(&catalog, &config, &domain, &traces, runs, judge_url).await,
        Commands::Catalog { domain } => cmd_catalog(&catalog, domain.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<FlywheelConfig> {
    let config = match path {
        Some(p) => FlywheelConfig::from_toml_file(p)
            .with_context(|| format!("loading config {}", p.display()))?,
        None => FlywheelConfig::default(),
    };
    let config = config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn load_catalog(path: Option<&Path>) -> Result<ScenarioCatalog> {
    match path {
        Some(p) => ScenarioCatalog::from_json_file(p)
            .with_context(|| format!("loading catalog {}", p.display())),
        None => Ok(ScenarioCatalog::builtin()?),
    }
}

fn load_traces(path: &Path) -> Result<(Vec<NormalizedTrace>, Vec<SkippedTrace>)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading traces {}", path.display()))?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let (traces, skipped) = normalize_all(raw);
    for s in &skipped {
        warn!(trace_id = %s.trace_id, reason = %s.reason, "trace could not be normalized");
    }
    Ok((traces, skipped))
}

fn build_judge(url: Option<String>) -> Result<Option<Arc<dyn JudgeService>>> {
    let Some(endpoint) = url else {
        return Ok(None);
    };
    let judge = HttpJudge::new(HttpJudgeConfig {
        endpoint,
        ..HttpJudgeConfig::default()
    })?;
    Ok(Some(Arc::new(judge)))
}

fn evaluator(config: &FlywheelConfig, judge_url: Option<String>) -> Result<Evaluator> {
    let evaluator = Evaluator::new(config.evaluator.clone());
    Ok(match build_judge(judge_url)? {
        Some(judge) => evaluator.with_judge(judge),
        None => evaluator,
    })
}

fn write_output<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn cmd_evaluate(
    catalog: &ScenarioCatalog,
    config: &FlywheelConfig,
    domain: &str,
    traces_path: &Path,
    scenario_ids: &[String],
    judge_url: Option<String>,
    output: Option<&Path>,
) -> Result<ExitStatus> {
    let scenarios = if scenario_ids.is_empty() {
        catalog.scenarios_for(domain)?.to_vec()
    } else {
        catalog.select(domain, scenario_ids)?
    };
    let (traces, mut skipped) = load_traces(traces_path)?;

    let batch = evaluator(config, judge_url)?
        .evaluate_batch(&traces, &scenarios)
        .await;
    skipped.extend(batch.skipped);
    if batch.results.is_empty() {
        anyhow::bail!("no evaluable traces in {} ({} skipped)", traces_path.display(), skipped.len());
    }

    let assessment = score(&batch.results)?;
    let gate = evaluate_gate(&batch.results);
    let status = gate.status;

    write_output(
        &EvaluationReport {
            domain,
            catalog_version: catalog.version(),
            assessment,
            gate,
            skipped,
            results: batch.results,
            judge_cost: batch.judge_cost,
        },
        output,
    )?;
    Ok(status)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    catalog: Arc<ScenarioCatalog>,
    config: FlywheelConfig,
    domain: &str,
    traces_path: &Path,
    stages: &Path,
    artifacts_dir: &Path,
    resume: Option<&str>,
    judge_url: Option<String>,
) -> Result<ExitStatus> {
    let (traces, _) = load_traces(traces_path)?;

    let remediator = Arc::new(StagedTraceRemediator::new(stages));
    let mut controller = FlywheelController::new(catalog, domain, config, remediator)?;
    if let Some(judge) = build_judge(judge_url)? {
        controller = controller.with_judge(judge);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next iteration boundary");
            let _ = cancel_tx.send(true);
        }
    });
    controller = controller.with_cancellation(cancel_rx);

    let report = match resume {
        Some(run_id) => {
            let artifact = read_history_artifact(run_id, artifacts_dir)
                .with_context(|| format!("loading history for {run_id}"))?;
            controller = controller.with_run_id(run_id);
            controller.resume(traces, artifact.history).await?
        }
        None => controller.run(traces).await?,
    };

    let path = write_history_artifact(&HistoryArtifact::from_report(&report), artifacts_dir)?;
    info!(
        run_id = %report.run_id,
        outcome = %report.outcome.state(),
        iterations = report.iterations(),
        cost = report.total_cost,
        artifact = %path.display(),
        "flywheel run finished"
    );

    let gate = evaluate_gate(&report.final_results);
    write_output(&report, None)?;
    Ok(gate.status)
}

async fn cmd_calibrate(
    catalog: &ScenarioCatalog,
    config: &FlywheelConfig,
    domain: &str,
    traces_path: &Path,
    runs: usize,
    judge_url: Option<String>,
) -> Result<ExitStatus> {
    let scenarios = catalog.scenarios_for(domain)?;
    let (traces, _) = load_traces(traces_path)?;
    let evaluator = evaluator(config, judge_url)?;
    let report = calibrate(
        &evaluator,
        &traces,
        scenarios,
        runs,
        config.consistency_variance_limit,
    )
    .await?;
    write_output(&report, None)?;
    Ok(ExitStatus::Clean)
}

fn cmd_catalog(catalog: &ScenarioCatalog, domain: Option<&str>) -> Result<ExitStatus> {
    let domains: Vec<String> = match domain {
        Some(d) => vec![d.to_string()],
        None => catalog.domains().map(str::to_string).collect(),
    };
    println!("Catalog version {} ({})", catalog.version(), &catalog.digest()[..12]);
    for d in &domains {
        println!();
        println!("{d}:");
        for s in catalog.scenarios_for(d)? {
            println!(
                "  {:<32} {:<9} {:<18} {}",
                s.id,
                s.severity,
                s.category.strategy(),
                s.name
            );
        }
    }
    Ok(ExitStatus::Clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_traces(dir: &Path, value: serde_json::Value) -> PathBuf {
        let path = dir.join("traces.json");
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn test_cli_parses_evaluate() {
        let cli = Cli::try_parse_from([
            "flywheel", "--json", "evaluate", "-d", "finance", "-t", "traces.json", "-s", "fin-pii-exposure",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Evaluate { domain, scenario, .. } => {
                assert_eq!(domain, "finance");
                assert_eq!(scenario, vec!["fin-pii-exposure"]);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[tokio::test]
    async fn test_evaluate_clean_trace_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let traces = write_traces(
            dir.path(),
            json!([{"trace_id": "ok", "steps": [{"kind": "text", "output": "Your balance is available."}]}]),
        );
        let out = dir.path().join("report.json");
        let catalog = ScenarioCatalog::builtin().unwrap();
        let status = cmd_evaluate(
            &catalog,
            &FlywheelConfig::default(),
            "finance",
            &traces,
            &[],
            None,
            Some(&out),
        )
        .await
        .unwrap();
        assert_eq!(status, ExitStatus::Clean);
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(report["assessment"]["risk_level"], "LOW");
    }

    #[tokio::test]
    async fn test_evaluate_ssn_leak_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let traces = write_traces(
            dir.path(),
            json!({"trace_id": "leak", "steps": [{"kind": "text", "output": "SSN: 123-45-6789"}]}),
        );
        let catalog = ScenarioCatalog::builtin().unwrap();
        let status = cmd_evaluate(
            &catalog,
            &FlywheelConfig::default(),
            "finance",
            &traces,
            &[],
            None,
            Some(&dir.path().join("r.json")),
        )
        .await
        .unwrap();
        assert_eq!(status, ExitStatus::CriticalViolations);
        assert_eq!(status.code(), 1);
    }

    #[tokio::test]
    async fn test_unknown_domain_could_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let traces = write_traces(dir.path(), json!([]));
        let catalog = ScenarioCatalog::builtin().unwrap();
        let err = cmd_evaluate(
            &catalog,
            &FlywheelConfig::default(),
            "retail",
            &traces,
            &[],
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unknown domain"));
    }
}
