//! Command handlers.

use anyhow::Context;
use console::style;
use serde::Serialize;
use tokio::sync::watch;

use wheelwright_cache::{CacheStore, FsStore};
use wheelwright_core::job::{JobStatus, StepResult};
use wheelwright_core::workflow::WorkflowDefinition;
use wheelwright_release::ReleaseOutcome;
use wheelwright_scheduler::{MatrixExpander, RunReport};

use crate::config::{CliConfig, OutputFormat};
use crate::executor::{self, RunOptions, RunSummary};

fn load_workflow(path: &str) -> anyhow::Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read workflow file {}", path))?;
    let workflow: WorkflowDefinition = serde_yaml::from_str(&content)
        .with_context(|| format!("Invalid workflow file {}", path))?;
    Ok(workflow)
}

/// Run a workflow end to end, returning the process exit code.
pub async fn run(config: &CliConfig, path: &str, options: RunOptions) -> anyhow::Result<i32> {
    let workflow = load_workflow(path)?;
    let table = matches!(config.output_format, OutputFormat::Table);

    if table {
        println!(
            "{} Running workflow {}",
            style("▶").cyan(),
            style(&workflow.name).bold()
        );
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let release_configured = workflow.release.is_some();
    let summary = executor::execute_workflow(&workflow, &options, cancel_rx).await?;

    if table {
        print_summary(&summary);
        if release_configured && options.no_release {
            println!("{} Release skipped (--no-release)", style("i").blue());
        }
    } else {
        print_summary_json(&summary)?;
    }

    Ok(if summary.success() { 0 } else { 1 })
}

fn print_summary(summary: &RunSummary) {
    println!();
    for result in &summary.report.results {
        let glyph = match result.status {
            JobStatus::Succeeded => style("✓").green(),
            JobStatus::Failed => style("✗").red(),
            JobStatus::Cancelled => style("!").yellow(),
        };
        println!(
            "{} {} {}",
            glyph,
            style(&result.display_name).bold(),
            style(format!("{}ms", result.duration_ms)).dim()
        );
        for step in result.failed_steps() {
            println!("    {} {}: {}", style("✗").red(), step.name, step_detail(step));
        }
    }

    let totals = summary.report.totals();
    println!();
    println!(
        "{} jobs: {} succeeded, {} failed, {} cancelled ({}ms)",
        totals.jobs,
        totals.jobs_succeeded,
        totals.jobs_failed,
        totals.jobs_cancelled,
        summary.report.duration_ms
    );

    if !summary.report.all_succeeded() {
        println!("{} Failing jobs:", style("✗").red());
        for identity in summary.report.failed() {
            println!("    {}", identity);
        }
    }

    match &summary.release {
        Some(ReleaseOutcome::Published(receipt)) => {
            println!(
                "{} Published {} wheels{} to {}",
                style("✓").green(),
                receipt.wheels.len(),
                if receipt.sdist.is_some() {
                    " and an sdist"
                } else {
                    ""
                },
                receipt.destination
            );
        }
        Some(ReleaseOutcome::Aborted { failed }) => {
            println!(
                "{} Release aborted: {} jobs did not succeed",
                style("!").yellow(),
                failed.len()
            );
        }
        None => {}
    }
}

fn step_detail(step: &StepResult) -> String {
    if let Some(error) = &step.error {
        return error.clone();
    }
    if let Some(line) = step.stderr.last() {
        return line.clone();
    }
    match step.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "failed".to_string(),
    }
}

fn print_summary_json(summary: &RunSummary) -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct JsonSummary<'a> {
        report: &'a RunReport,
        release: Option<&'a ReleaseOutcome>,
        success: bool,
    }

    let view = JsonSummary {
        report: &summary.report,
        release: summary.release.as_ref(),
        success: summary.success(),
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

/// Validate a workflow file.
pub async fn validate(path: &str) -> anyhow::Result<()> {
    let workflow = load_workflow(path)?;
    let jobs = MatrixExpander::new().expand(&workflow)?;

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        workflow.name
    );
    println!("  Jobs: {}", jobs.len());

    for job in &jobs {
        println!("    - {} ({})", job.display_name, job.role.as_str());
    }

    Ok(())
}

/// Show the jobs a workflow expands to.
pub async fn expand(path: &str, json: bool) -> anyhow::Result<()> {
    let workflow = load_workflow(path)?;
    let jobs = MatrixExpander::new().expand(&workflow)?;

    if json {
        #[derive(Serialize)]
        struct Row<'a> {
            identity: String,
            display_name: &'a str,
            role: &'a str,
            platform: &'a str,
            steps: usize,
        }

        let rows: Vec<Row> = jobs
            .iter()
            .map(|job| Row {
                identity: job.identity.to_string(),
                display_name: &job.display_name,
                role: job.role.as_str(),
                platform: &job.platform,
                steps: job.steps.len(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for job in &jobs {
        println!(
            "{} {} {}",
            style(format!("{:<12}", job.role.as_str())).cyan(),
            style(format!("{:<12}", job.platform)).dim(),
            job.identity
        );
    }
    println!("\n{} jobs", jobs.len());

    Ok(())
}

/// Print the workflow file JSON schema.
pub fn schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// List cache entries.
pub async fn list_cache(config: &CliConfig) -> anyhow::Result<()> {
    let root = config.cache_root();
    let store = FsStore::new(root.clone());
    let keys = store.list("").await?;

    if keys.is_empty() {
        println!("{} No cache entries", style("i").blue());
        return Ok(());
    }

    for key in &keys {
        println!("  {}", key);
    }
    println!("\n{} entries in {}", keys.len(), root.display());

    Ok(())
}

/// Clear cache entries, optionally by key prefix.
pub async fn clear_cache(config: &CliConfig, prefix: Option<String>) -> anyhow::Result<()> {
    let store = FsStore::new(config.cache_root());
    let keys = store.list(prefix.as_deref().unwrap_or("")).await?;

    for key in &keys {
        store.delete(key).await?;
    }

    println!(
        "{} Removed {} cache entries",
        style("✓").green(),
        keys.len()
    );
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("Current configuration:");
    println!(
        "  cache_dir: {}",
        config
            .cache_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("(default: {})", config.cache_root().display()))
    );
    println!(
        "  max_parallel: {}",
        config
            .max_parallel
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(from workflow)".to_string())
    );
    println!("  output_format: {:?}", config.output_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set a configuration value.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value).map_err(anyhow::Error::msg)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
