//! Test harness runner
//!
//! Usage:
//!   cargo run --bin harness_runner -- health
//!   cargo run --bin harness_runner -- run --plan sample_plan.yaml
//!   cargo run --bin harness_runner -- --config harness.yaml validate

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{init_structured_logging, LoggingConfig, OperationTimer};
use harness::infra::{RecoveryAction, TestResults};
use harness::{HarnessConfig, ServiceStatus, TestInfrastructureManager};
use harness_runner::PlanLoader;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Brings up the local service stack and runs YAML test plans against it
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Harness config file (defaults to the built-in local stack)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding plan files
    #[arg(long, global = true, default_value = "./tests/plans")]
    plans_dir: PathBuf,

    /// Output directory for results
    #[arg(short, long, global = true, default_value = "./test_reports")]
    output: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every configured service once and print the health report
    Health,
    /// Start services, validate them, then stop them
    Validate,
    /// Run a test plan end to end
    Run {
        /// Plan file, absolute or relative to the plans directory
        #[arg(short, long)]
        plan: PathBuf,

        /// Skip recovery for failed scenarios
        #[arg(long)]
        no_recovery: bool,
    },
    /// List plans in the plans directory
    List,
    /// Write a sample plan into the plans directory
    Sample,
}

#[derive(Serialize)]
struct RunReport<'a> {
    results: &'a TestResults,
    recovery: &'a [RecoveryAction],
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let logging = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    init_structured_logging(LoggingConfig {
        json_output: cli.json_logs,
        ..logging
    })?;

    let config = load_config(cli.config.as_deref())?;
    let loader = PlanLoader::new(&cli.plans_dir);

    match cli.command.unwrap_or(Commands::Health) {
        Commands::Health => run_health_check(config).await,
        Commands::Validate => validate_stack(config).await,
        Commands::Run { plan, no_recovery } => {
            run_plan(config, &loader, &plan, &cli.output, !no_recovery).await
        }
        Commands::List => list_plans(&loader),
        Commands::Sample => generate_sample_plan(&loader),
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let mut config = match path {
        Some(path) => HarnessConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

async fn run_health_check(config: HarnessConfig) -> Result<()> {
    println!("🔍 Service Health Check");
    println!("{}", "=".repeat(40));

    let manager = TestInfrastructureManager::new(config);
    for service in &manager.config().services {
        manager.monitor().register_service(service.clone()).await;
    }
    manager.monitor().check_all_services().await;
    let report = manager.monitor().generate_health_report().await;

    for status in &report.services {
        let marker = match status.status {
            ServiceStatus::Healthy => "✅",
            ServiceStatus::Degraded => "⚠️ ",
            ServiceStatus::Unhealthy => "❌",
            ServiceStatus::Unknown => "❔",
        };
        let rt = status
            .response_time_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!("{marker} {:<16} {:<10} {rt:>8}  {}", status.service_id, status.status, status.message);
    }

    println!();
    println!("Overall: {}", report.overall);
    for recommendation in &report.recommendations {
        println!("💡 {recommendation}");
    }

    if report.overall == ServiceStatus::Unhealthy {
        anyhow::bail!("{} service(s) unhealthy", report.summary.unhealthy);
    }
    Ok(())
}

async fn validate_stack(config: HarnessConfig) -> Result<()> {
    println!("🔧 Stack Validation");
    println!("{}", "=".repeat(40));

    let manager = TestInfrastructureManager::new(config);
    let outcome = manager.start_services(None).await;
    manager.stop_services().await;

    let validation = outcome.context("Service startup failed")?;
    for warning in &validation.warnings {
        println!("⚠️  {warning}");
    }
    println!("🎉 All services started and validated");
    Ok(())
}

async fn run_plan(
    config: HarnessConfig,
    loader: &PlanLoader,
    plan_file: &Path,
    output_dir: &Path,
    recover: bool,
) -> Result<()> {
    println!("🚀 Test Plan Run");
    println!("{}", "=".repeat(60));

    let plan = loader.load_plan_from_file(plan_file)?;
    loader.validate_plan(&plan)?;

    let manager = TestInfrastructureManager::new(config);
    if let Err(e) = manager.start_services(None).await {
        manager.stop_services().await;
        return Err(e).context("Service startup failed");
    }

    let timer = OperationTimer::new(format!("plan:{}", plan.id));
    let outcome = manager.orchestrate_test_execution(&plan).await;
    timer.finish_with_result(&outcome);

    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            manager.stop_services().await;
            return Err(e).context("Test plan setup failed");
        }
    };

    let failures = results.failures();
    let recovery = if recover && !failures.is_empty() {
        info!(failures = failures.len(), "🔧 Attempting recovery");
        manager.handle_test_failures(&plan, &failures).await
    } else {
        Vec::new()
    };
    manager.stop_services().await;

    let saved = save_report(output_dir, &results, &recovery)?;
    print_summary(&results, &recovery, &saved);

    let unrecovered = failures.len()
        - recovery
            .iter()
            .filter(|a| a.success && a.result.is_some())
            .count()
            .min(failures.len());
    if unrecovered > 0 {
        anyhow::bail!("{unrecovered} scenario failure(s) remain");
    }
    Ok(())
}

fn save_report(output_dir: &Path, results: &TestResults, recovery: &[RecoveryAction]) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let path = output_dir.join(format!(
        "{}_{}.json",
        results.plan_id,
        results.started_at.format("%Y%m%d_%H%M%S")
    ));
    let json = serde_json::to_string_pretty(&RunReport { results, recovery })?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn print_summary(results: &TestResults, recovery: &[RecoveryAction], saved: &Path) {
    let metrics = &results.metrics;
    println!();
    println!("📊 Results for {}: {:?}", results.plan_id, results.status);
    println!(
        "   • Scenarios: {}/{} passed",
        metrics.passed_scenarios, metrics.total_scenarios
    );
    println!(
        "   • Steps: {} ({:.0}% passed, avg {:.0}ms)",
        metrics.total_steps,
        metrics.success_rate * 100.0,
        metrics.average_step_duration_ms
    );
    println!("   • Duration: {}ms", results.duration_ms);

    for scenario in results.scenarios.iter().filter(|s| !s.passed()) {
        println!("❌ {} ({})", scenario.name, scenario.scenario_id);
        for error in &scenario.errors {
            println!("      [{:?}] {}", error.kind, error.message);
        }
    }
    for action in recovery {
        let marker = if action.success { "🔧" } else { "⚠️ " };
        println!("{marker} {}", action.message);
    }
    println!("💾 Results saved to {}", saved.display());
}

fn list_plans(loader: &PlanLoader) -> Result<()> {
    println!("📋 Available Test Plans");
    println!("{}", "=".repeat(50));

    let plans = loader.load_all_plans()?;
    if plans.is_empty() {
        println!("⚠️  No plans found in {}", loader.plans_dir().display());
        println!("💡 Use 'sample' command to generate one");
        return Ok(());
    }

    let stats = loader.plan_stats()?;
    println!("📊 Overview:");
    println!("   • Plans: {} ({} parallel)", stats.total_plans, stats.parallel_plans);
    println!("   • Scenarios: {}", stats.total_scenarios);
    println!("   • Steps: {}", stats.total_steps);
    for (role, count) in &stats.by_role {
        println!("   • Scenarios as {role}: {count}");
    }
    println!();

    for (path, plan) in &plans {
        let file = path.file_name().map(|f| f.to_string_lossy()).unwrap_or_default();
        println!("📄 {} ({file})", plan.name);
        for scenario in &plan.scenarios {
            println!(
                "      • {} - {} step(s), services: {}",
                scenario.id,
                scenario.steps.len(),
                scenario.required_services.join(", ")
            );
        }
        if let Err(e) = loader.validate_plan(plan) {
            warn!(plan = %plan.id, error = %e, "plan is invalid");
            println!("      ❌ {e}");
        }
    }
    Ok(())
}

fn generate_sample_plan(loader: &PlanLoader) -> Result<()> {
    println!("📝 Generating sample plan...");
    let (path, written) = loader.write_sample_plan("sample_plan.yaml")?;
    if written {
        println!("✅ Sample plan written to {}", path.display());
    } else {
        println!("⚠️  File already exists: {}", path.display());
        println!("💡 Use a different name or delete the existing file");
    }
    Ok(())
}
