//! Repocensus - workspace mirror and contribution report
//!
//! Mirrors every repository of the selected project keys into a local
//! `project_key/repo_name` tree, runs a contribution analyzer on each local
//! repository and writes one aggregated report.
//!
//! Exit codes:
//!   0 - Run completed (per-repository failures are recorded in the report)
//!   1 - Fatal error (configuration, cannot write the report, etc.)
//!   2 - --strict was given and at least one sync or analysis failed

mod analysis;
mod catalog;
mod cli;
mod config;
mod layout;
mod models;
mod progress;
mod repo;
mod report;
mod sync;

#[cfg(test)]
mod testing;

use analysis::{AggregationPipeline, GitFameProvider};
use anyhow::{Context, Result};
use catalog::CatalogClient;
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use layout::WorkspaceLayout;
use models::Report;
use repo::{Git2Transport, TransportOptions, WorkspaceReconciler};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync::{FleetSyncCoordinator, SyncReport};
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Repocensus v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .repocensus.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Set remote.workspace and remote.project_keys before the first run.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run sync and aggregation. Returns the exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;
    debug!("Configuration: {:?}", config);

    let layout = WorkspaceLayout::new(&config.sync.destination);
    let project_keys = config.remote.project_keys.clone();
    let show_progress = !args.quiet;

    if args.dry_run {
        return handle_dry_run(&config, &layout).await;
    }

    let mut failures = false;

    if args.skip_sync {
        info!("Skipping sync, analyzing {} as is", layout.root().display());
    } else {
        println!(
            "📥 Syncing {} project(s) from workspace {} into {}",
            project_keys.len(),
            config.remote.workspace,
            layout.root().display()
        );
        let coordinator = build_coordinator(&config, &layout)?.with_progress(show_progress);
        let sync_report = coordinator.sync(&project_keys).await;
        print_sync_summary(&sync_report);
        failures |= sync_report.summary().has_failures();
    }

    if args.sync_only {
        println!("\n✅ Sync complete.");
        return Ok(exit_code(args.strict, failures));
    }

    println!("\n🔬 Analyzing local repositories...");
    let provider = GitFameProvider::new(config.analyzer.command.clone());
    let pipeline = AggregationPipeline::new(
        Arc::new(provider),
        config.analyzer.options.clone(),
        Duration::from_secs(config.analyzer.timeout_seconds),
        config.general.concurrency,
    )
    .with_progress(show_progress);

    let report = match args.repository_selector() {
        Some((project_key, repo_name)) => {
            pipeline
                .run_repository(&layout, &project_key, &repo_name)
                .await
        }
        None => pipeline.run(&layout, &project_keys).await,
    };
    failures |= report.failed_count > 0;

    report::write_report(&report, config.general.format, &config.general.output)?;

    print_report_summary(&report, start_time.elapsed().as_secs_f64());
    println!(
        "\n✅ Report saved to: {}",
        config.general.output.display()
    );

    if args.strict && failures {
        eprintln!("\n⛔ Failures were recorded and --strict is set (exit code 2).");
    }
    Ok(exit_code(args.strict, failures))
}

fn exit_code(strict: bool, failures: bool) -> i32 {
    if strict && failures {
        2
    } else {
        0
    }
}

fn build_coordinator(config: &Config, layout: &WorkspaceLayout) -> Result<FleetSyncCoordinator> {
    let catalog = CatalogClient::new(&config.remote, config.credentials.clone())
        .context("Failed to create catalog client")?;

    let transport = Git2Transport::new(TransportOptions {
        branch: config.sync.branch.clone(),
        credentials: config.credentials.clone(),
    });
    let reconciler = WorkspaceReconciler::new(
        Arc::new(transport),
        Duration::from_secs(config.sync.timeout_seconds),
    );

    Ok(FleetSyncCoordinator::new(
        catalog,
        reconciler,
        layout.clone(),
        config.general.concurrency,
    ))
}

/// Handle --dry-run: fetch catalogs, print what would be cloned or updated.
async fn handle_dry_run(config: &Config, layout: &WorkspaceLayout) -> Result<i32> {
    println!("\n🔍 Dry run: fetching catalogs (nothing is written)...\n");

    let coordinator = build_coordinator(config, layout)?;

    for project_key in &config.remote.project_keys {
        match coordinator.plan(project_key).await {
            Ok((targets, skipped)) => {
                println!("   {} ({} repositories)", project_key, targets.len());
                for target in &targets {
                    let action = if target.local_path.exists() {
                        "update"
                    } else {
                        "clone "
                    };
                    println!("     {} {}", action, target.local_path.display());
                }
                for name in &skipped {
                    println!("     skip   {}", name);
                }
            }
            Err(e) => println!("   {}: ❌ {}", project_key, e),
        }
    }

    println!("\n✅ Dry run complete. No repositories were touched.");
    Ok(0)
}

fn print_sync_summary(report: &SyncReport) {
    let summary = report.summary();

    println!("\n📊 Sync Summary:");
    println!(
        "   Cloned: {} | Updated: {} | Failed: {} | Skipped: {}",
        summary.cloned, summary.updated, summary.failed, summary.skipped
    );

    for project in &report.projects {
        if let Some(ref e) = project.catalog_error {
            println!("   ❌ {}: {}", project.project_key, e);
        }
        for repo in project.outcomes.iter().filter(|r| r.outcome.is_failure()) {
            println!(
                "   ❌ {}/{}: {}",
                project.project_key, repo.repo_name, repo.outcome
            );
        }
    }
}

fn print_report_summary(report: &Report, duration: f64) {
    println!("\n📊 Analysis Summary:");
    println!("   Projects: {}", report.projects.len());
    println!(
        "   Repositories: {} ({} failed)",
        report.repository_count, report.failed_count
    );
    println!("   Total lines of code: {}", report.total_loc);
    println!("   Duration: {:.1}s", duration);
}

/// Load configuration from file or use defaults.
///
/// A file that exists but cannot be read or parsed is fatal.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Ok(Config::load(config_path)?);
    }

    match Config::load_default()? {
        Some(config) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}
