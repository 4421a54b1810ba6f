// SPDX-License-Identifier: Apache-2.0

//! AutoCoder dataflow engine entry point.
//!
//! `ac_engine run` heals and validates a blueprint, expands its recipes into
//! component definitions, wires the harness, and runs the system until
//! completion or SIGTERM. `ac_engine validate` stops after the topology
//! lint/heal pass and reports what reconciliation would change.

use autocoder_df_config::blueprint::Blueprint;
use autocoder_df_config::topology::{self, HealerOptions};
use autocoder_df_engine::harness::Harness;
use autocoder_df_engine::metrics::TopologyMetrics;
use autocoder_df_recipes::expander;
use autocoder_df_telemetry::registry::MetricsRegistry;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ac_engine", about = "AutoCoder component runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a blueprint until completion or SIGTERM.
    Run {
        /// Path to the blueprint file (.yaml, .yml, or .json).
        #[arg(long)]
        blueprint: PathBuf,
        /// Override the shutdown drain grace period, in milliseconds.
        #[arg(long)]
        grace_ms: Option<u64>,
        /// Disable the Store-as-sink healer stop-gap.
        #[arg(long)]
        no_store_as_sink: bool,
    },
    /// Validate and heal a blueprint without running it.
    Validate {
        /// Path to the blueprint file (.yaml, .yml, or .json).
        #[arg(long)]
        blueprint: PathBuf,
        /// Disable the Store-as-sink healer stop-gap.
        #[arg(long)]
        no_store_as_sink: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // `AC_STORE_AS_SINK=false` disables the healer stop-gap fleet-wide; the
    // per-invocation flag still wins.
    let env_store_as_sink = std::env::var("AC_STORE_AS_SINK")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            blueprint,
            grace_ms,
            no_store_as_sink,
        } => cmd_run(&blueprint, grace_ms, env_store_as_sink && !no_store_as_sink),
        Commands::Validate {
            blueprint,
            no_store_as_sink,
        } => cmd_validate(&blueprint, env_store_as_sink && !no_store_as_sink),
    }
}

fn load_and_heal(path: &Path, store_as_sink: bool) -> Option<(Blueprint, topology::TopologyReport)> {
    let mut bp = match Blueprint::from_file(path) {
        Ok(bp) => bp,
        Err(error) => {
            tracing::error!(%error, "blueprint rejected");
            return None;
        }
    };
    let options = HealerOptions { store_as_sink };
    match topology::heal(&mut bp, &options) {
        Ok(report) => Some((bp, report)),
        Err(error) => {
            tracing::error!(%error, "topology validation failed; build aborted");
            None
        }
    }
}

fn cmd_validate(path: &Path, store_as_sink: bool) -> ExitCode {
    let Some((bp, report)) = load_and_heal(path, store_as_sink) else {
        return ExitCode::FAILURE;
    };
    for (id, view) in &report.roles {
        tracing::info!(
            component = %id,
            declared = %view.declared_role,
            effective = %view.effective_role,
            reasons = ?view.reasons,
            "role view"
        );
    }
    for binding in &report.added_bindings {
        tracing::info!(
            from = %binding.from,
            to = %binding.to,
            "reconciliation would add binding"
        );
    }
    tracing::info!(
        system = %bp.system,
        role_flips = report.stats.role_flips,
        edges_added = report.stats.reconciliation_edges_added,
        "blueprint is valid"
    );
    ExitCode::SUCCESS
}

/// Loads the published budgets (`AC_BUDGETS_FILE` or `capability_budgets.yaml`
/// next to the working directory) and checks the blueprint's overrides
/// against the declared maxima.
fn check_budgets(bp: &Blueprint) -> Result<(), autocoder_df_config::error::Error> {
    let budgets_path = std::env::var("AC_BUDGETS_FILE")
        .unwrap_or_else(|_| "capability_budgets.yaml".to_owned());
    if !Path::new(&budgets_path).exists() {
        if !bp.capability_budgets.is_empty() {
            tracing::warn!(
                budgets_path,
                "blueprint overrides budgets but no published budgets file was found"
            );
        }
        return Ok(());
    }
    let declared = autocoder_df_config::capability::CapabilityBudgets::from_yaml_file(
        &budgets_path,
    )?;
    let _ = declared.apply_overrides(&bp.capability_budgets)?;
    Ok(())
}

fn cmd_run(path: &Path, grace_ms: Option<u64>, store_as_sink: bool) -> ExitCode {
    let Some((mut bp, report)) = load_and_heal(path, store_as_sink) else {
        return ExitCode::FAILURE;
    };
    if let Err(error) = check_budgets(&bp) {
        tracing::error!(%error, "capability budget check failed");
        return ExitCode::FAILURE;
    }
    if let Some(grace) = grace_ms {
        bp.settings.shutdown_grace_ms = grace;
    }

    let registry = MetricsRegistry::new();
    let topology_metrics = TopologyMetrics::new(&bp.system);
    topology_metrics.role_flips_total.add(report.stats.role_flips);
    topology_metrics
        .reconciliation_edges_added_total
        .add(report.stats.reconciliation_edges_added);
    topology_metrics
        .reconciliation_sources_fixed_total
        .add(report.stats.reconciliation_sources_fixed);
    topology_metrics.validation_pass_rate.set(1.0);
    registry.register(topology_metrics.clone());

    let mut harness = Harness::new(bp.system.clone(), bp.settings.clone(), registry.clone());
    harness.add_bindings(bp.bindings.clone());

    // Keep ingress handles alive so ingress sources stay open until SIGTERM;
    // an external listener drives them in a real deployment.
    let mut ingress_handles = Vec::new();
    for (id, spec) in &bp.components {
        let definition = match expander::expand(id, spec) {
            Ok(def) => def,
            Err(error) => {
                tracing::error!(component = %id, %error, "expansion failed");
                return ExitCode::FAILURE;
            }
        };
        let instantiated = match expander::instantiate(&definition) {
            Ok(instantiated) => instantiated,
            Err(error) => {
                tracing::error!(component = %id, %error, "instantiation failed");
                return ExitCode::FAILURE;
            }
        };
        if let Some(handle) = instantiated.ingress {
            tracing::info!(component = %id, "ingress endpoint ready (external listener required)");
            ingress_handles.push(handle);
        }
        if let Err(error) = harness.add_component(instantiated.component) {
            tracing::error!(component = %id, %error, "harness rejected component");
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!(%error, "failed to build runtime");
            return ExitCode::FAILURE;
        }
    };
    let local = tokio::task::LocalSet::new();
    let result = runtime.block_on(local.run_until(harness.run()));
    drop(ingress_handles);

    tracing::info!("final metrics:\n{}", registry.export_text());
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "pipeline terminated with error");
            ExitCode::FAILURE
        }
    }
}
