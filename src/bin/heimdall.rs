//! `heimdall` - inspect hardware and plan model loads from the command line.
//!
//! Uses the same configuration, catalog and admission path as the library,
//! against a fresh ledger: `plan` shows what would be reserved right now.
//!
//! Build: `cargo build --bin heimdall --features cli`

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use heimdall::{Config, ModelResourceManager, ModelType, Provider, QuantizationLevel};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "heimdall", about = "plan model loads against local hardware")]
struct Args {
    /// path to config.toml
    #[arg(long, env = "HEIMDALL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// print the current hardware profile as JSON
    Profile,
    /// list catalog entries
    Models {
        /// filter by model type (e.g. "llm", "tti")
        #[arg(long = "type")]
        model_type: Option<ModelType>,
        /// filter by provider (e.g. "mistral")
        #[arg(long)]
        provider: Option<Provider>,
    },
    /// show whether a model can be loaded and at which precision
    Plan {
        /// catalog id (e.g. "mistralai/Mistral-7B-Instruct-v0.3")
        model_id: String,
        /// preferred precision (e.g. "fp16", "int4")
        #[arg(long)]
        quant: Option<QuantizationLevel>,
    },
    /// pick the best-fitting catalog entry
    Best {
        #[arg(long = "type")]
        model_type: Option<ModelType>,
        #[arg(long)]
        provider: Option<Provider>,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

// ── commands ────────────────────────────────────────────────────────

fn profile(manager: &ModelResourceManager) -> CliResult {
    println!("{}", serde_json::to_string_pretty(&manager.profile())?);
    Ok(())
}

fn models(
    manager: &ModelResourceManager,
    provider: Option<Provider>,
    model_type: Option<ModelType>,
) -> CliResult {
    let entries = manager.registry().list(provider, model_type);
    if entries.is_empty() {
        println!("no models match.");
        return Ok(());
    }

    println!(
        "{:<48} {:<16} {:<14} {:>7} {:>9} {:>9}",
        "MODEL", "PROVIDER", "TYPE", "SIZE", "MIN DEV", "REC DEV"
    );
    println!("{}", "─".repeat(108));
    for m in &entries {
        println!(
            "{:<48} {:<16} {:<14} {:>6.1}G {:>8.1}G {:>8.1}G",
            m.external_id,
            m.provider,
            m.model_type,
            m.size_gb,
            m.min_device_memory_gb,
            m.recommended_device_memory_gb,
        );
    }
    println!("\n{} models", entries.len());
    Ok(())
}

fn plan(
    manager: &ModelResourceManager,
    model_id: &str,
    quant: Option<QuantizationLevel>,
) -> CliResult {
    match manager.prepare_model_loading(model_id, quant) {
        Ok(plan) => {
            println!("can load '{model_id}'");
            println!("  quantization: {}", plan.quantization);
            println!(
                "  device: {:.1}GB  host: {:.1}GB",
                plan.allocation.reserved_device_memory_gb, plan.allocation.reserved_host_memory_gb
            );
            manager.cleanup_model(model_id);
            Ok(())
        }
        Err(reason) => {
            println!("cannot load '{model_id}': {reason}");
            process::exit(2);
        }
    }
}

fn best(
    manager: &ModelResourceManager,
    provider: Option<Provider>,
    model_type: Option<ModelType>,
) -> CliResult {
    match manager.select_best_model(provider, model_type) {
        Some(m) => println!("{} ({}, {:.1}GB)", m.external_id, m.name, m.size_gb),
        None => println!("no model fits the current budget."),
    }
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = build_manager(&args).and_then(|manager| match args.command {
        Command::Profile => profile(&manager),
        Command::Models {
            model_type,
            provider,
        } => models(&manager, provider, model_type),
        Command::Plan {
            ref model_id,
            quant,
        } => plan(&manager, model_id, quant),
        Command::Best {
            model_type,
            provider,
        } => best(&manager, provider, model_type),
    });

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn build_manager(args: &Args) -> Result<ModelResourceManager, Box<dyn std::error::Error>> {
    let config = Config::load(args.config.as_deref())?;
    let registry = Arc::new(config.build_registry()?);
    Ok(ModelResourceManager::new(registry, config.build_profiler())
        .with_strategy(config.build_strategy()))
}
