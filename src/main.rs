//! DIFC command-line entry point.
//!
//! Provides `flow` to evaluate a single guarded read and `run` to replay a
//! scenario file against a fresh monitor.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use difc::config::MonitorConfig;
use difc::kernel::{CompartmentState, GuardDecision, Monitor};
use difc::lattice::{Label, Principal, Privilege};
use difc::logging;
use difc::scenario::Scenario;

/// DIFC: label checks for sandboxed script compartments.
#[derive(Parser)]
#[command(name = "difc", version, about)]
struct Cli {
    /// Config file; defaults to `$DIFC_CONFIG_PATH` or `./difc.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Evaluate one guarded read and print the decision.
    Flow {
        /// Reader's privacy label, as JSON (`[["https://a.com"]]`).
        #[arg(long, default_value = "[]")]
        dest_privacy: Label,
        /// Reader's trust label, as JSON.
        #[arg(long, default_value = "[]")]
        dest_trust: Label,
        /// Object's privacy label, as JSON.
        #[arg(long, default_value = "[]")]
        object_privacy: Label,
        /// Object's trust label, as JSON.
        #[arg(long, default_value = "[]")]
        object_trust: Label,
        /// Privileges the reader holds, as JSON.
        #[arg(long, default_value = "[]")]
        privileges: Label,
        /// Reader's privacy clearance, as JSON.
        #[arg(long)]
        clearance: Option<Label>,
    },
    /// Replay a scenario file; exits non-zero on a failed expectation.
    Run {
        /// Scenario TOML file.
        scenario: PathBuf,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MonitorConfig::load_from(path),
        None => MonitorConfig::load(),
    }
    .context("failed to load configuration")?;
    let _log_guard = logging::init_from_config(&config)?;
    debug!(level = %config.logging.level, "configuration loaded");

    match cli.command {
        Command::Flow {
            dest_privacy,
            dest_trust,
            object_privacy,
            object_trust,
            privileges,
            clearance,
        } => handle_flow(
            &config,
            FlowArgs {
                dest_privacy,
                dest_trust,
                object_privacy,
                object_trust,
                privileges,
                clearance,
            },
        ),
        Command::Run { scenario } => handle_run(&config, &scenario),
    }
}

struct FlowArgs {
    dest_privacy: Label,
    dest_trust: Label,
    object_privacy: Label,
    object_trust: Label,
    privileges: Label,
    clearance: Option<Label>,
}

/// Evaluate one guarded read in a scratch compartment.
fn handle_flow(config: &MonitorConfig, args: FlowArgs) -> anyhow::Result<ExitCode> {
    let mut monitor = Monitor::from_config(config)?;
    let state = CompartmentState::sandbox_mode(Principal::fresh())
        .with_privacy(args.dest_privacy)
        .with_trust(args.dest_trust)
        .with_privileges(&Privilege::new(args.privileges))
        .with_clearance(args.clearance, None);
    let id = monitor.insert(state);

    let decision = monitor.guard_read(id, &args.object_privacy, &args.object_trust)?;
    let allowed = decision.is_allowed();
    match decision {
        GuardDecision::Direct => println!("direct"),
        GuardDecision::Floated { .. } => println!("floated"),
        GuardDecision::Denied(reason) => println!("denied: {reason}"),
    }
    println!("privacy: {}", monitor.privacy_label(id)?.to_json());
    println!("trust: {}", monitor.trust_label(id)?.to_json());
    if let Some(policy) = monitor.perimeter(id) {
        println!("perimeter: {policy}");
    }

    Ok(if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Replay a scenario file and print one line per step.
fn handle_run(config: &MonitorConfig, path: &std::path::Path) -> anyhow::Result<ExitCode> {
    let scenario = Scenario::load(path)?;
    let mut monitor = Monitor::from_config(config)?;
    let report = scenario.run(&mut monitor)?;
    for step in &report.steps {
        println!("{step}");
    }

    let passed = report.all_passed();
    info!(path = %path.display(), steps = report.steps.len(), passed, "scenario finished");
    if passed {
        println!("scenario passed");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("scenario FAILED");
        Ok(ExitCode::FAILURE)
    }
}
