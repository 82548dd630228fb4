// SPDX-License-Identifier: GPL-3.0-only

mod config;
mod logging;
mod plan;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use storage_contracts::{CommandRunner, MountTable};
use storage_engine::{EngineConfig, Storage, log_difference, probe};
use storage_sys::{EtcFstab, RecordingRunner, SystemCmd};
use storage_types::CommitInfo;
use tracing::{info, warn};

use crate::config::CliConfig;
use crate::plan::{Plan, engine};

#[derive(Debug, Parser)]
#[command(name = "storage-planner")]
#[command(about = "Plan storage topology changes and commit them in order")]
struct Cli {
    /// Configuration file (default: /etc/storage-planner.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output; repeat for more.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect the running system and print its device graph
    Probe {
        /// Print the raw facts as a plan topology instead
        #[arg(long)]
        facts: bool,
    },
    /// Show the steps a plan would commit, in order
    Actions {
        plan: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Commit a plan
    Commit {
        plan: PathBuf,
        /// Run against the plan's topology and print the commands only
        #[arg(long)]
        dry_run: bool,
        /// Required to touch the running system
        #[arg(long)]
        yes: bool,
    },
    /// Differences between a plan's topology and its result, or between
    /// the results of two plans
    Diff {
        plan: PathBuf,
        other: Option<PathBuf>,
    },
}

fn host_runner(config: &EngineConfig) -> SystemCmd {
    if config.root_prefix.is_empty() {
        SystemCmd::new()
    } else {
        SystemCmd::with_root_prefix(config.root_prefix.clone())
    }
}

/// The plan's topology with its operations applied, run by `runner`.
fn planned(plan: &Plan, config: &EngineConfig, runner: Box<dyn CommandRunner>) -> Result<Storage> {
    let mut storage = plan.open(config.clone(), runner);
    plan.apply(&mut storage)?;
    Ok(storage)
}

fn print_infos(infos: &[CommitInfo], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(infos)?);
        return Ok(());
    }
    if infos.is_empty() {
        println!("nothing to commit");
    }
    for info in infos {
        println!("{:<9} {info}", info.stage.as_str());
    }
    Ok(())
}

fn probe_host(config: &EngineConfig, facts_only: bool) -> Result<()> {
    let mut runner = host_runner(config);
    let fstab_path = config.prefixed(&config.fstab_path.to_string_lossy());
    let fstab = EtcFstab::load(&fstab_path).with_context(|| format!("cannot load {fstab_path}"))?;
    let facts = engine(probe::collect(&mut runner, fstab.entries()))?;
    if facts_only {
        let topology = Plan {
            topology: facts,
            operations: Vec::new(),
        };
        print!("{}", toml::to_string(&topology)?);
    } else {
        let graph = probe::build_graph(&facts, config);
        println!("{}", serde_json::to_string_pretty(&graph)?);
    }
    Ok(())
}

fn commit(config: &EngineConfig, path: &Path, dry_run: bool, yes: bool) -> Result<()> {
    let plan = Plan::load(path)?;
    if dry_run {
        let runner = RecordingRunner::new();
        let mut storage = planned(&plan, config, Box::new(runner.clone()))?;
        engine(storage.commit())?;
        for command in runner.rendered() {
            println!("{command}");
        }
        return Ok(());
    }

    if !yes {
        bail!("refusing to change the running system without --yes (try --dry-run)");
    }
    if !plan.topology.disks.is_empty() {
        warn!("committing against the probed system; the plan's topology is ignored");
    }
    let mut storage = engine(Storage::open(config.clone(), Box::new(host_runner(config))))?;
    plan.apply(&mut storage)?;
    print_infos(&storage.commit_infos(), false)?;
    engine(storage.commit())?;
    info!("commit of {} finished", path.display());
    Ok(())
}

fn diff(config: &EngineConfig, path: &Path, other: Option<&Path>) -> Result<()> {
    let plan = Plan::load(path)?;
    let (before, after) = match other {
        Some(other) => {
            let other = Plan::load(other)?;
            let left = planned(&plan, config, Box::new(RecordingRunner::new()))?;
            let right = planned(&other, config, Box::new(RecordingRunner::new()))?;
            (left.graph().clone(), right.graph().clone())
        }
        None => {
            let storage = planned(&plan, config, Box::new(RecordingRunner::new()))?;
            let before = probe::build_graph(&plan.topology, config);
            (before, storage.graph().clone())
        }
    };
    let lines = log_difference(&before, &after);
    if lines.is_empty() {
        println!("no difference");
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    logging::init(&config, config.log_level.raised(cli.verbose));

    match cli.command {
        Command::Probe { facts } => probe_host(&config.engine, facts),
        Command::Actions { plan, json } => {
            let plan_file = Plan::load(&plan)?;
            let storage = planned(&plan_file, &config.engine, Box::new(RecordingRunner::new()))?;
            print_infos(&storage.commit_infos(), json)
        }
        Command::Commit {
            plan,
            dry_run,
            yes,
        } => commit(&config.engine, &plan, dry_run, yes),
        Command::Diff { plan, other } => diff(&config.engine, &plan, other.as_deref()),
    }
}
