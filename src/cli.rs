// File: ./src/cli.rs
//! Command-line parsing, help text and command execution for the
//! `notesync` binary.
use crate::error::SyncError;
use crate::sync::{CycleReport, CycleStatus, Scheduler, SyncManager};
use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Sync(String),
    SyncAll,
    Status(String),
    List,
    Watch,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub root: Option<PathBuf>,
    pub verbose: bool,
    pub command: CliCommand,
}

/// Parses `args` (without the binary name).
pub fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut root = None;
    let mut verbose = false;
    let mut rest: Vec<&str> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-r" | "--root" => {
                let path = iter
                    .next()
                    .ok_or_else(|| format!("{} requires a path", arg))?;
                root = Some(PathBuf::from(path));
            }
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" | "help" => {
                return Ok(CliArgs {
                    root,
                    verbose,
                    command: CliCommand::Help,
                });
            }
            other => rest.push(other),
        }
    }

    let command = match rest.as_slice() {
        [] => CliCommand::Help,
        ["sync", name] => CliCommand::Sync(name.to_string()),
        ["sync"] => return Err("sync requires a source name".to_string()),
        ["sync-all"] => CliCommand::SyncAll,
        ["status", name] => CliCommand::Status(name.to_string()),
        ["status"] => return Err("status requires a source name".to_string()),
        ["list"] => CliCommand::List,
        ["watch"] => CliCommand::Watch,
        other => return Err(format!("unknown command: {}", other.join(" "))),
    };
    Ok(CliArgs {
        root,
        verbose,
        command,
    })
}

pub fn print_help(binary_name: &str) {
    println!(
        "notesync v{} - sync external sources into plain-text notes",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("    {} [--root <path>] [--verbose] <command>", binary_name);
    println!();
    println!("COMMANDS:");
    println!("    sync <source>         Run one pull/push cycle for a source");
    println!("    sync-all              Sync every enabled source");
    println!("    status <source>       Show the last sync outcome of a source");
    println!("    list                  List registered sources and their state");
    println!("    watch                 Run auto-sync timers until Ctrl-C");
    println!();
    println!("OPTIONS:");
    println!("    -r, --root <path>     Use a different directory for config and data.");
    println!("    -v, --verbose         Debug logging on the terminal.");
    println!("    -h, --help            Show this help message.");
    println!();
    println!("EXIT CODES:");
    println!("    0 success, 1 failed, 2 partial, 3 busy");
}

fn exit_code(status: CycleStatus) -> i32 {
    match status {
        CycleStatus::Success => 0,
        CycleStatus::Failed => 1,
        CycleStatus::Partial => 2,
    }
}

fn error_code(err: &SyncError) -> i32 {
    match err {
        SyncError::Busy(_) => 3,
        _ => 1,
    }
}

fn print_report(report: &CycleReport) {
    println!("{}", report.summary());
    if let Some(push) = &report.push {
        for (title, reason) in &push.skipped {
            println!("    skipped '{}': {}", title, reason);
        }
        for (title, error) in &push.failed {
            println!("    failed '{}': {}", title, error);
        }
    }
}

/// Executes a parsed command. Returns the process exit code.
pub async fn run(command: &CliCommand, manager: &SyncManager) -> Result<i32> {
    match command {
        CliCommand::Help => {
            print_help("notesync");
            Ok(0)
        }
        CliCommand::Sync(name) => match manager.sync(name).await {
            Ok(report) => {
                print_report(&report);
                Ok(exit_code(report.status()))
            }
            Err(e) => {
                eprintln!("{}", e);
                Ok(error_code(&e))
            }
        },
        CliCommand::SyncAll => {
            let results = manager.sync_all().await;
            if results.is_empty() {
                println!("No enabled sources.");
                return Ok(0);
            }
            let mut code = 0;
            for (name, res) in results {
                let c = match res {
                    Ok(report) => {
                        print_report(&report);
                        exit_code(report.status())
                    }
                    Err(e) => {
                        eprintln!("{}: {}", name, e);
                        error_code(&e)
                    }
                };
                // Failure outranks partial outranks busy.
                code = match (code, c) {
                    (1, _) | (_, 1) => 1,
                    (2, _) | (_, 2) => 2,
                    (a, b) => a.max(b),
                };
            }
            Ok(code)
        }
        CliCommand::Status(name) => {
            match manager.settings(name) {
                Ok(_) => {}
                Err(e @ SyncError::NotFound(_)) => {
                    eprintln!("{}", e);
                    return Ok(1);
                }
                Err(e) => println!("{}", e),
            }
            if manager.is_running(name) {
                println!("{}: running", name);
            }
            match manager.status(name) {
                Ok(Some(state)) => {
                    println!(
                        "{} (finished {})",
                        state.summary,
                        state.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    if let Some(err) = state.error {
                        println!("    last error: {}", err);
                    }
                }
                Ok(None) => println!("{}: never synced", name),
                Err(e) => {
                    eprintln!("{}", e);
                    return Ok(1);
                }
            }
            Ok(0)
        }
        CliCommand::List => {
            let names = manager.registry().names();
            if names.is_empty() {
                println!("No sources registered. Add a [sources.<name>] block to the config.");
            }
            for name in names {
                let descriptor = manager.registry().resolve(&name)?;
                let availability = match manager.settings(&name) {
                    Ok(s) if s.auto_sync => format!("enabled, every {} min", s.interval_mins),
                    Ok(_) => "enabled".to_string(),
                    Err(e) => e.kind().to_string(),
                };
                println!(
                    "{:<16} {:<12} {}",
                    name,
                    availability,
                    descriptor.capabilities.flags().join(", ")
                );
            }
            Ok(0)
        }
        CliCommand::Watch => {
            let failures = manager.initialize().await;
            for (name, e) in &failures {
                log::warn!("[{}] {}", name, e);
            }
            let scheduler = Scheduler::start(manager);
            if scheduler.is_empty() {
                println!("No sources have auto_sync enabled.");
                return Ok(0);
            }
            println!(
                "Watching {} (Ctrl-C to stop)",
                scheduler.sources().join(", ")
            );
            tokio::signal::ctrl_c().await?;
            log::info!("Stopping auto-sync");
            drop(scheduler);
            Ok(0)
        }
    }
}
