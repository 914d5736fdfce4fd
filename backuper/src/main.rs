//! Backuper - Main entry point
//!
//! Edits a backup configuration, registers it with the OS scheduler and runs
//! backups on demand.

use anyhow::{Context, Result};
use backuper::executor::BackupExecutor;
use backuper::fs::paths::resolve_path;
use backuper::{
    daemon::shutdown::ShutdownCoordinator, scheduler, utils, BackupError, Configuration, Period,
    SourceMode,
};
use chrono::Local;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    configfile: Option<PathBuf>,

    /// Backup destination directory
    #[arg(short, long, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// Add directories whose files (not subdirectories) are backed up
    #[arg(short = 'a', long, value_name = "PATH", num_args = 1..)]
    add_sources: Vec<PathBuf>,

    /// Add directories backed up with all their subdirectories
    #[arg(short = 'r', long, value_name = "PATH", num_args = 1..)]
    recursively: Vec<PathBuf>,

    /// Add single files
    #[arg(short = 'f', long, value_name = "PATH", num_args = 1..)]
    add_files: Vec<PathBuf>,

    /// Paths excluded from backup
    #[arg(short, long, value_name = "PATH", num_args = 1..)]
    ignore: Vec<PathBuf>,

    /// Unregister sources
    #[arg(long, value_name = "PATH", num_args = 1..)]
    remove_sources: Vec<PathBuf>,

    /// Remove paths from the ignore list
    #[arg(long, value_name = "PATH", num_args = 1..)]
    remove_ignored: Vec<PathBuf>,

    /// Name of the scheduled task
    #[arg(short = 'n', long)]
    taskname: Option<String>,

    /// How often the scheduled backup runs
    #[arg(short, long, value_parser = parse_period)]
    period: Option<Period>,

    /// Hour the scheduled backup starts (0-23)
    #[arg(short = 'H', long)]
    hour: Option<u32>,

    /// Minute the scheduled backup starts (0-59)
    #[arg(short, long)]
    minute: Option<u32>,

    /// Write the configuration to the config file
    #[arg(long)]
    save: bool,

    /// Print the configuration
    #[arg(short, long)]
    list: bool,

    /// Save the configuration and register it with the OS scheduler
    #[arg(short, long)]
    schedule: bool,

    /// Remove the scheduled task
    #[arg(short, long)]
    unschedule: bool,

    /// Run the backup now
    #[arg(short = 'b', long)]
    run_backup: bool,

    /// Write the backup report as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Debug logging; also prints the generated scheduler command
    #[arg(short = 'D', long)]
    debug: bool,

    /// Info logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_period(value: &str) -> std::result::Result<Period, BackupError> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::logger::init(utils::logger::level_for(args.verbose, args.debug))?;

    let config_path = args
        .configfile
        .as_deref()
        .map(resolve_path)
        .transpose()
        .context("Cannot resolve configuration file path")?;

    let mut config = match &config_path {
        Some(path) if path.exists() => {
            let config = Configuration::load(path)?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        Some(path) => {
            warn!("No such file: {}; starting from defaults", path.display());
            Configuration::new()
        }
        None => Configuration::new(),
    };

    apply_changes(&mut config, &args)?;

    let mut save_path = None;
    if args.save || args.schedule {
        let path = config_path.clone().unwrap_or_else(fresh_config_path);
        config.save(&path)?;
        info!("Configuration saved to {}", path.display());
        save_path = Some(path);
    }

    if args.list {
        print_configuration(&config);
    }

    if args.debug || args.schedule || args.unschedule {
        let task_config = save_path.or(config_path).unwrap_or_else(fresh_config_path);
        let task = scheduler::task_for(config.schedule(), &task_config)?;

        if args.debug {
            match task.describe_install() {
                Ok(command) => println!("{command}"),
                Err(e) => println!("{e}"),
            }
        }
        if args.schedule {
            task.install()?;
        }
        if args.unschedule {
            task.uninstall()?;
        }
    }

    if args.run_backup {
        run_backup(config, args.report.as_deref()).await?;
    }

    Ok(())
}

fn apply_changes(config: &mut Configuration, args: &Args) -> Result<()> {
    if let Some(name) = &args.taskname {
        config.set_task_name(name.as_str())?;
    }
    if args.period.is_some() || args.hour.is_some() || args.minute.is_some() {
        config.set_schedule(args.period, args.hour, args.minute)?;
    }
    if let Some(destination) = &args.destination {
        config.set_destination(destination)?;
    }

    let additions = [
        (&args.add_sources, SourceMode::Directory),
        (&args.recursively, SourceMode::RecursiveDirectory),
        (&args.add_files, SourceMode::File),
    ];
    for (paths, mode) in additions {
        for path in paths {
            config.add_source(path, mode)?;
        }
    }

    for path in &args.ignore {
        config.add_ignored(path)?;
    }
    for path in &args.remove_sources {
        if !config.remove_source(path) {
            warn!("Not a registered source: {}", path.display());
        }
    }
    for path in &args.remove_ignored {
        if !config.remove_ignored(path) {
            warn!("Not an ignored path: {}", path.display());
        }
    }

    Ok(())
}

async fn run_backup(config: Configuration, report_path: Option<&Path>) -> Result<()> {
    let shutdown = ShutdownCoordinator::new();
    let token = shutdown.token();

    // A signal cancels the token; the backup then returns its partial report
    let signals = tokio::spawn(async move { shutdown.wait_for_signal().await });

    let result = tokio::task::spawn_blocking(move || {
        BackupExecutor::with_cancel(token).run_backup(&config)
    })
    .await;
    signals.abort();

    let report = result.context("Backup task panicked")??;

    if let Some(path) = report_path {
        let json = report.to_json().context("Cannot serialize backup report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Cannot write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    let summary = report.summary();
    println!(
        "Backup {}: {} copied, {} unchanged, {} renamed, {} failed, {} missing sources",
        if report.cancelled { "cancelled" } else { "done" },
        summary.copied,
        summary.skipped,
        summary.renamed,
        summary.failed_files + summary.failed_sources,
        summary.missing_sources
    );

    Ok(())
}

fn print_configuration(config: &Configuration) {
    let schedule = config.schedule();

    println!("Destination: {}", config.destination().display());
    println!(
        "Schedule: {} at {} (task {:?})",
        schedule.period(),
        schedule.start_time(),
        schedule.task_name()
    );

    println!("Sources:");
    if config.sources().is_empty() {
        println!("  (none)");
    }
    for (path, mode) in config.sources().iter() {
        println!("  [{}] {}", mode.code(), path.display());
    }

    println!("Ignored:");
    if config.ignored().is_empty() {
        println!("  (none)");
    }
    for path in config.ignored().iter() {
        println!("  {}", path.display());
    }
}

fn fresh_config_path() -> PathBuf {
    PathBuf::from(format!("backuper_{}.toml", Local::now().timestamp()))
}
