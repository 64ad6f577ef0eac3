//! Top-level CLI definition and dispatch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;

use efms::controller::archival::ArchivalController;
use efms::controller::retention::RetentionController;
use efms::core::config::{PolicySet, PolicyStore};
use efms::core::errors::Result;
use efms::daemon::scheduler::JobScheduler;
use efms::daemon::set_process_name;
use efms::daemon::signals::SignalHandler;
use efms::logger::events::{ActivityLogger, ActivityLoggerHandle};
use efms::logger::jsonl::{EventKind, LogEntry, Severity};
use efms::monitor::prober::FsProber;
use efms::scanner::copier::RsyncCopier;
use efms::scanner::pipeline::RunReport;
use efms::store::incident::{IncidentReporter, IncidentSink};
use efms::store::sqlite::{ArchiveIndex, SqliteStore};

/// Edge File Management Service — retention and archival for recorded
/// appliance data.
#[derive(Debug, Parser)]
#[command(
    name = "efms",
    version,
    about = "Edge File Management Service - retention and archival daemon",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Policy configuration file.
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = "/etc/efms/policy.json"
    )]
    config: PathBuf,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the scheduling daemon.
    Daemon,
    /// Run one controller pass immediately and exit.
    Run(RunArgs),
    /// Validate the policy configuration and print a summary.
    CheckConfig,
    /// Show recent incidents from the datastore.
    Incidents(IncidentsArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Which controller to run.
    #[arg(long, value_enum, default_value = "both")]
    controller: ControllerChoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ControllerChoice {
    Archival,
    Retention,
    Both,
}

#[derive(Debug, Clone, Args)]
struct IncidentsArgs {
    /// Maximum number of rows to show, newest first.
    #[arg(long, default_value_t = 20, value_name = "N")]
    limit: u32,
}

pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::CheckConfig => check_config(cli),
        Command::Run(args) => run_once(cli, args),
        Command::Incidents(args) => show_incidents(cli, args),
        Command::Daemon => run_daemon(cli),
    }
}

// ──────────────────── subcommands ────────────────────

fn check_config(cli: &Cli) -> Result<()> {
    let policies = PolicyStore::new(&cli.config).load()?;
    if cli.json {
        println!(
            "{}",
            json!({
                "mount_path": policies.mount_path,
                "secondary_path": policies.secondary_path,
                "utilization_threshold_pct": policies.utilization_threshold_pct,
                "scan_roots": policies.scan_roots(),
                "categories": policies.categories.len(),
            })
        );
    } else {
        println!("policy file:  {}", cli.config.display());
        println!("mount:        {}", policies.mount_path.display());
        println!("secondary:    {}", policies.secondary_path.display());
        println!("threshold:    {}%", policies.utilization_threshold_pct);
        println!("categories:   {}", policies.categories.len());
        for root in policies.scan_roots() {
            println!("scan root:    {}", root.display());
        }
    }
    Ok(())
}

fn run_once(cli: &Cli, args: &RunArgs) -> Result<()> {
    let policies = PolicyStore::new(&cli.config).load()?;
    let logger = ActivityLogger::spawn(policies.logging.clone());
    let handle = logger.handle();
    let store = Arc::new(SqliteStore::open(&policies.store.sqlite_path)?);

    let outcome = (|| -> Result<()> {
        if matches!(
            args.controller,
            ControllerChoice::Archival | ControllerChoice::Both
        ) {
            let report = archival_controller(&policies, &store, &handle).apply_policy()?;
            print_report(cli, "archival", &report);
        }
        if matches!(
            args.controller,
            ControllerChoice::Retention | ControllerChoice::Both
        ) {
            let report = retention_controller(&policies, &store, &handle).apply_policy()?;
            print_report(cli, "retention", &report);
        }
        Ok(())
    })();

    logger.shutdown();
    outcome
}

fn show_incidents(cli: &Cli, args: &IncidentsArgs) -> Result<()> {
    let policies = PolicyStore::new(&cli.config).load()?;
    let store = SqliteStore::open(&policies.store.sqlite_path)?;
    let rows = store.recent_incidents(args.limit)?;

    if cli.json {
        for row in &rows {
            println!(
                "{}",
                json!({
                    "id": row.id,
                    "message": row.message,
                    "time": row.time,
                    "details": row.details,
                    "process": row.process_name,
                    "status": row.recovery_status,
                })
            );
        }
    } else if rows.is_empty() {
        println!("no incidents recorded");
    } else {
        for row in &rows {
            println!(
                "#{:<5} {}  [{}]  {}",
                row.id, row.time, row.recovery_status, row.message
            );
        }
    }
    Ok(())
}

// ──────────────────── daemon ────────────────────

fn run_daemon(cli: &Cli) -> Result<()> {
    set_process_name("efms");

    let policy_store = PolicyStore::new(&cli.config);
    let policies = policy_store.load()?;
    let logger = ActivityLogger::spawn(policies.logging.clone());
    let handle = logger.handle();
    let store = Arc::new(SqliteStore::open(&policies.store.sqlite_path)?);
    let signals = SignalHandler::install()?;

    handle.event(EventKind::DaemonStart, Severity::Info);

    // SIGHUP swaps the policy set in this slot; jobs pick it up on their
    // next run. Scheduler intervals stay as configured at startup.
    let slot = Arc::new(parking_lot::RwLock::new(Arc::clone(&policies)));

    let mut scheduler =
        JobScheduler::new(Duration::from_secs(policies.scheduler.poll_tick_seconds.max(1)));

    {
        let slot = Arc::clone(&slot);
        let store = Arc::clone(&store);
        let handle = handle.clone();
        scheduler.add_job(
            "archival",
            Duration::from_secs(policies.scheduler.archival_interval_minutes * 60),
            move || {
                let current = Arc::clone(&slot.read());
                // Fatal errors are already logged and reported as incidents.
                let _ = archival_controller(&current, &store, &handle).apply_policy();
            },
        );
    }
    {
        let slot = Arc::clone(&slot);
        let store = Arc::clone(&store);
        let handle = handle.clone();
        scheduler.add_job(
            "retention",
            Duration::from_secs(policies.scheduler.retention_interval_minutes * 60),
            move || {
                let current = Arc::clone(&slot.read());
                let _ = retention_controller(&current, &store, &handle).apply_policy();
            },
        );
    }

    scheduler.run_loop(
        || signals.shutdown_requested(),
        || {
            if signals.take_reload_request() {
                match policy_store.reload() {
                    Ok(fresh) => {
                        *slot.write() = fresh;
                        handle.event(EventKind::ConfigReload, Severity::Info);
                    }
                    Err(err) => {
                        handle.log(
                            LogEntry::new(EventKind::Error, Severity::Warning)
                                .with_error(&err)
                                .with_details("policy reload failed, keeping previous set"),
                        );
                    }
                }
            }
        },
    );

    handle.event(EventKind::DaemonStop, Severity::Info);
    logger.shutdown();
    Ok(())
}

// ──────────────────── wiring ────────────────────

fn archival_controller(
    policies: &Arc<PolicySet>,
    store: &Arc<SqliteStore>,
    handle: &ActivityLoggerHandle,
) -> ArchivalController {
    ArchivalController::new(
        Arc::clone(policies),
        Arc::new(FsProber::new()),
        Arc::new(RsyncCopier::new(policies.copy_bandwidth_kbps)),
        Arc::clone(store) as Arc<dyn ArchiveIndex>,
        incident_sink(store, handle),
        handle.clone(),
    )
}

fn retention_controller(
    policies: &Arc<PolicySet>,
    store: &Arc<SqliteStore>,
    handle: &ActivityLoggerHandle,
) -> RetentionController {
    RetentionController::new(
        Arc::clone(policies),
        Arc::new(FsProber::new()),
        Arc::new(RsyncCopier::new(policies.copy_bandwidth_kbps)),
        Arc::clone(store) as Arc<dyn ArchiveIndex>,
        incident_sink(store, handle),
        handle.clone(),
    )
}

fn incident_sink(
    store: &Arc<SqliteStore>,
    handle: &ActivityLoggerHandle,
) -> Arc<dyn IncidentSink> {
    Arc::new(IncidentReporter::new(Arc::clone(store), handle.clone()))
}

fn print_report(cli: &Cli, name: &str, report: &RunReport) {
    if cli.json {
        println!(
            "{}",
            json!({
                "controller": name,
                "pipeline": report.pipeline.label(),
                "utilization_pct": report.utilization_pct,
                "roots_processed": report.roots_processed,
                "roots_skipped": report.roots_skipped,
                "files_archived": report.files_archived,
                "files_deleted": report.files_deleted,
                "files_skipped": report.files_skipped,
                "copy_failures": report.copy_failures,
                "delete_failures": report.delete_failures,
                "dirs_removed": report.dirs_removed,
                "duration_ms": u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            })
        );
    } else {
        println!(
            "{name}: pipeline={} utilization={:.1}% archived={} deleted={} swept_dirs={} ({} ms)",
            report.pipeline.label(),
            report.utilization_pct,
            report.files_archived,
            report.files_deleted,
            report.dirs_removed,
            report.duration.as_millis()
        );
    }
}
