//! Versionsweep - bulk API-version remediation workflow

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use versionsweep::{
    config::{default_config_path, get_data_dir, load_config, save_config, Config},
    db::{init_database, SqliteSessionStore},
    domain::{
        EligibilityFilter, FindingCategory, FindingFilter, IncrementPolicy, InventoryCounts, NamespacePolicy,
        ScanRequest, Severity, TestPolicy, VersionBar,
    },
    engine::HttpEngineClient,
    events::{Event, EventBus, NoticeLevel},
    monitor::ScanUpdate,
    session::{Engines, SessionCoordinator},
};

#[derive(Parser)]
#[command(name = "versionsweep")]
#[command(author = "Versionsweep Team")]
#[command(version)]
#[command(about = "Scan, plan, validate, deploy and restore bulk API-version upgrades")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <config_dir>/versionsweep/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results and logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the session database
    Init,
    /// Show or write configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Show the current session
    Status,
    /// Start, watch and select scans
    #[command(subcommand)]
    Scan(ScanCommand),
    /// List findings of the current scan
    Findings(FindingsArgs),
    /// Artifact counts and API version distribution across the org
    Inventory {
        /// Artifact type for the version distribution
        #[arg(long = "type", default_value = "ApexClass")]
        artifact_type: String,
    },
    /// Share of the scoped inventory already on the target version
    Compliance {
        #[arg(long)]
        target: Option<f64>,
        #[arg(long)]
        scope: Option<NamespacePolicy>,
    },
    /// Create, validate and deploy change plans
    #[command(subcommand)]
    Plan(PlanCommand),
    /// Inspect and restore the backup of the current deployment
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Show recent session writes
    History {
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Reset the session to not started
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write the effective configuration to the config file
    Init,
}

#[derive(Subcommand)]
enum ScanCommand {
    /// Start a new scan
    Start {
        /// Artifact types to scan (comma separated)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,
        #[arg(long)]
        target: Option<f64>,
        #[arg(long)]
        namespace: Option<NamespacePolicy>,
        /// Return as soon as the scan is queued
        #[arg(long)]
        no_watch: bool,
    },
    /// Follow the current scan until it finishes
    Watch,
    /// Cancel the current scan
    Cancel,
    /// Make an existing scan current
    Select { scan_id: String },
    /// List recent scans
    Recent {
        /// Only scans whose id or name contains this text
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Args)]
struct FindingsArgs {
    #[arg(long)]
    severity: Option<Severity>,
    #[arg(long)]
    category: Option<FindingCategory>,
    #[arg(long)]
    search: Option<String>,
}

#[derive(Args)]
struct Selection {
    /// Select every eligible item
    #[arg(long, conflicts_with = "ids")]
    all: bool,
    /// Item ids to select
    ids: Vec<String>,
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Create a plan from the current scan
    Create {
        #[arg(long)]
        target: Option<f64>,
        #[arg(long)]
        policy: Option<IncrementPolicy>,
        #[arg(long)]
        validate_only: Option<bool>,
        #[arg(long)]
        test_policy: Option<TestPolicy>,
    },
    /// Make an existing plan current
    Select { plan_id: String },
    /// List plan items
    Items {
        #[arg(long, default_value = "all")]
        filter: EligibilityFilter,
    },
    /// Validate selected items
    Validate(Selection),
    /// Validate then deploy selected items
    Deploy {
        #[command(flatten)]
        selection: Selection,
        /// Snapshot artifacts before deploying
        #[arg(long)]
        backup: bool,
    },
    /// Reset a failed plan to draft
    Retry,
    /// Show why the plan failed
    Failure,
    /// List recent plans
    History {
        #[arg(short, long, default_value = "10")]
        limit: u32,
        /// Only plans whose id or name contains this text
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    Summary,
    Items,
    Preview { item_id: String },
    Diff { item_id: String },
    Restore { item_id: String },
    RestoreAll,
    Create,
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "versionsweep=info".into());
    if cli.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let config = load_config(cli.config.as_deref())?;
    let db_path = config.database.get_path().to_string_lossy().to_string();

    match cli.command {
        Commands::Init => {
            println!("Initializing database at: {}", db_path);
            init_database(&db_path).await?;
            println!("Database initialized successfully!");
            return Ok(());
        }
        Commands::Config(ConfigCommand::Show) => {
            println!("Versionsweep Configuration");
            println!("==========================");
            println!("Config file: {}", cli.config.unwrap_or_else(default_config_path).display());
            println!("Data directory: {}", get_data_dir().display());
            println!("Database path: {}", db_path);
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Config(ConfigCommand::Init) => {
            let path = save_config(&config, cli.config.as_deref())?;
            println!("Configuration written to {}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let pool = init_database(&db_path).await?;
    let store = SqliteSessionStore::new(pool).with_history_limit(config.session.history_limit);
    let events = EventBus::new();
    spawn_notice_printer(&events, cli.json);

    let client = HttpEngineClient::from_config(&config.engine)?;
    let mut coordinator = SessionCoordinator::new(&config, Engines::http(client), Arc::new(store.clone()), events);
    coordinator.resume().await?;

    let out = Output { json: cli.json };
    let result = run(&mut coordinator, &store, &config, cli.command, &out).await;

    // Let the printer drain pending notices
    tokio::task::yield_now().await;
    result
}

async fn run(
    coordinator: &mut SessionCoordinator,
    store: &SqliteSessionStore,
    config: &Config,
    command: Commands,
    out: &Output,
) -> anyhow::Result<()> {
    match command {
        Commands::Status => out.show(&coordinator.view_state(Utc::now()), |v| {
            let mut lines = vec![format!("Session: {}", v.owner), v.step_label.clone()];
            if let Some(scan) = &v.scan {
                lines.push(format!("Scan {}: {} ({}%)", scan.id, scan.status, scan.progress_percent));
            }
            if let Some(plan) = &v.plan {
                lines.push(format!(
                    "Plan {}: {} ({} eligible, {} selected)",
                    plan.id, plan.status, plan.eligible_items, plan.selected_items
                ));
                if let Some(detail) = &plan.failure_detail {
                    lines.push(format!("  Failure: {}", detail));
                }
            }
            if let Some(run) = &v.deployment_run_id {
                lines.push(format!("Deployment run: {}", run));
            }
            if let Some(backup) = &v.backup {
                if let Some(days) = backup.days_until_expiration {
                    lines.push(format!("Backup expires in {} days", days));
                }
            }
            lines.join("\n")
        }),

        Commands::Scan(cmd) => match cmd {
            ScanCommand::Start {
                types,
                target,
                namespace,
                no_watch,
            } => {
                let defaults = coordinator.defaults();
                let types = if types.is_empty() { defaults.types.clone() } else { types };
                let request = ScanRequest::new(types, target.unwrap_or(defaults.target_api_version))
                    .with_namespace_policy(namespace.unwrap_or(defaults.namespace_policy));

                let scan = coordinator.start_scan(&request).await?;
                out.show(&scan, |s| format!("Started scan {}", s.id))?;
                if !no_watch {
                    watch(coordinator, out).await?;
                }
                Ok(())
            }
            ScanCommand::Watch => watch(coordinator, out).await,
            ScanCommand::Cancel => {
                coordinator.cancel_scan().await?;
                Ok(())
            }
            ScanCommand::Select { scan_id } => {
                let scan = coordinator.select_scan(&scan_id).await?;
                out.show(&scan, |s| format!("Selected scan {} ({})", s.id, s.status))?;
                if scan.status.is_active() {
                    watch(coordinator, out).await?;
                }
                Ok(())
            }
            ScanCommand::Recent { search } => {
                let scans = coordinator.search_scans(search.as_deref().unwrap_or("")).await?;
                out.show(&scans, |list| {
                    list.iter()
                        .map(|s| {
                            format!(
                                "{}  {:<10} {:>5} findings  {}",
                                s.id,
                                s.status,
                                s.findings_count,
                                s.name.as_deref().unwrap_or("")
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
        },

        Commands::Findings(args) => {
            let filter = FindingFilter {
                severity: args.severity,
                category: args.category,
                search: args.search,
            };
            let findings: Vec<_> = coordinator.findings().filtered(&filter).cloned().collect();
            out.show(&findings, |list| {
                list.iter()
                    .map(|f| format!("{:<8} {:<16} {}  {}", f.severity, f.category.label(), f.artifact_name, f.summary))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }

        Commands::Inventory { artifact_type } => {
            let inventory = coordinator.refresh_inventory(&artifact_type, None, None).await?;
            let target = config.defaults.target_api_version;
            let distribution = inventory.distribution();
            let report = InventoryReport {
                total: inventory.counts().total(),
                counts: inventory.counts().clone(),
                artifact_type: distribution.artifact_type.clone(),
                below_target: distribution.below_target_count(target),
                bars: distribution.bars(target, 10),
            };
            out.show(&report, |r| {
                let mut lines: Vec<String> = r.counts.iter().map(|(t, c)| format!("{:<16} {:>6}", t, c)).collect();
                lines.push(format!("{:<16} {:>6}", "Total", r.total));
                lines.push(format!("\n{} by API version ({} below {}):", r.artifact_type, r.below_target, target));
                lines.extend(r.bars.iter().map(|b| {
                    let marker = if b.below_target { '!' } else { ' ' };
                    format!("{}{:>6} {:>6}  {}", marker, b.version, b.count, "#".repeat((b.percentage / 5) as usize))
                }));
                lines.join("\n")
            })
        }

        Commands::Compliance { target, scope } => {
            let inventory = coordinator.refresh_inventory("ApexClass", target, scope).await?;
            let metrics = inventory.compliance().cloned();
            out.show(&metrics, |m| match m {
                Some(m) => format!(
                    "{}% compliant with {} ({}): {} of {} components, {} below target",
                    m.compliance_percent(),
                    m.target_api_version,
                    m.scope_policy,
                    m.compliant_components,
                    m.total_components,
                    m.non_compliant()
                ),
                None => "Compliance metrics unavailable".to_string(),
            })
        }

        Commands::Plan(cmd) => match cmd {
            PlanCommand::Create {
                target,
                policy,
                validate_only,
                test_policy,
            } => {
                let mut options = coordinator.default_plan_options();
                if let Some(target) = target {
                    options.target_api_version = target;
                }
                if let Some(policy) = policy {
                    options.increment_policy = policy;
                }
                if let Some(validate_only) = validate_only {
                    options.validate_only = validate_only;
                }
                if let Some(test_policy) = test_policy {
                    options.test_policy = test_policy;
                }
                let plan = coordinator.create_plan(&options).await?;
                out.show(&plan, |p| format!("Created plan {} ({})", p.id, p.status))
            }
            PlanCommand::Select { plan_id } => {
                let plan = coordinator.select_plan(&plan_id).await?;
                out.show(&plan, |p| format!("Selected plan {} ({})", p.id, p.status))
            }
            PlanCommand::Items { filter } => {
                let items: Vec<_> = coordinator.planner().filtered_items(filter).cloned().collect();
                out.show(&items, |list| {
                    list.iter()
                        .map(|i| {
                            format!(
                                "{:>4} {:<40} {} -> {}  {}",
                                i.unit_number,
                                i.full_name,
                                i.current_api_version,
                                i.target_api_version,
                                i.eligibility
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            PlanCommand::Validate(selection) => {
                apply_selection(coordinator, &selection);
                let result = coordinator.validate_selected().await?;
                out.show(&result, |r| {
                    format!("Validated {} items, {} errors", r.validated_ids.len(), r.errors.len())
                })
            }
            PlanCommand::Deploy { selection, backup } => {
                apply_selection(coordinator, &selection);
                if !coordinator.planner().is_validation_complete() {
                    coordinator.validate_selected().await?;
                }
                let run = coordinator.deploy(backup).await?;
                out.show(&run, |r| format!("Deployment run {} queued", r.id))
            }
            PlanCommand::Retry => {
                coordinator.retry_plan().await?;
                Ok(())
            }
            PlanCommand::Failure => {
                let detail = coordinator.failure_detail().await;
                out.show(&detail, |d| d.clone().unwrap_or_else(|| "No failure recorded".to_string()))
            }
            PlanCommand::History { limit, search } => {
                let plans = coordinator.search_plans(search.as_deref().unwrap_or(""), limit).await?;
                out.show(&plans, |list| {
                    list.iter()
                        .map(|p| format!("{}  {:<10} {}", p.id, p.status, p.name.as_deref().unwrap_or("")))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
        },

        Commands::Backup(cmd) => match cmd {
            BackupCommand::Summary => {
                coordinator.load_backup().await?;
                let view = coordinator.view_state(Utc::now()).backup;
                out.show(&view, |b| match b {
                    Some(b) => format!(
                        "Run {}: {} items, {} restorable, expires in {} days",
                        b.run_id,
                        b.item_count,
                        b.restorable_count,
                        b.days_until_expiration.map(|d| d.to_string()).unwrap_or_else(|| "?".into())
                    ),
                    None => "No backup".to_string(),
                })
            }
            BackupCommand::Items => {
                coordinator.manage_backup().await?;
                let items = coordinator.backup().items().to_vec();
                out.show(&items, |list| {
                    list.iter()
                        .map(|i| format!("{}  {:<40} {:?}", i.id, i.full_name, i.restore_status))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            BackupCommand::Preview { item_id } => {
                let content = coordinator.preview_backup(&item_id).await?;
                out.show(&content, |c| c.content.clone())
            }
            BackupCommand::Diff { item_id } => {
                let diff = coordinator.diff_backup(&item_id).await?;
                out.show(&diff, |d| {
                    if d.has_changes() {
                        d.content_diff.clone().unwrap_or_default()
                    } else {
                        "No changes since backup".to_string()
                    }
                })
            }
            BackupCommand::Restore { item_id } => {
                let result = coordinator.restore_item(&item_id).await?;
                out.show(&result, |r| {
                    if r.success {
                        format!("Restored {}", r.backup_item_id)
                    } else {
                        format!("Restore failed: {}", r.error_message.clone().unwrap_or_default())
                    }
                })
            }
            BackupCommand::RestoreAll => {
                let report = coordinator.restore_all().await?;
                out.show(&report, |r| r.message())
            }
            BackupCommand::Create => {
                let summary = coordinator.create_backup().await?;
                out.show(&summary, |s| format!("Backup created for run {}", s.deployment_run_id))
            }
            BackupCommand::Cleanup => {
                coordinator.cleanup_backup().await?;
                Ok(())
            }
        },

        Commands::History { limit } => {
            let history = store.list_history(&config.session.owner, limit).await?;
            out.show(&history, |list| {
                list.iter()
                    .map(|h| format!("{}  {:<5} {}", h.recorded_at.to_rfc3339(), h.action, h.workflow_step))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }

        Commands::Clear => {
            coordinator.clear_session().await?;
            Ok(())
        }

        Commands::Init | Commands::Config(_) => Ok(()),
    }
}

fn apply_selection(coordinator: &mut SessionCoordinator, selection: &Selection) {
    if selection.all {
        coordinator.select_all_eligible();
    } else if !selection.ids.is_empty() {
        coordinator.select_items(&selection.ids);
    }
}

async fn watch(coordinator: &mut SessionCoordinator, out: &Output) -> anyhow::Result<()> {
    while let Some(update) = coordinator.drive_scan().await? {
        if let ScanUpdate::Status(scan) = &update {
            if !out.json {
                println!("{}  {}  {}%", scan.id, scan.status, scan.progress_percent());
            }
        }
    }
    Ok(())
}

fn spawn_notice_printer(events: &EventBus, json: bool) {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            } else if let Event::Notice {
                level, title, message, ..
            } = event
            {
                let tag = match level {
                    NoticeLevel::Success => "ok",
                    NoticeLevel::Info => "info",
                    NoticeLevel::Warning => "warn",
                    NoticeLevel::Error => "error",
                };
                eprintln!("[{}] {}: {}", tag, title, message);
            }
        }
    });
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InventoryReport {
    counts: InventoryCounts,
    total: u32,
    artifact_type: String,
    below_target: u32,
    bars: Vec<VersionBar>,
}

struct Output {
    json: bool,
}

impl Output {
    fn show<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(value));
        }
        Ok(())
    }
}
