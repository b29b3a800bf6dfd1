use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gcpset::config::{gcloud_config_dir, gcloud_default_project, DEFAULT_SCOPES};
use gcpset::gcp::http::format_gcp_error;
use gcpset::registry::slots::{slot_table, SlotGroup};
use gcpset::{ClientOption, ClusterMode, Config, Registry, SlotError, SlotSelection, SlotState};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Build a registry of GCP clients and report which slots came up
#[derive(Parser, Debug)]
#[command(name = "gcpset", version, about, long_about = None)]
struct Args {
    /// JSON config file (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// GCP project to use
    #[arg(short, long)]
    project: Option<String>,

    /// OAuth scope; may be repeated
    #[arg(long = "scope")]
    scopes: Vec<String>,

    /// Service account key file
    #[arg(long)]
    credentials_file: Option<PathBuf>,

    /// Pre-issued access token
    #[arg(long)]
    access_token: Option<String>,

    /// Spanner database path
    #[arg(long)]
    spanner_database: Option<String>,

    #[arg(long, value_enum)]
    cluster_mode: Option<CliClusterMode>,

    /// Kubernetes API server URL override
    #[arg(long)]
    cluster_master: Option<String>,

    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Build only this group
    #[arg(long, value_enum, conflicts_with = "slots")]
    group: Option<CliGroup>,

    /// Build only this slot; may be repeated
    #[arg(long = "slot")]
    slots: Vec<String>,

    /// Per-slot construction timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Probe each slot while building
    #[arg(long)]
    verify: bool,

    /// List the slot table and exit
    #[arg(long)]
    list: bool,

    #[arg(long, value_enum, default_value = "text")]
    output: Output,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliClusterMode {
    Kubeconfig,
    InCluster,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliGroup {
    Core,
    Clients,
    Services,
}

impl From<CliGroup> for SlotGroup {
    fn from(group: CliGroup) -> Self {
        match group {
            CliGroup::Core => SlotGroup::Core,
            CliGroup::Clients => SlotGroup::Clients,
            CliGroup::Services => SlotGroup::Services,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gcpset started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("gcpset").join("gcpset.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcpset").join("gcpset.log");
    }
    PathBuf::from("gcpset.log")
}

/// File config first, then CLI flags on top
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load(),
    };

    if let Some(project) = &args.project {
        config.project_id = project.clone();
    }
    if config.project_id.is_empty() {
        if let Some(project) = gcloud_config_dir().as_deref().and_then(gcloud_default_project) {
            tracing::info!("Using gcloud default project {}", project);
            config.project_id = project;
        }
    }

    if !args.scopes.is_empty() {
        config.scopes = args.scopes.clone();
    }
    if config.scopes.is_empty() {
        config.scopes = DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect();
    }

    if let Some(path) = &args.credentials_file {
        config.options.push(ClientOption::CredentialsFile(path.clone()));
    }
    if let Some(token) = &args.access_token {
        config.options.push(ClientOption::AccessToken(token.clone()));
    }
    if let Some(database) = &args.spanner_database {
        config.spanner_database = Some(database.clone());
    }

    if let Some(mode) = args.cluster_mode {
        config.cluster.mode = match mode {
            CliClusterMode::Kubeconfig => ClusterMode::Kubeconfig,
            CliClusterMode::InCluster => ClusterMode::InCluster,
        };
    }
    if let Some(master) = &args.cluster_master {
        config.cluster.master_url = Some(master.clone());
    }
    if let Some(path) = &args.kubeconfig {
        config.cluster.kubeconfig = Some(path.clone());
    }

    if let Some(group) = args.group {
        config.selection = SlotSelection::Group(group.into());
    } else if !args.slots.is_empty() {
        config.selection = SlotSelection::Only(args.slots.iter().cloned().collect());
    }

    if let Some(secs) = args.timeout {
        config.slot_timeout_ms = Some(secs.saturating_mul(1000));
    }
    if args.verify {
        config.verify_on_build = true;
    }

    Ok(config)
}

fn print_slot_table() {
    for def in slot_table().slots.values() {
        println!(
            "{:<22} {:<9} {:<9} {}",
            def.name,
            def.group.as_str(),
            if def.closable { "closable" } else { "-" },
            def.display_name
        );
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    if args.list {
        print_slot_table();
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&args)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling slot construction");
            on_interrupt.cancel();
        }
    });

    let (registry, built) = Registry::builder(config)
        .cancellation(cancel)
        .build()
        .await;

    let statuses = registry.statuses();
    match args.output {
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        Output::Text => {
            for status in &statuses {
                let state = match status.state {
                    SlotState::Live => "live",
                    SlotState::Failed => "FAILED",
                    SlotState::Closed => "closed",
                };
                println!(
                    "{:<22} {:<7} {:>6} ms  {}",
                    status.slot, state, status.elapsed_ms, status.display_name
                );
            }
            if let Err(errors) = &built {
                eprintln!();
                for failure in errors.failures() {
                    eprintln!("{}", failure);
                    if let SlotError::Construction(cause) = &failure.error {
                        eprintln!("  hint: {}", format_gcp_error(cause));
                    }
                }
            }
        }
    }

    if let Err(errors) = registry.close().await {
        for failure in errors.failures() {
            eprintln!("close {}", failure);
        }
    }

    match built {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(errors) => {
            tracing::error!("{}", errors);
            let none_live = !statuses.iter().any(|s| s.state == SlotState::Live);
            Ok(ExitCode::from(if none_live { 2 } else { 1 }))
        }
    }
}
