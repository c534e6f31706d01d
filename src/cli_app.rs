//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use workspace_tooling::core::config::Config;
use workspace_tooling::core::errors::WstError;
use workspace_tooling::http::{self, HttpState};
use workspace_tooling::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use workspace_tooling::monitor::measure::{MeasurePlan, UsageMeasurer};
use workspace_tooling::monitor::metadata::{MetadataStore, local_now};
use workspace_tooling::monitor::storage_check::{StorageCheck, StorageReport};
use workspace_tooling::platform::disk_usage::{DiskUsage, DuCommand};
use workspace_tooling::scanner::cleanup::{CleanupEngine, CleanupPolicy, CleanupReport};
use workspace_tooling::sharing::ssh::{SetupScriptBuilder, SshKeyscan, parse_endpoint_origin};
use workspace_tooling::sharing::token::TokenService;
use workspace_tooling::tooling::installers::list_installers;
use workspace_tooling::tooling::tools::list_tools;

/// Workspace tooling: storage checks, folder cleanup, shared links and SSH setup.
#[derive(Debug, Parser)]
#[command(
    name = "wst",
    author,
    version,
    about = "Workspace tooling - storage checks, cleanup and sharing",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Check workspace and container size against their limits.
    Check,
    /// Measure disk usage now and store the snapshot.
    Refresh,
    /// Remove large, inactive files below a folder.
    Cleanup(CleanupArgs),
    /// Print the shared-link token for a path.
    Token(TokenArgs),
    /// List workspace tools.
    Tools,
    /// List tool installer scripts.
    Installers,
    /// Render the SSH client setup script.
    SshScript(SshScriptArgs),
    /// Serve the tooling routes.
    Serve(ServeArgs),
    /// Show the effective configuration.
    Config,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct CleanupArgs {
    /// Folder to clean.
    #[arg(value_name = "FOLDER")]
    folder: PathBuf,
    /// Only files of at least this many MB are removed (0 disables the size gate).
    #[arg(long, value_name = "MB")]
    max_file_size_mb: Option<u64>,
    /// Only files unused for more than this many days are removed.
    #[arg(long, value_name = "DAYS")]
    min_inactivity_days: Option<u64>,
    /// Remove files without leaving a `.removed.txt` note.
    #[arg(long)]
    no_tombstone: bool,
    /// Folder name to skip, may be repeated.
    #[arg(long = "exclude", value_name = "NAME")]
    excluded_folder_names: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct TokenArgs {
    /// Resource path the token grants access to.
    #[arg(value_name = "PATH")]
    path: String,
}

#[derive(Debug, Clone, Args)]
struct SshScriptArgs {
    /// Host clients connect to.
    #[arg(long, required_unless_present = "origin")]
    host: Option<String>,
    /// Port clients connect to.
    #[arg(long, required_unless_present = "origin")]
    port: Option<u16>,
    /// Endpoint URL providing host and port.
    #[arg(long, value_name = "URL")]
    origin: Option<String>,
    /// Write the script to a file instead of stdout.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ServeArgs {
    /// Listen address, overriding `server.bind`.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<WstError> for CliError {
    fn from(err: WstError) -> Self {
        if err.is_client_error() || matches!(err, WstError::InvalidConfig { .. }) {
            Self::User(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    if let Command::Completions(args) = &cli.command {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(args.shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    match &cli.command {
        Command::Check => run_check(cli, &config),
        Command::Refresh => run_refresh(cli, &config),
        Command::Cleanup(args) => run_cleanup(cli, &config, args),
        Command::Token(args) => run_token(&config, args),
        Command::Tools => {
            let tools = list_tools(&config.paths.tools_dir())?;
            emit_list(cli, &tools, |tool| {
                let name = tool
                    .fields
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("-");
                format!("{:<20} {name}", tool.id.as_deref().unwrap_or("-"))
            })
        }
        Command::Installers => {
            let installers = list_installers(&config.paths.installers_dir())?;
            emit_list(cli, &installers, |installer| {
                format!("{:<20} {}", installer.name, installer.command)
            })
        }
        Command::SshScript(args) => run_ssh_script(&config, args),
        Command::Serve(args) => run_serve(&config, args),
        Command::Config => run_config(cli, &config),
        Command::Completions(_) => Ok(()),
    }
}

/// Logger writing to the configured activity log; `None` if it cannot start.
fn start_logger(config: &Config) -> Option<(ActivityLoggerHandle, JoinHandle<()>)> {
    match spawn_logger(ActivityLoggerConfig::at(config.paths.activity_log_file())) {
        Ok(started) => Some(started),
        Err(error) => {
            eprintln!("wst: activity log disabled: {error}");
            None
        }
    }
}

fn stop_logger(logger: Option<(ActivityLoggerHandle, JoinHandle<()>)>) {
    if let Some((handle, join)) = logger {
        handle.shutdown();
        let _ = join.join();
        let dropped = handle.dropped_events();
        if dropped > 0 {
            eprintln!("wst: {dropped} activity event(s) dropped");
        }
    }
}

fn disk_usage(config: &Config) -> Arc<dyn DiskUsage> {
    Arc::new(DuCommand::new(config.storage.du_binary.clone()))
}

fn run_check(cli: &Cli, config: &Config) -> Result<(), CliError> {
    let logger = start_logger(config);
    let check = StorageCheck::from_config(config, disk_usage(config), logger.as_ref().map(|l| l.0.clone()));
    let outcome = check.check();
    // A detached measurement would die with the process.
    if let Some(refresh) = outcome.refresh
        && let Err(error) = refresh.wait()
    {
        eprintln!("wst: measurement failed: {error}");
    }
    stop_logger(logger);

    let report = outcome.report;
    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&report)?)?,
        OutputMode::Human => {
            print_storage_report(config, &report);
            let store = MetadataStore::new(config.paths.metadata_file());
            let days = store.days_since_update(local_now());
            if days > 0 {
                println!("last measurement {days} day(s) ago");
            }
        }
    }
    if report.container_size_warning || report.workspace_folder_size_warning {
        return Err(CliError::Partial("storage limit exceeded".to_string()));
    }
    Ok(())
}

fn print_storage_report(config: &Config, report: &StorageReport) {
    if config.storage.max_container_size_gb.is_none()
        && config.storage.max_workspace_folder_size_gb.is_none()
    {
        println!("No storage limits configured.");
        return;
    }
    print_dimension(
        "container",
        report.container_size,
        report.container_size_limit,
        report.container_size_warning,
    );
    print_dimension(
        "workspace",
        report.workspace_folder_size,
        report.workspace_folder_size_limit,
        report.workspace_folder_size_warning,
    );
}

fn print_dimension(label: &str, size: Option<f64>, limit: Option<u64>, warning: bool) {
    let Some(limit) = limit else {
        return;
    };
    let size = size.map_or_else(|| "unknown".to_string(), |gb| format!("{gb:.1} GB"));
    let status = if warning {
        "over limit".red().bold()
    } else {
        "ok".green()
    };
    println!("{label:<10} {size:>12} / {limit} GB  {status}");
}

fn run_refresh(cli: &Cli, config: &Config) -> Result<(), CliError> {
    let logger = start_logger(config);
    let measurer = UsageMeasurer::new(
        disk_usage(config),
        MetadataStore::new(config.paths.metadata_file()),
        MeasurePlan::everything(&config.storage, config.paths.workspace_home.clone()),
        logger.as_ref().map(|l| l.0.clone()),
    );
    let result = measurer.refresh();
    stop_logger(logger);
    let snapshot = result?;

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&snapshot)?)?,
        OutputMode::Human => {
            println!("updated   {}", snapshot.updated_at.format("%Y-%m-%d %H:%M:%S"));
            println!("container {}", format_kb(snapshot.container_size_kb));
            println!("workspace {}", format_kb(snapshot.workspace_size_kb));
        }
    }
    Ok(())
}

fn run_cleanup(cli: &Cli, config: &Config, args: &CleanupArgs) -> Result<(), CliError> {
    let mut policy = CleanupPolicy::from_config(&args.folder, &config.cleanup);
    if let Some(max) = args.max_file_size_mb {
        policy.max_file_size_mb = Some(max);
    }
    if let Some(days) = args.min_inactivity_days {
        policy.min_inactivity_days = days;
    }
    if args.no_tombstone {
        policy.replace_with_tombstone = false;
    }
    policy
        .excluded_folder_names
        .extend(args.excluded_folder_names.iter().cloned());

    let logger = start_logger(config);
    let handle = logger.as_ref().map(|l| l.0.clone());
    let plan = MeasurePlan::for_limits(&config.storage, config.paths.workspace_home.clone());
    // An empty plan still stamps a fresh record with unknown sizes.
    let measurer = Arc::new(UsageMeasurer::new(
        disk_usage(config),
        MetadataStore::new(config.paths.metadata_file()),
        plan,
        handle.clone(),
    ));
    let result = CleanupEngine::new(Some(measurer), handle).cleanup(&policy);
    stop_logger(logger);
    let report = result?;

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&report)?)?,
        OutputMode::Human => print_cleanup_report(&report),
    }
    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} file(s) could not be removed",
            report.failures.len()
        )))
    }
}

fn print_cleanup_report(report: &CleanupReport) {
    println!(
        "{} {} file(s) removed, {} MB freed ({} visited, {} ms)",
        "cleanup:".bold(),
        report.files_removed,
        report.megabytes_freed,
        report.files_visited,
        report.duration_ms
    );
    for failure in &report.failures {
        eprintln!(
            "  {} {} [{}] {}",
            "failed".red(),
            failure.path.display(),
            failure.error_code,
            failure.message
        );
    }
    for warning in &report.tombstone_failures {
        eprintln!(
            "  {} {} [{}] {}",
            "no tombstone".yellow(),
            warning.path.display(),
            warning.error_code,
            warning.message
        );
    }
}

fn run_token(config: &Config, args: &TokenArgs) -> Result<(), CliError> {
    let tokens = TokenService::from_secret_file(&config.sharing.secret_file(&config.paths))?;
    println!("{}", tokens.derive(&args.path));
    Ok(())
}

fn run_ssh_script(config: &Config, args: &SshScriptArgs) -> Result<(), CliError> {
    let origin = args
        .origin
        .as_deref()
        .map(parse_endpoint_origin)
        .transpose()?;
    let host = args
        .host
        .clone()
        .or_else(|| origin.as_ref().map(|(host, _)| host.clone()))
        .ok_or_else(|| CliError::User("a host or an origin is required".to_string()))?;
    let port = args
        .port
        .or_else(|| origin.as_ref().map(|(_, port)| *port))
        .ok_or_else(|| CliError::User("a port or an origin is required".to_string()))?;

    let script = SetupScriptBuilder::from_config(config, Arc::new(SshKeyscan))?.render(&host, port)?;
    match &args.output {
        Some(path) => std::fs::write(path, script)?,
        None => io::stdout().lock().write_all(script.as_bytes())?,
    }
    Ok(())
}

fn run_serve(config: &Config, args: &ServeArgs) -> Result<(), CliError> {
    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| config.server.bind.clone());
    let logger = start_logger(config);
    let handle = logger.as_ref().map(|l| l.0.clone());
    if let Some(handle) = &handle {
        handle.send(ActivityEvent::ServerStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config.stable_hash()?,
            bind: bind.clone(),
        });
    }

    let state = HttpState::from_config(config.clone(), handle.clone());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    eprintln!("wst: serving on http://{bind}{}", config.server.base_url);
    let started = Instant::now();
    let result = runtime.block_on(http::serve(state, &bind));
    if let Some(handle) = &handle {
        handle.send(ActivityEvent::ServerStopped {
            uptime_secs: started.elapsed().as_secs(),
        });
    }
    stop_logger(logger);
    result.map_err(CliError::from)
}

fn run_config(cli: &Cli, config: &Config) -> Result<(), CliError> {
    let hash = config.stable_hash()?;
    match output_mode(cli) {
        OutputMode::Json => write_json_line(&json!({
            "config_hash": hash,
            "config": serde_json::to_value(config)?,
        }))?,
        OutputMode::Human => {
            let rendered = toml::to_string_pretty(config)
                .map_err(|error| CliError::Runtime(format!("cannot render config: {error}")))?;
            println!("# {} (hash {hash})", config.paths.config_file.display());
            print!("{rendered}");
        }
    }
    Ok(())
}

fn emit_list<T: Serialize>(
    cli: &Cli,
    items: &[T],
    human: impl Fn(&T) -> String,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(items)?),
        OutputMode::Human => {
            for item in items {
                println!("{}", human(item));
            }
            Ok(())
        }
    }
}

fn format_kb(kb: Option<u64>) -> String {
    const KB_PER_MB: u64 = 1024;
    const KB_PER_GB: u64 = 1024 * KB_PER_MB;

    match kb {
        None => "unknown".to_string(),
        Some(kb) if kb >= KB_PER_GB => format!("{:.1} GB", kb as f64 / KB_PER_GB as f64),
        Some(kb) if kb >= KB_PER_MB => format!("{:.1} MB", kb as f64 / KB_PER_MB as f64),
        Some(kb) => format!("{kb} KB"),
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("WST_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
