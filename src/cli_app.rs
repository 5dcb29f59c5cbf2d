//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use ykmon::core::config::Config;
use ykmon::daemon::loop_main::MonitorDaemon;
use ykmon::daemon::pidlock::{self, PidLock};
use ykmon::daemon::service::{ServiceActionResult, ServiceManager, SystemdServiceManager};
use ykmon::detect::parser::{DeviceSignature, parse_devices};
use ykmon::detect::prober::{CommandProber, DeviceSource};
use ykmon::detect::tracker::Presence;

/// YubiKey presence monitor — desktop notifications and screen locking.
#[derive(Debug, Parser)]
#[command(
    name = "ykmon",
    author,
    version,
    about = "YubiKey Presence Monitor",
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
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the monitor daemon in the foreground.
    Daemon(DaemonArgs),
    /// Stop a running daemon instance.
    Stop(StopArgs),
    /// Show daemon and key presence status.
    Status(StatusArgs),
    /// Run one probe and print the detected devices.
    Probe(ProbeArgs),
    /// Install ykmon as a systemd service.
    Install(InstallArgs),
    /// Remove the systemd service.
    Uninstall(UninstallArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct DaemonArgs {
    /// Optional PID file path (defaults to the configured location).
    #[arg(long, value_name = "PATH")]
    pidfile: Option<PathBuf>,
    /// Systemd watchdog timeout in seconds (0 disables).
    #[arg(long, default_value_t = 0, value_name = "SECONDS")]
    watchdog_sec: u64,
    /// Evict a running instance before starting.
    #[arg(long)]
    takeover: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct StopArgs {
    /// Optional PID file path (defaults to the configured location).
    #[arg(long, value_name = "PATH")]
    pidfile: Option<PathBuf>,
    /// Seconds to wait for graceful exit before SIGKILL.
    #[arg(long, default_value_t = 10, value_name = "SECONDS")]
    grace_secs: u64,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct StatusArgs {
    /// Optional PID file path (defaults to the configured location).
    #[arg(long, value_name = "PATH")]
    pidfile: Option<PathBuf>,
    /// Skip the one-shot device probe.
    #[arg(long)]
    no_probe: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ProbeArgs {
    /// Print the raw enumeration output instead of the parsed table.
    #[arg(long)]
    raw: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct InstallArgs {
    /// Install in user service scope (recommended for desktop sessions).
    #[arg(long)]
    user: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct UninstallArgs {
    /// Remove the user-scope service.
    #[arg(long)]
    user: bool,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
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
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
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
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Stop(args) => run_stop(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Probe(args) => run_probe(cli, args),
        Command::Install(args) => run_install(cli, args),
        Command::Uninstall(args) => run_uninstall(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// daemon
// ---------------------------------------------------------------------------

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let pid_path = args
        .pidfile
        .clone()
        .unwrap_or_else(|| config.paths.pid_file.clone());

    if args.takeover {
        let evicted = pidlock::takeover(&pid_path, Duration::from_secs(10))
            .map_err(|e| CliError::Runtime(e.to_string()))?;
        if let Some(pid) = evicted
            && !cli.quiet
        {
            eprintln!("[YKMON] evicted previous instance (pid {pid})");
        }
    }

    let _lock = PidLock::acquire(&pid_path).map_err(|e| match e {
        ykmon::core::errors::YkmError::AlreadyRunning { pid, .. } => CliError::User(format!(
            "another instance is already running{} (use --takeover to replace it)",
            pid.map_or_else(String::new, |p| format!(" (pid {p})"))
        )),
        other => CliError::Runtime(other.to_string()),
    })?;

    let prober = CommandProber::new(
        config.probe.command.clone(),
        config.probe.args.clone(),
        Duration::from_millis(config.probe.timeout_ms),
    );

    let mut daemon = MonitorDaemon::new(config, Box::new(prober))
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    daemon.set_watchdog(args.watchdog_sec);
    daemon.run().map_err(|e| CliError::Runtime(e.to_string()))
}

// ---------------------------------------------------------------------------
// stop
// ---------------------------------------------------------------------------

fn run_stop(cli: &Cli, args: &StopArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let pid_path = args
        .pidfile
        .clone()
        .unwrap_or_else(|| config.paths.pid_file.clone());

    let evicted = pidlock::takeover(&pid_path, Duration::from_secs(args.grace_secs))
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    match output_mode(cli) {
        OutputMode::Human => match evicted {
            Some(pid) => println!("Stopped ykmon (pid {pid})."),
            None => println!("No running instance found."),
        },
        OutputMode::Json => {
            let payload = json!({
                "command": "stop",
                "stopped": evicted.is_some(),
                "pid": evicted,
                "pid_file": pid_path,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

fn run_status(cli: &Cli, args: &StatusArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let pid_path = args
        .pidfile
        .clone()
        .unwrap_or_else(|| config.paths.pid_file.clone());

    let pid = pidlock::read_pid(&pid_path);
    let running = pid.is_some_and(pidlock::is_alive);

    let presence = if args.no_probe {
        None
    } else {
        Some(one_shot_presence(&config)?)
    };

    let (unit_user, unit_system) = unit_states();

    match output_mode(cli) {
        OutputMode::Human => {
            let daemon_state = if running {
                format!("running (pid {})", pid.unwrap_or(0)).green()
            } else {
                "not running".red()
            };
            println!("Daemon:  {daemon_state}");
            if let Some(p) = presence {
                let key_state = match p {
                    Presence::Present => "present".green(),
                    Presence::Absent => "absent".red(),
                };
                println!("Key:     {key_state}");
            }
            println!("Unit:    user={unit_user} system={unit_system}");
            if cli.verbose {
                println!("PID file: {}", pid_path.display());
                println!(
                    "Watching: {}:{}",
                    config.device.vendor_id,
                    config.device.product_ids.join(",")
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "status",
                "daemon_running": running,
                "pid": if running { pid } else { None },
                "pid_file": pid_path,
                "key_presence": presence.map(|p| p.to_string()),
                "unit": {
                    "user": unit_user,
                    "system": unit_system,
                },
                "vendor_id": config.device.vendor_id,
                "product_ids": config.device.product_ids,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

/// Systemd unit state per scope, for status output. `unknown` when
/// systemctl is unavailable.
fn unit_states() -> (String, String) {
    let query = |user_scope| {
        SystemdServiceManager::for_query(user_scope)
            .status()
            .unwrap_or_else(|_| "unknown".to_string())
    };
    (query(true), query(false))
}

/// Run a single probe and classify presence for status output.
fn one_shot_presence(config: &Config) -> Result<Presence, CliError> {
    let signature = DeviceSignature::new(&config.device.vendor_id, &config.device.product_ids)
        .map_err(|e| CliError::User(e.to_string()))?;
    let mut prober = CommandProber::new(
        config.probe.command.clone(),
        config.probe.args.clone(),
        Duration::from_millis(config.probe.timeout_ms),
    );
    let output = prober
        .probe()
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    let devices = parse_devices(&output.raw);
    Ok(Presence::from_bool(signature.matches_any(&devices)))
}

// ---------------------------------------------------------------------------
// probe
// ---------------------------------------------------------------------------

fn run_probe(cli: &Cli, args: &ProbeArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let signature = DeviceSignature::new(&config.device.vendor_id, &config.device.product_ids)
        .map_err(|e| CliError::User(e.to_string()))?;

    let mut prober = CommandProber::new(
        config.probe.command.clone(),
        config.probe.args.clone(),
        Duration::from_millis(config.probe.timeout_ms),
    );
    let output = prober
        .probe()
        .map_err(|e| CliError::Runtime(e.to_string()))?;

    if args.raw {
        print!("{}", output.raw);
        return Ok(());
    }

    let devices = parse_devices(&output.raw);
    let present = signature.matches_any(&devices);

    match output_mode(cli) {
        OutputMode::Human => {
            for device in &devices {
                let marker = if signature.matches(device) {
                    "*".green().to_string()
                } else {
                    " ".to_string()
                };
                println!(
                    "{marker} {} bus {:03} dev {:03}  {}",
                    device.id_pair(),
                    device.bus,
                    device.device,
                    device.description
                );
            }
            let state = if present {
                "present".green()
            } else {
                "absent".red()
            };
            println!("Key: {state}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "probe",
                "devices": devices,
                "matched": signature.present_count(&devices),
                "key_presence": Presence::from_bool(present).to_string(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// install / uninstall
// ---------------------------------------------------------------------------

fn run_install(cli: &Cli, args: &InstallArgs) -> Result<(), CliError> {
    let mgr =
        SystemdServiceManager::from_env(args.user).map_err(|e| CliError::Runtime(e.to_string()))?;
    let unit_path = mgr.config().unit_path();
    let scope = if args.user { "user" } else { "system" };

    match mgr.install() {
        Ok(()) => {
            let result = ServiceActionResult {
                action: "install",
                scope,
                unit_path: unit_path.clone(),
                success: true,
                error: None,
            };
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Installed systemd service ({scope} scope).");
                    println!("  Unit file: {}", unit_path.display());
                    println!("  Service enabled. Start with:");
                    if args.user {
                        println!("    systemctl --user start ykmon.service");
                    } else {
                        println!("    sudo systemctl start ykmon.service");
                    }
                }
                OutputMode::Json => {
                    let payload = serde_json::to_value(&result)?;
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Err(e) => {
            let result = ServiceActionResult {
                action: "install",
                scope,
                unit_path: unit_path.clone(),
                success: false,
                error: Some(e.to_string()),
            };
            match output_mode(cli) {
                OutputMode::Human => {
                    eprintln!("Failed to install systemd service: {e}");
                }
                OutputMode::Json => {
                    let payload = serde_json::to_value(&result)?;
                    write_json_line(&payload)?;
                }
            }
            Err(CliError::Runtime(format!("install failed: {e}")))
        }
    }
}

fn run_uninstall(cli: &Cli, args: &UninstallArgs) -> Result<(), CliError> {
    let mgr =
        SystemdServiceManager::from_env(args.user).map_err(|e| CliError::Runtime(e.to_string()))?;
    let unit_path = mgr.config().unit_path();
    let scope = if args.user { "user" } else { "system" };

    match mgr.uninstall() {
        Ok(()) => {
            let result = ServiceActionResult {
                action: "uninstall",
                scope,
                unit_path: unit_path.clone(),
                success: true,
                error: None,
            };
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Removed systemd service ({scope} scope).");
                }
                OutputMode::Json => {
                    let payload = serde_json::to_value(&result)?;
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Err(e) => Err(CliError::Runtime(format!("uninstall failed: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command.as_ref().unwrap_or(&ConfigCommand::Show) {
        ConfigCommand::Path => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(Config::default_path);
            match output_mode(cli) {
                OutputMode::Human => println!("{}", path.display()),
                OutputMode::Json => {
                    write_json_line(&json!({ "command": "config path", "path": path }))?;
                }
            }
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(e.to_string()))?;
                    print!("{rendered}");
                }
                OutputMode::Json => {
                    let payload = serde_json::to_value(&config)?;
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        ConfigCommand::Validate => {
            let config = load_config(cli)?;
            let hash = config
                .stable_hash()
                .map_err(|e| CliError::Internal(e.to_string()))?;
            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{} configuration is valid (hash {hash})", "ok:".green());
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "command": "config validate",
                        "valid": true,
                        "hash": hash,
                    }))?;
                }
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// version / output helpers
// ---------------------------------------------------------------------------

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("ykmon {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "ykmon",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("YKMON_OUTPUT_FORMAT").ok();
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
