//! Systemd integration: unit file generation and `systemctl` lifecycle.
//!
//! ykmon normally installs as a user service, since it needs the session
//! bus for desktop popups and the display session for screen locking. A
//! system-scope install is still supported for headless setups where only
//! journal/file channels are active.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::errors::{Result, YkmError};

/// Unit name for the systemd service.
const SYSTEMD_UNIT_NAME: &str = "ykmon.service";

/// Watchdog timeout baked into system-scope units. The daemon is launched
/// with a matching `--watchdog-sec` so the heartbeat actually feeds it.
const SYSTEMD_WATCHDOG_SEC: u64 = 60;

// ---------------------------------------------------------------------------
// Service manager trait
// ---------------------------------------------------------------------------

/// Lifecycle operations on an installed service.
pub trait ServiceManager {
    /// Install and enable the service.
    fn install(&self) -> Result<()>;
    /// Stop, disable, and remove the service.
    fn uninstall(&self) -> Result<()>;
    /// One-word service state (`active`, `inactive`, ...).
    fn status(&self) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Systemd configuration
// ---------------------------------------------------------------------------

/// Parameters controlling unit file generation and lifecycle commands.
#[derive(Debug, Clone)]
pub struct SystemdConfig {
    /// Whether to operate in user scope (`--user`).
    pub user_scope: bool,
    /// Absolute path to the ykmon binary baked into the unit file.
    pub binary_path: PathBuf,
}

impl SystemdConfig {
    /// Build a config from the current environment.
    pub fn from_env(user_scope: bool) -> Result<Self> {
        Ok(Self {
            user_scope,
            binary_path: resolve_ykmon_binary()?,
        })
    }

    /// Directory where the unit file is written.
    #[must_use]
    pub fn unit_dir(&self) -> PathBuf {
        if self.user_scope {
            let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
            home.join(".config/systemd/user")
        } else {
            PathBuf::from("/etc/systemd/system")
        }
    }

    /// Full path to the generated unit file.
    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir().join(SYSTEMD_UNIT_NAME)
    }
}

// ---------------------------------------------------------------------------
// Systemd service manager
// ---------------------------------------------------------------------------

/// [`ServiceManager`] implementation that drives `systemctl` and generates
/// a hardened systemd unit file.
#[derive(Debug, Clone)]
pub struct SystemdServiceManager {
    config: SystemdConfig,
}

impl SystemdServiceManager {
    #[must_use]
    pub fn new(config: SystemdConfig) -> Self {
        Self { config }
    }

    /// Create a manager from the current environment.
    pub fn from_env(user_scope: bool) -> Result<Self> {
        Ok(Self::new(SystemdConfig::from_env(user_scope)?))
    }

    /// A manager for state queries only. Skips binary resolution, which
    /// `status()` never needs.
    #[must_use]
    pub fn for_query(user_scope: bool) -> Self {
        Self::new(SystemdConfig {
            user_scope,
            binary_path: PathBuf::new(),
        })
    }

    /// Access the underlying config (for reading unit path, etc.).
    #[must_use]
    pub fn config(&self) -> &SystemdConfig {
        &self.config
    }

    /// Generate the full systemd unit file content.
    #[must_use]
    pub fn generate_unit_file(&self) -> String {
        let binary = self.config.binary_path.display();

        let mut unit = String::with_capacity(1536);

        writeln!(unit, "[Unit]").ok();
        writeln!(unit, "Description=YubiKey Presence Monitor").ok();
        if self.config.user_scope {
            // The locker and notify-send need the graphical session.
            writeln!(unit, "After=graphical-session.target").ok();
            writeln!(unit, "PartOf=graphical-session.target").ok();
        } else {
            writeln!(unit, "After=local-fs.target").ok();
        }
        writeln!(unit).ok();

        writeln!(unit, "[Service]").ok();
        if self.config.user_scope {
            // User services cannot rely on sd_notify; use simple.
            writeln!(unit, "Type=simple").ok();
            writeln!(unit, "ExecStart={binary} daemon").ok();
        } else {
            writeln!(unit, "Type=notify").ok();
            writeln!(unit, "WatchdogSec={SYSTEMD_WATCHDOG_SEC}").ok();
            writeln!(
                unit,
                "ExecStart={binary} daemon --watchdog-sec {SYSTEMD_WATCHDOG_SEC}"
            )
            .ok();
        }
        writeln!(unit, "ExecReload=/bin/kill -HUP $MAINPID").ok();
        writeln!(unit, "Restart=on-failure").ok();
        writeln!(unit, "RestartSec=5").ok();
        writeln!(unit, "TimeoutStopSec=10").ok();
        writeln!(unit).ok();

        writeln!(unit, "# Security hardening").ok();
        writeln!(unit, "NoNewPrivileges=true").ok();
        if !self.config.user_scope {
            writeln!(unit, "ProtectKernelTunables=true").ok();
            writeln!(unit, "ProtectControlGroups=true").ok();
            writeln!(unit, "RestrictSUIDSGID=true").ok();
            writeln!(unit, "LimitNOFILE=1024").ok();
        }
        writeln!(unit).ok();

        writeln!(unit, "# Resource limits").ok();
        writeln!(unit, "MemoryMax=64M").ok();
        writeln!(unit, "CPUQuota=5%").ok();
        writeln!(unit).ok();

        if !self.config.user_scope {
            writeln!(unit, "# Logging").ok();
            writeln!(unit, "StandardOutput=journal").ok();
            writeln!(unit, "StandardError=journal").ok();
            writeln!(unit, "SyslogIdentifier=ykmon").ok();
            writeln!(unit).ok();
        }

        writeln!(unit, "[Install]").ok();
        if self.config.user_scope {
            writeln!(unit, "WantedBy=default.target").ok();
        } else {
            writeln!(unit, "WantedBy=multi-user.target").ok();
        }

        unit
    }

    // -- systemctl helpers -------------------------------------------------

    fn systemctl_args(&self, args: &[&str]) -> Vec<String> {
        let mut cmd_args: Vec<String> = Vec::with_capacity(args.len() + 1);
        if self.config.user_scope {
            cmd_args.push("--user".to_string());
        }
        cmd_args.extend(args.iter().map(|s| (*s).to_string()));
        cmd_args
    }

    fn run_systemctl(&self, args: &[&str]) -> Result<String> {
        let full_args = self.systemctl_args(args);
        let output = Command::new("systemctl")
            .args(&full_args)
            .output()
            .map_err(|source| YkmError::Io {
                path: PathBuf::from("systemctl"),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            Ok(stdout.trim().to_string())
        } else {
            Err(YkmError::Runtime {
                details: format!(
                    "systemctl {} failed (exit {}): {}",
                    full_args.join(" "),
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            })
        }
    }

    /// Run systemctl but tolerate non-zero exit (for stop/disable where the
    /// service may already be stopped or not enabled).
    fn run_systemctl_lenient(&self, args: &[&str]) -> String {
        let full_args = self.systemctl_args(args);
        match Command::new("systemctl").args(&full_args).output() {
            Ok(o) => String::from_utf8_lossy(&o.stdout).trim().to_string(),
            Err(_) => String::new(),
        }
    }
}

impl ServiceManager for SystemdServiceManager {
    fn install(&self) -> Result<()> {
        let unit_dir = self.config.unit_dir();
        let unit_path = self.config.unit_path();
        let unit_content = self.generate_unit_file();

        fs::create_dir_all(&unit_dir).map_err(|source| YkmError::Io {
            path: unit_dir.clone(),
            source,
        })?;
        fs::write(&unit_path, &unit_content).map_err(|source| YkmError::Io {
            path: unit_path.clone(),
            source,
        })?;

        self.run_systemctl(&["daemon-reload"])?;
        self.run_systemctl(&["enable", SYSTEMD_UNIT_NAME])?;

        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        let unit_path = self.config.unit_path();

        self.run_systemctl_lenient(&["stop", SYSTEMD_UNIT_NAME]);
        self.run_systemctl_lenient(&["disable", SYSTEMD_UNIT_NAME]);

        if unit_path.exists() {
            fs::remove_file(&unit_path).map_err(|source| YkmError::Io {
                path: unit_path.clone(),
                source,
            })?;
        }

        self.run_systemctl(&["daemon-reload"])?;
        Ok(())
    }

    fn status(&self) -> Result<String> {
        // is-active exits non-zero for inactive/failed, so use lenient.
        let state = self.run_systemctl_lenient(&["is-active", SYSTEMD_UNIT_NAME]);
        if state.is_empty() {
            return Ok("unknown".to_string());
        }
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Service action result (for structured CLI output)
// ---------------------------------------------------------------------------

/// Structured result from an install or uninstall operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceActionResult {
    /// The action performed (`"install"` or `"uninstall"`).
    pub action: &'static str,
    /// Service scope (`"system"` or `"user"`).
    pub scope: &'static str,
    /// Path to the generated/removed unit file.
    pub unit_path: PathBuf,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if the operation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve the ykmon binary path (prefers the running binary, falls back to
/// well-known install locations).
fn resolve_ykmon_binary() -> Result<PathBuf> {
    if let Ok(exe) = env::current_exe()
        && exe.exists()
    {
        return Ok(exe);
    }
    for candidate in &["/usr/local/bin/ykmon", "/usr/bin/ykmon"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(YkmError::Runtime {
        details: "could not locate ykmon binary; install it to a PATH directory first".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(user_scope: bool) -> SystemdConfig {
        SystemdConfig {
            user_scope,
            binary_path: PathBuf::from("/usr/local/bin/ykmon"),
        }
    }

    #[test]
    fn unit_file_contains_required_sections() {
        let mgr = SystemdServiceManager::new(test_config(true));
        let unit = mgr.generate_unit_file();

        assert!(unit.contains("[Unit]"));
        assert!(unit.contains("[Service]"));
        assert!(unit.contains("[Install]"));
    }

    #[test]
    fn system_unit_file_uses_notify_type() {
        let mgr = SystemdServiceManager::new(test_config(false));
        let unit = mgr.generate_unit_file();

        assert!(unit.contains("Type=notify"));
        assert!(unit.contains("WatchdogSec=60"));
        // The watchdog it declares must also be fed by the daemon.
        assert!(unit.contains("daemon --watchdog-sec 60"));
    }

    #[test]
    fn user_unit_file_uses_simple_type() {
        let mgr = SystemdServiceManager::new(test_config(true));
        let unit = mgr.generate_unit_file();

        assert!(unit.contains("Type=simple"));
        assert!(!unit.contains("WatchdogSec="));
        assert!(!unit.contains("--watchdog-sec"));
    }

    #[test]
    fn user_unit_is_bound_to_graphical_session() {
        let mgr = SystemdServiceManager::new(test_config(true));
        let unit = mgr.generate_unit_file();

        assert!(unit.contains("After=graphical-session.target"));
        assert!(unit.contains("PartOf=graphical-session.target"));
        assert!(unit.contains("WantedBy=default.target"));
    }

    #[test]
    fn system_unit_has_hardening_and_journal() {
        let mgr = SystemdServiceManager::new(test_config(false));
        let unit = mgr.generate_unit_file();

        assert!(unit.contains("NoNewPrivileges=true"));
        assert!(unit.contains("ProtectKernelTunables=true"));
        assert!(unit.contains("RestrictSUIDSGID=true"));
        assert!(unit.contains("SyslogIdentifier=ykmon"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn user_unit_omits_system_only_directives() {
        let mgr = SystemdServiceManager::new(test_config(true));
        let unit = mgr.generate_unit_file();

        assert!(!unit.contains("ProtectKernelTunables="));
        assert!(!unit.contains("SyslogIdentifier="));
    }

    #[test]
    fn unit_file_has_restart_policy_and_limits() {
        let mgr = SystemdServiceManager::new(test_config(true));
        let unit = mgr.generate_unit_file();

        assert!(unit.contains("Restart=on-failure"));
        assert!(unit.contains("RestartSec=5"));
        assert!(unit.contains("TimeoutStopSec=10"));
        assert!(unit.contains("MemoryMax=64M"));
        assert!(unit.contains("CPUQuota=5%"));
    }

    #[test]
    fn exec_start_uses_configured_binary() {
        let mut config = test_config(true);
        config.binary_path = PathBuf::from("/opt/ykmon/bin/ykmon");
        let mgr = SystemdServiceManager::new(config);
        let unit = mgr.generate_unit_file();

        assert!(unit.contains("ExecStart=/opt/ykmon/bin/ykmon daemon"));
        assert!(unit.contains("ExecReload=/bin/kill -HUP $MAINPID"));
    }

    #[test]
    fn for_query_sets_scope() {
        let user = SystemdServiceManager::for_query(true);
        assert_eq!(
            user.systemctl_args(&["is-active"]),
            vec!["--user".to_string(), "is-active".to_string()]
        );

        let system = SystemdServiceManager::for_query(false);
        assert_eq!(
            system.systemctl_args(&["is-active"]),
            vec!["is-active".to_string()]
        );
    }

    #[test]
    fn status_query_yields_some_state() {
        // With no systemctl (or no unit) the lenient query still resolves
        // to a non-empty state string.
        let state = SystemdServiceManager::for_query(true).status().unwrap();
        assert!(!state.is_empty());
    }

    #[test]
    fn unit_path_system_scope() {
        let config = test_config(false);
        assert_eq!(
            config.unit_path(),
            PathBuf::from("/etc/systemd/system/ykmon.service")
        );
    }

    #[test]
    fn unit_path_user_scope() {
        let config = test_config(true);
        let path = config.unit_path();
        assert!(
            path.to_string_lossy()
                .ends_with("systemd/user/ykmon.service")
        );
    }
}
