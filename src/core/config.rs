//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, YkmError};
use crate::daemon::notifications::NotificationConfig;

/// Full ykmon configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub device: DeviceConfig,
    pub lock: LockConfig,
    pub paths: PathsConfig,
    pub notifications: NotificationConfig,
}

/// Probe command and polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// USB-enumeration command to invoke each cycle.
    pub command: String,
    /// Extra arguments passed to the command.
    pub args: Vec<String>,
    /// Fixed sleep between probe cycles.
    pub poll_interval_ms: u64,
    /// Hard deadline for one probe invocation.
    pub timeout_ms: u64,
}

/// The vendor:product signature to watch for.
///
/// The match pattern is deliberately configurable; the defaults are the
/// Yubico vendor id with the YubiKey 5 product family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    /// 4-digit hex USB vendor id.
    pub vendor_id: String,
    /// 4-digit hex USB product ids; any match counts as present.
    pub product_ids: Vec<String>,
}

/// Grace-period screen locking on prolonged key absence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Master switch. When false the daemon only notifies on transitions.
    pub enabled: bool,
    /// Absent cycles tolerated before the screen is locked.
    pub grace_period_secs: u64,
    /// Explicit lock command override; empty means auto-detect the desktop.
    pub command: Vec<String>,
}

/// Filesystem paths used by ykmon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub pid_file: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: "lsusb".to_string(),
            args: Vec::new(),
            poll_interval_ms: 1_000,
            timeout_ms: 5_000,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: "1050".to_string(),
            product_ids: vec![
                "0402".to_string(),
                "0405".to_string(),
                "0407".to_string(),
            ],
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_period_secs: 10,
            command: Vec::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[YKMON-CONFIG] WARNING: HOME not set, falling back to /tmp for config path"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let runtime_dir = env::var_os("XDG_RUNTIME_DIR")
            .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            config_file: home_dir.join(".config").join("ykmon").join("config.toml"),
            pid_file: runtime_dir.join("ykmon.pid"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path;
    /// defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| YkmError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(YkmError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for startup logging.
    ///
    /// Uses FNV-1a for cross-process-stable hashing (no `DefaultHasher`
    /// whose seed may vary across Rust releases).
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // probe
        if let Some(raw) = env_var("YKMON_PROBE_COMMAND") {
            self.probe.command = raw;
        }
        set_env_u64(
            "YKMON_PROBE_POLL_INTERVAL_MS",
            &mut self.probe.poll_interval_ms,
        )?;
        set_env_u64("YKMON_PROBE_TIMEOUT_MS", &mut self.probe.timeout_ms)?;

        // device
        if let Some(raw) = env_var("YKMON_DEVICE_VENDOR_ID") {
            self.device.vendor_id = raw;
        }
        if let Some(raw) = env_var("YKMON_DEVICE_PRODUCT_IDS") {
            self.device.product_ids = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // lock
        set_env_bool("YKMON_LOCK_ENABLED", &mut self.lock.enabled)?;
        set_env_u64(
            "YKMON_LOCK_GRACE_PERIOD_SECS",
            &mut self.lock.grace_period_secs,
        )?;

        // paths
        if let Some(raw) = env_var("YKMON_PID_FILE") {
            self.paths.pid_file = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Normalize hex ids for consistent, case-insensitive comparison.
    fn normalize(&mut self) {
        self.device.vendor_id = self.device.vendor_id.trim().to_ascii_lowercase();
        for id in &mut self.device.product_ids {
            *id = id.trim().to_ascii_lowercase();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.probe.command.trim().is_empty() {
            return Err(YkmError::InvalidConfig {
                details: "probe.command must not be empty".to_string(),
            });
        }
        if self.probe.poll_interval_ms == 0 {
            return Err(YkmError::InvalidConfig {
                details: "probe.poll_interval_ms must be > 0".to_string(),
            });
        }
        if self.probe.timeout_ms == 0 {
            return Err(YkmError::InvalidConfig {
                details: "probe.timeout_ms must be > 0".to_string(),
            });
        }

        validate_hex_id("device.vendor_id", &self.device.vendor_id)?;
        if self.device.product_ids.is_empty() {
            return Err(YkmError::InvalidConfig {
                details: "device.product_ids must list at least one product id".to_string(),
            });
        }
        for id in &self.device.product_ids {
            validate_hex_id("device.product_ids", id)?;
        }

        if self.lock.enabled && self.lock.grace_period_secs == 0 {
            return Err(YkmError::InvalidConfig {
                details: "lock.grace_period_secs must be > 0 when lock.enabled".to_string(),
            });
        }
        if !self.lock.command.is_empty() && self.lock.command[0].trim().is_empty() {
            return Err(YkmError::InvalidConfig {
                details: "lock.command[0] must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_hex_id(name: &str, value: &str) -> Result<()> {
    if value.len() != 4 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(YkmError::InvalidConfig {
            details: format!("{name} must be a 4-digit hex id, got {value:?}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_env_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = raw.parse::<u64>().map_err(|error| YkmError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_env_bool(name: &str, slot: &mut bool) -> Result<()> {
    if let Some(raw) = env_var(name) {
        *slot = match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(YkmError::ConfigParse {
                    context: "env",
                    details: format!("{name}={raw:?}: expected a boolean"),
                });
            }
        };
    }
    Ok(())
}
