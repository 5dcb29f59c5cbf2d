//! Multi-channel notification system: desktop, file, and journal channels.
//!
//! Dispatches structured monitor events through configured channels with
//! min-level filtering. Each channel is fire-and-forget — notification
//! failures are logged but never block the monitor loop.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Title shown on desktop popups.
pub const NOTIFICATION_TITLE: &str = "Yubikey Notification Service";

// ──────────────────── notification level ────────────────────

/// Severity level for notification filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ──────────────────── monitor events ────────────────────

/// A structured event emitted by the monitor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    KeyConnected,
    KeyRemoved,
    GraceCountdown {
        elapsed_secs: u64,
        grace_secs: u64,
    },
    ScreenLocked {
        desktop: String,
    },
    DaemonStarted {
        version: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl MonitorEvent {
    /// Severity of this event, for min-level filtering.
    #[must_use]
    pub const fn level(&self) -> NotificationLevel {
        match self {
            Self::KeyConnected | Self::DaemonStarted { .. } | Self::DaemonStopped { .. } => {
                NotificationLevel::Info
            }
            Self::KeyRemoved | Self::GraceCountdown { .. } | Self::Error { .. } => {
                NotificationLevel::Warning
            }
            Self::ScreenLocked { .. } => NotificationLevel::Critical,
        }
    }

    /// Short human-readable body line.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::KeyConnected => "YubiKey connected".to_string(),
            Self::KeyRemoved => "YubiKey removed".to_string(),
            Self::GraceCountdown {
                elapsed_secs,
                grace_secs,
            } => format!("YubiKey absent for {elapsed_secs}s of {grace_secs}s grace"),
            Self::ScreenLocked { desktop } => format!("Screen locked ({desktop})"),
            Self::DaemonStarted { version } => format!("ykmon v{version} started"),
            Self::DaemonStopped {
                reason,
                uptime_secs,
            } => {
                let hours = uptime_secs / 3600;
                let minutes = (uptime_secs % 3600) / 60;
                format!("ykmon stopped ({reason}) after {hours}h {minutes}m")
            }
            Self::Error { code, message } => format!("[{code}] {message}"),
        }
    }
}

// ──────────────────── configuration ────────────────────

/// Top-level notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch for all notifications.
    pub enabled: bool,
    /// Which channel names to activate.
    pub channels: Vec<String>,
    pub desktop: DesktopConfig,
    pub file: FileConfig,
    pub journal: JournalConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["desktop".to_string(), "journal".to_string()],
            desktop: DesktopConfig::default(),
            file: FileConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

/// Desktop popup settings (`notify-send`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    pub enabled: bool,
    pub min_level: NotificationLevel,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_level: NotificationLevel::Info,
        }
    }
}

/// File event log settings (append-only JSONL).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            path: home
                .join(".local")
                .join("share")
                .join("ykmon")
                .join("events.jsonl"),
        }
    }
}

/// Journal settings (systemd journal via stderr).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: NotificationLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Info,
        }
    }
}

// ──────────────────── JSONL record ────────────────────

/// One event record appended to the JSONL file.
#[derive(Debug, Serialize)]
struct EventRecord {
    ts: String,
    level: NotificationLevel,
    summary: String,
    #[serde(flatten)]
    event: MonitorEvent,
}

// ──────────────────── notification channels ────────────────────

/// A notification channel that can dispatch events.
trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, event: &MonitorEvent);
}

// ──── Desktop (notify-send) ────

struct DesktopChannel {
    min_level: NotificationLevel,
}

impl DesktopChannel {
    const fn new(config: &DesktopConfig) -> Self {
        Self {
            min_level: config.min_level,
        }
    }
}

impl Channel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn send(&self, event: &MonitorEvent) {
        if event.level() < self.min_level {
            return;
        }

        let summary = event.summary();
        let urgency = match event.level() {
            NotificationLevel::Critical => "critical",
            NotificationLevel::Warning => "normal",
            NotificationLevel::Info => "low",
        };

        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("notify-send")
                .arg("--urgency")
                .arg(urgency)
                .arg("--app-name=ykmon")
                .arg(NOTIFICATION_TITLE)
                .arg(&summary)
                .spawn();
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (urgency, summary);
        }
    }
}

// ──── File (append-only JSONL) ────

struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    fn new(config: &FileConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }
}

impl Channel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&self, event: &MonitorEvent) {
        let record = EventRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            summary: event.summary(),
            event: event.clone(),
        };

        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };

        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let file = {
            let mut opts = OpenOptions::new();
            opts.create(true).append(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
        };

        if let Ok(mut f) = file {
            let _ = writeln!(f, "{json}");
        }
    }
}

// ──── Journal (systemd structured stderr) ────

struct JournalChannel {
    min_level: NotificationLevel,
}

impl JournalChannel {
    const fn new(config: &JournalConfig) -> Self {
        Self {
            min_level: config.min_level,
        }
    }
}

impl Channel for JournalChannel {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn send(&self, event: &MonitorEvent) {
        if event.level() < self.min_level {
            return;
        }

        // systemd captures stderr and annotates via SyslogIdentifier.
        let priority = match event.level() {
            NotificationLevel::Critical => "CRIT",
            NotificationLevel::Warning => "WARNING",
            NotificationLevel::Info => "INFO",
        };

        eprintln!("[YKMON-NOTIFY] [{priority}] {}", event.summary());
    }
}

// ──────────────────── notification manager ────────────────────

/// Dispatches monitor events to all enabled channels.
///
/// Each channel's `send()` is fire-and-forget (spawns notify-send for
/// desktop, appends for file, writes stderr for journal). Channel failures
/// never propagate to the monitor loop.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
    enabled: bool,
}

impl NotificationManager {
    /// Build a manager from configuration.
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        for channel_name in &config.channels {
            match channel_name.as_str() {
                "desktop" if config.desktop.enabled => {
                    channels.push(Box::new(DesktopChannel::new(&config.desktop)));
                }
                "file" => {
                    channels.push(Box::new(FileChannel::new(&config.file)));
                }
                "journal" => {
                    channels.push(Box::new(JournalChannel::new(&config.journal)));
                }
                _ => {
                    // Unknown or disabled channel name, skip silently.
                }
            }
        }

        Self {
            channels,
            enabled: true,
        }
    }

    /// A disabled (no-op) manager.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
            enabled: false,
        }
    }

    /// Dispatch an event to all active channels.
    pub fn notify(&mut self, event: &MonitorEvent) {
        if !self.enabled {
            return;
        }
        for channel in &self.channels {
            channel.send(event);
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(NotificationLevel::Info < NotificationLevel::Warning);
        assert!(NotificationLevel::Warning < NotificationLevel::Critical);
    }

    #[test]
    fn transition_event_levels() {
        assert_eq!(MonitorEvent::KeyConnected.level(), NotificationLevel::Info);
        assert_eq!(MonitorEvent::KeyRemoved.level(), NotificationLevel::Warning);
        assert_eq!(
            MonitorEvent::ScreenLocked {
                desktop: "gnome".to_string()
            }
            .level(),
            NotificationLevel::Critical
        );
    }

    #[test]
    fn countdown_summary_shows_progress() {
        let event = MonitorEvent::GraceCountdown {
            elapsed_secs: 4,
            grace_secs: 10,
        };
        let summary = event.summary();
        assert!(summary.contains("4s"));
        assert!(summary.contains("10s"));
    }

    #[test]
    fn stopped_summary_formats_uptime() {
        let event = MonitorEvent::DaemonStopped {
            reason: "signal".to_string(),
            uptime_secs: 3_720,
        };
        let summary = event.summary();
        assert!(summary.contains("signal"));
        assert!(summary.contains("1h 2m"));
    }

    #[test]
    fn default_config_has_desktop_and_journal() {
        let config = NotificationConfig::default();
        assert!(config.enabled);
        assert!(config.channels.contains(&"desktop".to_string()));
        assert!(config.channels.contains(&"journal".to_string()));
        assert!(config.desktop.enabled);
    }

    #[test]
    fn disabled_manager_has_no_channels() {
        let manager = NotificationManager::disabled();
        assert!(!manager.is_enabled());
        assert_eq!(manager.channel_count(), 0);
    }

    #[test]
    fn manager_from_disabled_config() {
        let config = NotificationConfig {
            enabled: false,
            ..Default::default()
        };
        let manager = NotificationManager::from_config(&config);
        assert!(!manager.is_enabled());
        assert_eq!(manager.channel_count(), 0);
    }

    #[test]
    fn manager_skips_disabled_desktop() {
        let config = NotificationConfig {
            channels: vec!["desktop".to_string(), "journal".to_string()],
            desktop: DesktopConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let manager = NotificationManager::from_config(&config);
        assert_eq!(manager.channel_names(), vec!["journal"]);
    }

    #[test]
    fn manager_ignores_unknown_channel_names() {
        let config = NotificationConfig {
            channels: vec!["pager".to_string(), "journal".to_string()],
            ..Default::default()
        };
        let manager = NotificationManager::from_config(&config);
        assert_eq!(manager.channel_names(), vec!["journal"]);
    }

    #[test]
    fn file_channel_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let channel = FileChannel { path: path.clone() };

        channel.send(&MonitorEvent::KeyConnected);
        channel.send(&MonitorEvent::KeyRemoved);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        for line in &lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("ts").is_some());
            assert!(parsed.get("level").is_some());
            assert!(parsed.get("summary").is_some());
            assert!(parsed.get("type").is_some());
        }
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "key_connected");
    }

    #[test]
    fn file_channel_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("events.jsonl");
        let channel = FileChannel { path: path.clone() };

        channel.send(&MonitorEvent::KeyConnected);
        assert!(path.exists());
    }

    #[test]
    fn journal_channel_respects_min_level() {
        let channel = JournalChannel {
            min_level: NotificationLevel::Critical,
        };
        // Below threshold: silently dropped, no panic.
        channel.send(&MonitorEvent::KeyConnected);
        channel.send(&MonitorEvent::ScreenLocked {
            desktop: "kde".to_string(),
        });
    }

    #[test]
    fn manager_notify_dispatches_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let config = NotificationConfig {
            enabled: true,
            channels: vec!["file".to_string()],
            file: FileConfig { path: path.clone() },
            ..Default::default()
        };

        let mut manager = NotificationManager::from_config(&config);
        assert_eq!(manager.channel_count(), 1);

        manager.notify(&MonitorEvent::GraceCountdown {
            elapsed_secs: 2,
            grace_secs: 10,
        });

        let content = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["type"], "grace_countdown");
        assert_eq!(parsed["elapsed_secs"], 2);
    }

    #[test]
    fn manager_notify_noop_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let config = NotificationConfig {
            enabled: false,
            channels: vec!["file".to_string()],
            file: FileConfig { path: path.clone() },
            ..Default::default()
        };

        let mut manager = NotificationManager::from_config(&config);
        manager.notify(&MonitorEvent::KeyRemoved);
        assert!(!path.exists());
    }

    #[test]
    fn notification_config_roundtrip_toml() {
        let config = NotificationConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: NotificationConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn monitor_event_roundtrip_json() {
        let event = MonitorEvent::ScreenLocked {
            desktop: "sway".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: MonitorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.level(), NotificationLevel::Critical);
        assert!(parsed.summary().contains("sway"));
    }
}
