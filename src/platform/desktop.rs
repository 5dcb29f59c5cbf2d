//! Desktop environment detection and screen locking.
//!
//! Each desktop ships its own locker binary; we pick one from
//! `XDG_CURRENT_DESKTOP` and fall back to `loginctl lock-session`, which
//! works on any logind system regardless of desktop.

use std::env;
use std::fmt;
use std::process::Command;

use crate::core::config::LockConfig;
use crate::core::errors::{Result, YkmError};

/// Known desktop environments with dedicated lock commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopEnvironment {
    Gnome,
    Kde,
    Xfce,
    Cinnamon,
    Mate,
    Lxde,
    Sway,
    Unknown,
}

impl DesktopEnvironment {
    /// Detect the running desktop from the process environment.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_env_values(
            env::var("XDG_CURRENT_DESKTOP").ok().as_deref(),
            env::var("WAYLAND_DISPLAY").ok().as_deref(),
        )
    }

    /// Classification from explicit env values, for tests.
    #[must_use]
    pub fn from_env_values(xdg_current_desktop: Option<&str>, wayland_display: Option<&str>) -> Self {
        let xdg = xdg_current_desktop.unwrap_or("").to_ascii_lowercase();

        // XDG_CURRENT_DESKTOP may be colon-separated, e.g. "ubuntu:GNOME".
        for part in xdg.split(':') {
            let hit = match part.trim() {
                p if p.contains("gnome") || p.contains("unity") => Some(Self::Gnome),
                p if p.contains("kde") || p.contains("plasma") => Some(Self::Kde),
                p if p.contains("xfce") => Some(Self::Xfce),
                p if p.contains("cinnamon") => Some(Self::Cinnamon),
                p if p.contains("mate") => Some(Self::Mate),
                p if p.contains("lxde") || p.contains("lxqt") => Some(Self::Lxde),
                p if p.contains("sway") => Some(Self::Sway),
                _ => None,
            };
            if let Some(de) = hit {
                return de;
            }
        }

        // A bare wlroots session with no XDG hint; swaylock is the best guess.
        if wayland_display.is_some_and(|d| !d.is_empty()) && xdg.is_empty() {
            return Self::Sway;
        }

        Self::Unknown
    }

    /// The lock command for this desktop, or `None` for [`Self::Unknown`].
    #[must_use]
    pub fn lock_command(self) -> Option<Vec<String>> {
        let argv: &[&str] = match self {
            Self::Gnome => &["gnome-screensaver-command", "-l"],
            Self::Kde => &[
                "qdbus-qt6",
                "org.freedesktop.ScreenSaver",
                "/ScreenSaver",
                "Lock",
            ],
            Self::Xfce => &["xflock4"],
            Self::Cinnamon => &["cinnamon-screensaver-command", "-l"],
            Self::Mate => &["mate-screensaver-command", "-l"],
            Self::Lxde => &["lxlock"],
            Self::Sway => &["swaylock"],
            Self::Unknown => return None,
        };
        Some(argv.iter().map(ToString::to_string).collect())
    }
}

impl fmt::Display for DesktopEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gnome => "gnome",
            Self::Kde => "kde",
            Self::Xfce => "xfce",
            Self::Cinnamon => "cinnamon",
            Self::Mate => "mate",
            Self::Lxde => "lxde",
            Self::Sway => "sway",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Locks the screen with a configured or auto-detected command.
#[derive(Debug, Clone)]
pub struct ScreenLocker {
    override_command: Vec<String>,
}

impl ScreenLocker {
    #[must_use]
    pub fn from_config(config: &LockConfig) -> Self {
        Self {
            override_command: config.command.clone(),
        }
    }

    /// The command the locker would run, as `(label, argv)`.
    #[must_use]
    pub fn resolve(&self) -> (String, Vec<String>) {
        if !self.override_command.is_empty() {
            return ("custom".to_string(), self.override_command.clone());
        }
        let desktop = DesktopEnvironment::detect();
        match desktop.lock_command() {
            Some(argv) => (desktop.to_string(), argv),
            None => (desktop.to_string(), fallback_command()),
        }
    }

    /// Lock the screen. Returns the label of the desktop/command that
    /// succeeded.
    ///
    /// When the primary command is missing or exits nonzero, retries with
    /// `loginctl lock-session` before giving up.
    pub fn lock(&self) -> Result<String> {
        let (label, argv) = self.resolve();
        if run_lock_command(&argv) {
            return Ok(label);
        }

        eprintln!("[YKMON-LOCK] {} failed, falling back to loginctl", argv[0]);
        let fallback = fallback_command();
        if argv != fallback && run_lock_command(&fallback) {
            return Ok("loginctl".to_string());
        }

        Err(YkmError::Runtime {
            details: format!("screen lock failed (tried {} and loginctl)", argv[0]),
        })
    }
}

fn fallback_command() -> Vec<String> {
    vec!["loginctl".to_string(), "lock-session".to_string()]
}

fn run_lock_command(argv: &[String]) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return false;
    };
    Command::new(program)
        .args(args)
        .status()
        .is_ok_and(|status| status.success())
}
