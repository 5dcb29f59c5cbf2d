//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use ykmon::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, YkmError};

// Detection
pub use crate::detect::parser::{DeviceSignature, UsbDevice, parse_devices};
pub use crate::detect::prober::{CommandProber, DeviceSource, ProbeOutput, ScriptedProber};
pub use crate::detect::tracker::{Presence, Transition, transition};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{CycleOutcome, MonitorDaemon};
pub use crate::daemon::notifications::{MonitorEvent, NotificationManager};
#[cfg(unix)]
pub use crate::daemon::pidlock::PidLock;

// Platform
pub use crate::platform::desktop::{DesktopEnvironment, ScreenLocker};
