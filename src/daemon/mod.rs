//! Daemon runtime: monitor loop, signals, PID lock, notifications, and
//! systemd service management.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod notifications;
#[cfg(unix)]
pub mod pidlock;
pub mod service;
#[cfg(feature = "daemon")]
pub mod signals;
