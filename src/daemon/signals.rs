//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! SIGUSR1 monitor re-arm, and systemd watchdog heartbeat.
//!
//! Uses the `signal-hook` crate for safe registration. The monitor loop polls
//! the flags each cycle rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Signal state shared between signal-hook handlers and the monitor loop.
///
/// All flags use `Ordering::Relaxed`; the loop polls every cycle and no
/// ordering with other atomics is needed.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    rearm_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register the OS hooks.
    ///
    /// SIGTERM/SIGINT -> shutdown, SIGHUP -> reload, SIGUSR1 -> re-arm
    /// after a screen lock (mirrors what a PAM unlock hook would send).
    /// Registration failures are logged but not fatal.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// A handler with no OS hooks, for embedding in tests.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            rearm_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check (and clear) whether a config reload was requested.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check (and clear) whether a monitor re-arm was requested.
    pub fn should_rearm(&self) -> bool {
        self.rearm_flag.swap(false, Ordering::Relaxed)
    }

    /// Non-consuming check for any pending request, so a sleeping loop can
    /// wake early without eating the flag.
    pub fn has_pending(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
            || self.reload_flag.load(Ordering::Relaxed)
            || self.rearm_flag.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_rearm(&self) {
        self.rearm_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[YKMON-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[YKMON-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[YKMON-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.rearm_flag)) {
                eprintln!("[YKMON-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────── watchdog heartbeat ────────────────────

/// Systemd watchdog heartbeat tracker.
///
/// The monitor loop calls `maybe_notify()` every cycle; when half the
/// configured `WatchdogSec` has elapsed, a `WATCHDOG=1` datagram is sent.
pub struct WatchdogHeartbeat {
    interval: Duration,
    last_beat: Instant,
    enabled: bool,
}

impl WatchdogHeartbeat {
    /// `watchdog_sec` is the full timeout from the unit file; the heartbeat
    /// fires at half that interval. Zero disables the watchdog.
    pub fn new(watchdog_sec: u64) -> Self {
        Self {
            interval: Duration::from_secs(watchdog_sec / 2),
            last_beat: Instant::now(),
            enabled: watchdog_sec > 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Send a heartbeat if the interval has elapsed. Returns `true` if one
    /// was sent.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled || self.last_beat.elapsed() < self.interval {
            return false;
        }
        self.last_beat = Instant::now();
        sd_notify_watchdog(status);
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Send `READY=1` over NOTIFY_SOCKET so a `Type=notify` unit completes
/// its start job. No-op when not running under systemd.
pub fn sd_notify_ready() {
    sd_notify("READY=1\n");
}

/// Send `WATCHDOG=1` + `STATUS=<msg>` over NOTIFY_SOCKET.
fn sd_notify_watchdog(status: &str) {
    sd_notify(&format!("WATCHDOG=1\nSTATUS={status}\n"));
}

fn sd_notify(msg: &str) {
    #[cfg(target_os = "linux")]
    {
        match std::env::var("NOTIFY_SOCKET") {
            Ok(path) if !path.is_empty() => send_notify_datagram(&path, msg),
            _ => {}
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = msg;
    }
}

#[cfg(target_os = "linux")]
fn send_notify_datagram(socket_path: &str, msg: &str) {
    use std::os::unix::net::UnixDatagram;

    let Ok(sock) = UnixDatagram::unbound() else {
        return;
    };
    let _ = sock.send_to(msg.as_bytes(), socket_path);
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handler_has_no_pending_flags() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_shutdown());
        assert!(!handler.should_reload());
        assert!(!handler.should_rearm());
    }

    #[test]
    fn shutdown_request_is_sticky() {
        let handler = SignalHandler::unregistered();
        handler.request_shutdown();
        assert!(handler.should_shutdown());
        assert!(handler.should_shutdown());
    }

    #[test]
    fn reload_flag_clears_on_read() {
        let handler = SignalHandler::unregistered();
        handler.request_reload();
        assert!(handler.should_reload());
        assert!(!handler.should_reload());
    }

    #[test]
    fn rearm_flag_clears_on_read() {
        let handler = SignalHandler::unregistered();
        handler.request_rearm();
        assert!(handler.should_rearm());
        assert!(!handler.should_rearm());
    }

    #[test]
    fn has_pending_does_not_consume() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.has_pending());
        handler.request_rearm();
        assert!(handler.has_pending());
        assert!(handler.has_pending());
        assert!(handler.should_rearm());
        assert!(!handler.has_pending());
    }

    #[test]
    fn clones_share_state() {
        let handler = SignalHandler::unregistered();
        let other = handler.clone();
        handler.request_shutdown();
        assert!(other.should_shutdown());
    }

    #[test]
    fn watchdog_disabled_never_notifies() {
        let mut wd = WatchdogHeartbeat::disabled();
        assert!(!wd.is_enabled());
        assert!(!wd.maybe_notify("idle"));
    }

    #[test]
    fn watchdog_respects_interval() {
        let mut wd = WatchdogHeartbeat::new(120);
        // Just created, half-interval has not elapsed.
        assert!(!wd.maybe_notify("idle"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn notify_datagram_reaches_bound_socket() {
        use std::os::unix::net::UnixDatagram;

        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&socket_path).unwrap();

        send_notify_datagram(socket_path.to_str().unwrap(), "READY=1\n");

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1\n");
    }

    #[test]
    fn watchdog_fires_after_interval() {
        let mut wd = WatchdogHeartbeat {
            interval: Duration::from_millis(1),
            last_beat: Instant::now() - Duration::from_secs(1),
            enabled: true,
        };
        // sd_notify is a no-op without NOTIFY_SOCKET.
        assert!(wd.maybe_notify("idle"));
    }
}
