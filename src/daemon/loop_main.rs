//! The monitor daemon: probe, detect edges, notify, and optionally lock.
//!
//! Single-threaded poll loop. One cycle is probe -> parse -> compare ->
//! react; a failed probe logs and leaves all state untouched, so transient
//! `lsusb` failures can never produce a phantom removal.

use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::daemon::notifications::{MonitorEvent, NotificationManager};
use crate::daemon::signals::{SignalHandler, WatchdogHeartbeat, sd_notify_ready};
use crate::detect::parser::{DeviceSignature, parse_devices};
use crate::detect::prober::DeviceSource;
use crate::detect::tracker::{Presence, Transition, transition};
use crate::platform::desktop::ScreenLocker;

/// What a single cycle did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Probe succeeded; the contained edge was observed.
    Observed(Transition),
    /// Probe failed; state is unchanged.
    ProbeFailed,
}

/// The polling monitor.
pub struct MonitorDaemon {
    config: Config,
    signature: DeviceSignature,
    prober: Box<dyn DeviceSource>,
    signals: SignalHandler,
    watchdog: WatchdogHeartbeat,
    notifier: NotificationManager,
    locker: ScreenLocker,
    presence: Presence,
    /// False after a lock fires, until the key returns or SIGUSR1 re-arms.
    armed: bool,
    /// Milliseconds of continuous absence, feeding the grace countdown.
    absent_ms: u64,
    consecutive_probe_failures: u64,
    start: Instant,
}

impl MonitorDaemon {
    /// Build a daemon with live signal registration (for `ykmon daemon`).
    pub fn new(config: Config, prober: Box<dyn DeviceSource>) -> Result<Self> {
        let notifier = NotificationManager::from_config(&config.notifications);
        Self::with_parts(config, prober, notifier, SignalHandler::new())
    }

    /// Build from explicit parts; tests pass an unregistered handler and a
    /// scripted prober.
    pub fn with_parts(
        config: Config,
        prober: Box<dyn DeviceSource>,
        notifier: NotificationManager,
        signals: SignalHandler,
    ) -> Result<Self> {
        let signature = DeviceSignature::new(&config.device.vendor_id, &config.device.product_ids)?;
        let locker = ScreenLocker::from_config(&config.lock);
        Ok(Self {
            config,
            signature,
            prober,
            signals,
            watchdog: WatchdogHeartbeat::disabled(),
            notifier,
            locker,
            presence: Presence::Absent,
            armed: true,
            absent_ms: 0,
            consecutive_probe_failures: 0,
            start: Instant::now(),
        })
    }

    /// Enable the systemd watchdog heartbeat.
    pub fn set_watchdog(&mut self, watchdog_sec: u64) {
        self.watchdog = WatchdogHeartbeat::new(watchdog_sec);
    }

    #[must_use]
    pub const fn presence(&self) -> Presence {
        self.presence
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    #[must_use]
    pub const fn absent_elapsed_secs(&self) -> u64 {
        self.absent_ms / 1000
    }

    /// Shared signal state, for wiring external shutdown triggers.
    #[must_use]
    pub fn signals(&self) -> SignalHandler {
        self.signals.clone()
    }

    /// Establish the baseline from a first probe, without notifying.
    ///
    /// A failed first probe primes to absent; the first successful cycle
    /// with the key plugged in then reports a connect edge.
    pub fn prime(&mut self) {
        match self.prober.probe() {
            Ok(output) => {
                let devices = parse_devices(&output.raw);
                self.presence = Presence::from_bool(self.signature.matches_any(&devices));
            }
            Err(e) => {
                eprintln!("[YKMON-PROBE] initial probe failed, assuming absent: {e}");
                self.presence = Presence::Absent;
            }
        }
        self.absent_ms = 0;
    }

    /// One poll cycle. Public so scenario tests can drive the daemon
    /// without the sleep.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let output = match self.prober.probe() {
            Ok(output) => output,
            Err(e) => {
                self.consecutive_probe_failures += 1;
                eprintln!(
                    "[YKMON-PROBE] probe failed ({} consecutive): {e}",
                    self.consecutive_probe_failures
                );
                return CycleOutcome::ProbeFailed;
            }
        };
        self.consecutive_probe_failures = 0;

        let devices = parse_devices(&output.raw);
        let next = Presence::from_bool(self.signature.matches_any(&devices));
        let edge = transition(self.presence, next);
        self.presence = next;

        match edge {
            Transition::BecamePresent => {
                self.absent_ms = 0;
                if !self.armed {
                    eprintln!("[YKMON-MONITOR] key returned, re-arming");
                    self.armed = true;
                }
                self.notifier.notify(&MonitorEvent::KeyConnected);
            }
            Transition::BecameAbsent => {
                self.absent_ms = 0;
                self.notifier.notify(&MonitorEvent::KeyRemoved);
            }
            Transition::NoChange => {
                if next == Presence::Absent {
                    self.tick_absent();
                }
            }
        }

        CycleOutcome::Observed(edge)
    }

    /// Advance the grace countdown during continuous absence.
    ///
    /// Only runs while armed and with locking enabled; a disabled lock
    /// keeps the steady state completely quiet.
    fn tick_absent(&mut self) {
        if !self.armed || !self.config.lock.enabled {
            return;
        }

        let before_secs = self.absent_ms / 1000;
        self.absent_ms = self.absent_ms.saturating_add(self.config.probe.poll_interval_ms);
        let elapsed_secs = self.absent_ms / 1000;
        let grace_secs = self.config.lock.grace_period_secs;

        if elapsed_secs >= grace_secs {
            match self.locker.lock() {
                Ok(desktop) => {
                    eprintln!("[YKMON-MONITOR] grace expired, screen locked via {desktop}");
                    self.notifier.notify(&MonitorEvent::ScreenLocked { desktop });
                    // Disarmed until the key returns or SIGUSR1.
                    self.armed = false;
                    self.absent_ms = 0;
                }
                Err(e) => {
                    eprintln!("[YKMON-MONITOR] lock attempt failed, will retry: {e}");
                    self.notifier.notify(&MonitorEvent::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        } else if elapsed_secs > before_secs {
            self.notifier.notify(&MonitorEvent::GraceCountdown {
                elapsed_secs,
                grace_secs,
            });
        }
    }

    /// Re-apply configuration after SIGHUP.
    fn reload_config(&mut self) {
        let path = self.config.paths.config_file.clone();
        match Config::load(Some(&path)) {
            Ok(new_config) => {
                match DeviceSignature::new(
                    &new_config.device.vendor_id,
                    &new_config.device.product_ids,
                ) {
                    Ok(signature) => {
                        self.signature = signature;
                        self.notifier = NotificationManager::from_config(&new_config.notifications);
                        self.locker = ScreenLocker::from_config(&new_config.lock);
                        self.config = new_config;
                        eprintln!(
                            "[YKMON-MONITOR] config reloaded from {}",
                            path.display()
                        );
                    }
                    Err(e) => self.report_reload_failure(&e.to_string(), e.code()),
                }
            }
            Err(e) => self.report_reload_failure(&e.to_string(), e.code()),
        }
    }

    fn report_reload_failure(&mut self, message: &str, code: &str) {
        eprintln!("[YKMON-MONITOR] reload failed, keeping previous config: {message}");
        self.notifier.notify(&MonitorEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Run until a shutdown signal arrives.
    pub fn run(&mut self) -> Result<()> {
        self.start = Instant::now();
        self.prime();

        eprintln!(
            "[YKMON-MONITOR] watching {}:{:?} via {} every {}ms (initial: {}, config {})",
            self.signature.vendor_id(),
            self.signature.product_ids(),
            self.prober.describe(),
            self.config.probe.poll_interval_ms,
            self.presence,
            self.config.stable_hash().unwrap_or_else(|_| "?".to_string()),
        );
        self.notifier.notify(&MonitorEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
        });
        // A Type=notify unit waits on this before the start job completes.
        sd_notify_ready();

        while !self.signals.should_shutdown() {
            if self.signals.should_reload() {
                self.reload_config();
            }
            if self.signals.should_rearm() {
                eprintln!("[YKMON-MONITOR] re-armed by SIGUSR1");
                self.armed = true;
                self.absent_ms = 0;
            }

            let outcome = self.run_cycle();
            let status = match outcome {
                CycleOutcome::Observed(_) => self.presence.to_string(),
                CycleOutcome::ProbeFailed => "probe failing".to_string(),
            };
            self.watchdog.maybe_notify(&status);

            self.interruptible_sleep(Duration::from_millis(self.config.probe.poll_interval_ms));
        }

        let uptime_secs = self.start.elapsed().as_secs();
        eprintln!("[YKMON-MONITOR] shutting down after {uptime_secs}s");
        self.notifier.notify(&MonitorEvent::DaemonStopped {
            reason: "signal".to_string(),
            uptime_secs,
        });
        Ok(())
    }

    /// Sleep in short slices so pending signals cut the wait; SIGUSR1 in
    /// particular should trigger a prompt re-probe.
    fn interruptible_sleep(&self, total: Duration) {
        let slice = Duration::from_millis(100);
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if self.signals.has_pending() {
                return;
            }
            std::thread::sleep(slice.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}
