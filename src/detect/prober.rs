//! Device enumeration probing.
//!
//! The daemon never talks to `lsusb` directly; it goes through the
//! [`DeviceSource`] trait so that the monitor loop can be driven by a
//! scripted source in tests.

use std::collections::VecDeque;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::core::errors::{Result, YkmError};

/// Raw output of one enumeration probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutput {
    pub raw: String,
}

impl ProbeOutput {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

/// Anything that can report the current USB device listing.
pub trait DeviceSource {
    /// One probe attempt. Errors are per-cycle: the caller logs and
    /// retries next cycle rather than tearing down.
    fn probe(&mut self) -> Result<ProbeOutput>;

    /// Short name for log lines.
    fn describe(&self) -> String;
}

/// Probes by invoking an external enumeration command (normally `lsusb`).
#[derive(Debug, Clone)]
pub struct CommandProber {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProber {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

impl DeviceSource for CommandProber {
    fn probe(&mut self) -> Result<ProbeOutput> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| YkmError::ProbeSpawn {
                command: self.command_line(),
                source,
            })?;

        // Poll for exit in short slices; the output of an enumeration
        // tool is far below pipe capacity, so collecting after exit is
        // safe.
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(YkmError::ProbeTimeout {
                            command: self.command_line(),
                            timeout_ms: u64::try_from(self.timeout.as_millis())
                                .unwrap_or(u64::MAX),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(source) => {
                    return Err(YkmError::ProbeSpawn {
                        command: self.command_line(),
                        source,
                    });
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|source| YkmError::ProbeSpawn {
                command: self.command_line(),
                source,
            })?;

        if !output.status.success() {
            return Err(YkmError::ProbeFailed {
                command: self.command_line(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(ProbeOutput::new(
            String::from_utf8_lossy(&output.stdout).into_owned(),
        ))
    }

    fn describe(&self) -> String {
        self.command_line()
    }
}

/// Replays a fixed script of probe results. Test double for the
/// monitor loop.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    script: VecDeque<Result<ProbeOutput>>,
    /// Returned once the script is exhausted.
    fallback: Option<String>,
}

impl ScriptedProber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful probe yielding `raw`.
    #[must_use]
    pub fn then_output(mut self, raw: impl Into<String>) -> Self {
        self.script.push_back(Ok(ProbeOutput::new(raw)));
        self
    }

    /// Queue a failing probe.
    #[must_use]
    pub fn then_error(mut self, error: YkmError) -> Self {
        self.script.push_back(Err(error));
        self
    }

    /// After the script runs out, keep returning `raw` forever.
    #[must_use]
    pub fn then_repeat(mut self, raw: impl Into<String>) -> Self {
        self.fallback = Some(raw.into());
        self
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DeviceSource for ScriptedProber {
    fn probe(&mut self) -> Result<ProbeOutput> {
        if let Some(step) = self.script.pop_front() {
            return step;
        }
        match &self.fallback {
            Some(raw) => Ok(ProbeOutput::new(raw.clone())),
            None => Err(YkmError::ProbeFailed {
                command: "scripted".to_string(),
                status: -1,
                stderr: "script exhausted".to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
