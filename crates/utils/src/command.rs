//! Execution of external processes through an injectable runner.
//!
//! Everything this project does to a disk image happens by driving
//! external tooling (genisoimage, guestfish, virsh). This module is the
//! single place that actually spawns processes; components take a
//! `&dyn CommandRunner` so tests can intercept every invocation without
//! creating a real process.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

/// Privilege elevation wrapper. The environment must be preserved across
/// the re-dispatch so a remote session's control variable survives.
const ELEVATE_EXE: &str = "sudo";
const ELEVATE_PRESERVE_ENV: &str = "--preserve-env";

/// Default upper bound on any single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
/// Poll interval while waiting for a child to exit.
const WAIT_POLL: Duration = Duration::from_millis(25);

/// A structured record of one external process invocation.
///
/// Built by callers, logged before execution, and handed verbatim to
/// whatever implements [`CommandRunner`] - including test doubles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Re-dispatch through the privilege elevation wrapper.
    pub elevate: bool,
    /// Extra environment entries, sorted for determinism.
    pub env: BTreeMap<String, String>,
    /// The executable, resolved via `PATH`.
    pub executable: String,
    /// Arguments, not including the executable itself.
    pub args: Vec<String>,
}

impl Invocation {
    /// An invocation of `executable` with no arguments or environment.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            elevate: false,
            env: BTreeMap::new(),
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment entry.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Request privilege elevation.
    pub fn elevated(mut self) -> Self {
        self.elevate = true;
        self
    }

    /// The argv actually executed, after elevation rewriting.
    pub fn argv(&self) -> Vec<&str> {
        let mut r = Vec::with_capacity(self.args.len() + 3);
        if self.elevate {
            r.push(ELEVATE_EXE);
            r.push(ELEVATE_PRESERVE_ENV);
        }
        r.push(self.executable.as_str());
        r.extend(self.args.iter().map(|a| a.as_str()));
        r
    }

    /// The command line as a shell-quoted string, for logs and errors.
    pub fn cmdline(&self) -> String {
        let argv = self.argv();
        shlex::try_join(argv.iter().copied()).unwrap_or_else(|_| argv.join(" "))
    }
}

/// Capability to run external processes.
///
/// The only implementation outside of tests is [`HostRunner`].
pub trait CommandRunner: std::fmt::Debug {
    /// Run to completion, capturing merged stdout and stderr.
    ///
    /// A non-zero exit (or a failure to start) yields an error naming
    /// the exact command line and including the captured output.
    fn run(&self, invocation: &Invocation) -> Result<String>;

    /// Launch without waiting for completion.
    ///
    /// Returns the first line the process prints and leaves it running
    /// in the background. Used to capture a listener's startup banner.
    fn start(&self, invocation: &Invocation) -> Result<String>;
}

/// Runs commands as real host processes.
#[derive(Debug, Clone)]
pub struct HostRunner {
    timeout: Duration,
}

impl Default for HostRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl HostRunner {
    /// A runner with the default command timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that kills unresponsive commands after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Child> {
        tracing::debug!("Executing: {}", invocation.cmdline());
        if tracing::enabled!(tracing::Level::TRACE) {
            if let Ok(record) = serde_json::to_string(invocation) {
                tracing::trace!(invocation = %record);
            }
        }
        let argv = invocation.argv();
        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..]);
        cmd.envs(&invocation.env);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn()
            .with_context(|| format!("Failed to start `{}`", invocation.cmdline()))
    }
}

/// Forward lines from a child stream into a channel until EOF.
fn drain_lines(stream: impl Read + Send + 'static, tx: mpsc::Sender<String>) {
    let _worker = thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

impl CommandRunner for HostRunner {
    fn run(&self, invocation: &Invocation) -> Result<String> {
        let mut child = self.spawn(invocation)?;
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            drain_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain_lines(stderr, tx.clone());
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let mut output = String::new();
        let status = loop {
            while let Ok(line) = rx.try_recv() {
                output.push_str(&line);
                output.push('\n');
            }
            if let Some(status) = child.try_wait().context("Waiting for child")? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "Command `{}` timed out after {}s",
                    invocation.cmdline(),
                    self.timeout.as_secs()
                );
            }
            thread::sleep(WAIT_POLL);
        };
        // The pipes are closed now; pick up whatever the readers still had.
        for line in rx {
            output.push_str(&line);
            output.push('\n');
        }
        tracing::trace!("Ran `{}`: {status}", invocation.cmdline());
        if !status.success() {
            bail!(
                "error running command `{}` ({status}): {output}",
                invocation.cmdline()
            );
        }
        Ok(output)
    }

    fn start(&self, invocation: &Invocation) -> Result<String> {
        let mut child = self.spawn(invocation)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("No stdout from `{}`", invocation.cmdline()))?;
        let (tx, rx) = mpsc::channel();
        drain_lines(stdout, tx);
        let banner = rx.recv_timeout(self.timeout).with_context(|| {
            format!(
                "No startup output from `{}` within {}s",
                invocation.cmdline(),
                self.timeout.as_secs()
            )
        })?;
        tracing::debug!("Started `{}`: {banner}", invocation.cmdline());
        // Dropping the Child handle leaves the listener running.
        Ok(banner)
    }
}
