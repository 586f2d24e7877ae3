//! Remote-control sessions against a guest disk image.
//!
//! guestfish is started once in listening mode against the image;
//! every later command addresses that instance through the control
//! variable printed by the listener's startup banner. The replies are
//! plain text, so parsing is deliberately strict: any drift in the
//! tool's output surfaces as a parse failure rather than as a wrong
//! mount.

use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use fn_error_context::context;
use ignition_utils::{CommandRunner, Invocation};

/// Fixed in-guest destination of the payload.
pub const GUEST_IGNITION_PATH: &str = "/ignition/config.ign";
/// Filesystem label identifying the guest's boot filesystem.
const BOOT_LABEL: &str = "boot";
const GUESTFISH: &str = "guestfish";

/// The control variable printed by `guestfish --listen`.
///
/// Exported into the environment of every subsequent command so the
/// remote invocations address the same listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlVar {
    /// Variable name, e.g. `GUESTFISH_PID`.
    pub key: String,
    /// Value, e.g. the listener's PID.
    pub value: String,
}

/// Failure to understand the listener's startup banner.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BannerError {
    /// The `KEY=VALUE; export KEY` shape was absent.
    #[error("invalid output when starting guestfish: {0}")]
    MalformedBanner(String),
    /// The first segment was not a `KEY=VALUE` pair.
    #[error("failed to get the guestfish PID from {0}")]
    MalformedVariable(String),
}

/// Parse a startup banner of the form `KEY=VALUE; export KEY`.
pub fn parse_listen_banner(line: &str) -> Result<ControlVar, BannerError> {
    let segments: Vec<&str> = line.split(';').collect();
    let &[assignment, _export] = segments.as_slice() else {
        return Err(BannerError::MalformedBanner(line.to_string()));
    };
    let pair: Vec<&str> = assignment.split('=').collect();
    let &[key, value] = pair.as_slice() else {
        return Err(BannerError::MalformedVariable(line.to_string()));
    };
    Ok(ControlVar {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Lifecycle of one listener process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Listening for commands; appliance not launched yet.
    Started,
    /// Accepted `run`.
    Running,
    /// Boot filesystem mounted at `/`.
    Mounted,
    /// All filesystems unmounted again.
    Unmounted,
    /// Told to exit.
    Exited,
}

/// One live `guestfish --listen` process.
///
/// Invariant: a session that reached `Mounted` must reach `Unmounted`
/// before `exit`, even on error, or the guest image may be left in an
/// inconsistent state.
#[derive(Debug)]
pub struct RemoteControlSession<'a> {
    runner: &'a dyn CommandRunner,
    control: ControlVar,
    state: SessionState,
}

impl<'a> RemoteControlSession<'a> {
    /// Start a listener against `image` and parse its startup banner.
    #[context("Starting guestfish listener for {image}")]
    pub fn start(runner: &'a dyn CommandRunner, image: &Utf8Path) -> Result<Self> {
        let listen = Invocation::new(GUESTFISH)
            .args(["--listen", "-a", image.as_str()])
            .elevated();
        let banner = runner.start(&listen)?;
        let control = parse_listen_banner(banner.trim_end())?;
        tracing::debug!("guestfish listener up: {}={}", control.key, control.value);
        Ok(Self {
            runner,
            control,
            state: SessionState::Started,
        })
    }

    fn remote(&self, args: &[&str]) -> Result<String> {
        let remote = Invocation::new(GUESTFISH)
            .args(["--remote", "--"])
            .args(args.iter().copied())
            .env(self.control.key.as_str(), self.control.value.as_str())
            .elevated();
        self.runner.run(&remote)
    }

    /// Launch the appliance. Failure here is fatal to the session.
    pub fn launch(&mut self) -> Result<()> {
        self.remote(&["run"]).context("Launching guestfish appliance")?;
        self.state = SessionState::Running;
        Ok(())
    }

    /// Whether the appliance accepted `run` and has not been wound down.
    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Mounted)
    }

    /// Locate the boot filesystem by its label.
    pub fn find_boot_filesystem(&self) -> Result<String> {
        let reply = self.remote(&["findfs-label", BOOT_LABEL])?;
        let device = reply.trim();
        if device.is_empty() {
            bail!("failed to get the boot filesystem");
        }
        Ok(device.to_string())
    }

    /// Mount `device` at the guest root.
    pub fn mount(&mut self, device: &str) -> Result<()> {
        self.remote(&["mount", device, "/"])?;
        self.state = SessionState::Mounted;
        Ok(())
    }

    /// Copy `local` into the mounted guest filesystem at `dest`.
    pub fn upload(&self, local: &Utf8Path, dest: &str) -> Result<()> {
        self.remote(&["upload", local.as_str(), dest])?;
        Ok(())
    }

    /// Unmount every guest filesystem.
    pub fn umount_all(&mut self) -> Result<()> {
        self.remote(&["umount-all"])?;
        self.state = SessionState::Unmounted;
        Ok(())
    }

    /// Terminate the listener.
    pub fn exit(&mut self) -> Result<()> {
        self.remote(&["exit"])?;
        self.state = SessionState::Exited;
        Ok(())
    }
}

impl Drop for RemoteControlSession<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Exited {
            tracing::warn!(
                "guestfish session dropped in state {:?}; the listener may be leaked",
                self.state
            );
        }
    }
}

/// Mount the boot filesystem of `image` and copy `ignition_file` to
/// [`GUEST_IGNITION_PATH`].
///
/// The pipeline is strictly ordered and fails fast, except that
/// `umount-all` and `exit` are always attempted once the listener is
/// up, even when an earlier step failed. The first error wins; cleanup
/// failures after it are logged.
#[context("Injecting ignition into {image}")]
pub fn inject_ignition(
    runner: &dyn CommandRunner,
    image: &Utf8Path,
    ignition_file: &Utf8Path,
) -> Result<()> {
    let mut session = RemoteControlSession::start(runner, image)?;
    let pipeline = mount_and_upload(&mut session, ignition_file);
    let cleanup = wind_down(&mut session, pipeline.is_err());
    pipeline.and(cleanup)
}

fn mount_and_upload(session: &mut RemoteControlSession, ignition_file: &Utf8Path) -> Result<()> {
    session.launch()?;
    let boot = session.find_boot_filesystem()?;
    session.mount(&boot)?;
    session.upload(ignition_file, GUEST_IGNITION_PATH)
}

/// Unmount (if the appliance is up) and exit, regardless of what the
/// pipeline did. With `had_error` the caller already has a better error
/// to report, so failures here are only logged.
fn wind_down(session: &mut RemoteControlSession, had_error: bool) -> Result<()> {
    let mut result = Ok(());
    if session.is_running() {
        if let Err(e) = session.umount_all() {
            if had_error {
                tracing::warn!("umount-all failed during cleanup: {e:#}");
            } else {
                result = Err(e);
            }
        }
    }
    if let Err(e) = session.exit() {
        if had_error || result.is_err() {
            tracing::warn!("guestfish exit failed during cleanup: {e:#}");
        } else {
            result = Err(e);
        }
    }
    result
}
