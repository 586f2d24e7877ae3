//! Building the config-drive ISO.
//!
//! The payload is staged into the fixed `openstack/latest/user_data`
//! layout the guest expects on a `config-2` labeled volume, then
//! authored into an ISO 9660 image by genisoimage. Every build gets its
//! own staging directory, so concurrent builds cannot see each other's
//! payload bytes.

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use ignition_utils::{CommandRunner, Invocation};

/// Volume label the guest scans for when probing for a config drive.
pub const CONFIG_DRIVE_LABEL: &str = "config-2";
/// Path of the payload inside the ISO, relative to the volume root.
pub const USER_DATA_PATH: &str = "openstack/latest/user_data";
/// Staging subdirectory that becomes the ISO root.
const DRIVE_DIR: &str = "drive";
const OPENSTACK_DIR: &str = "openstack";

/// The payload to embed into a config drive.
#[derive(Debug, Clone)]
pub struct PayloadSpec {
    /// Volume name under which the image is uploaded.
    pub name: String,
    /// Storage pool the volume is created in.
    pub pool: String,
    /// Opaque payload bytes; their semantics belong to the guest OS.
    pub content: Vec<u8>,
}

/// A built ISO image on host-local storage, pending upload.
///
/// Owns its staging directory: the image file is removed when this is
/// dropped, whether or not the upload succeeded.
#[derive(Debug)]
pub struct StagedImage {
    // Held for Drop; removing the directory removes the image.
    _staging: tempfile::TempDir,
    path: Utf8PathBuf,
    size: u64,
}

impl StagedImage {
    /// Path of the ISO file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Exact byte length of the ISO file.
    pub fn size_bytes(&self) -> u64 {
        self.size
    }
}

/// Stage `payload` and author it into a `config-2` labeled ISO image.
///
/// On success the returned image names an existing file containing
/// exactly one file, `/openstack/latest/user_data`, whose bytes equal
/// `payload.content`.
#[context("Building config drive for {}", payload.name)]
pub fn build(runner: &dyn CommandRunner, payload: &PayloadSpec) -> Result<StagedImage> {
    let staging = tempfile::Builder::new()
        .prefix("ignition-drive-")
        .tempdir()
        .context("Allocating staging directory")?;
    let root = Utf8Path::from_path(staging.path())
        .context("Staging directory path is not UTF-8")?
        .to_owned();

    let drive = root.join(DRIVE_DIR);
    let latest = drive.join(OPENSTACK_DIR).join("latest");
    fs::create_dir_all(&latest).with_context(|| format!("Creating {latest}"))?;
    let user_data = drive.join(USER_DATA_PATH);
    fs::write(&user_data, &payload.content).with_context(|| format!("Writing {user_data}"))?;

    let iso = root.join(format!("{}.iso", payload.name));
    let authoring = Invocation::new("genisoimage").args([
        "-o",
        iso.as_str(),
        "-ldots",
        "-allow-lowercase",
        "-allow-multidot",
        "-l",
        "-quiet",
        "-J",
        "-r",
        "-V",
        CONFIG_DRIVE_LABEL,
        drive.as_str(),
    ]);
    runner.run(&authoring).context("Authoring ISO image")?;

    // Only the authored image should outlive the build; drop the staged
    // payload bytes now rather than at upload time.
    let openstack = drive.join(OPENSTACK_DIR);
    fs::remove_dir_all(&openstack).with_context(|| format!("Removing {openstack}"))?;

    let size = fs::metadata(&iso)
        .with_context(|| format!("Reading metadata of {iso}"))?
        .len();
    tracing::debug!("Authored config drive {iso} ({size} bytes)");
    Ok(StagedImage {
        _staging: staging,
        path: iso,
        size,
    })
}
