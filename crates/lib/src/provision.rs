//! End-to-end provisioning entry points.

use anyhow::{Context, Result};
use camino::Utf8Path;
use fn_error_context::context;
use ignition_utils::CommandRunner;

use crate::configdrive::{self, PayloadSpec};
use crate::disk::{self, DiskDescriptor};
use crate::guestfish;
use crate::secret::{self, SecretSource};
use crate::storage::StorageBackend;
use crate::volume;

/// Builds and attaches ignition media for one provisioning request.
///
/// Synchronous: every step blocks until the external tooling finished.
/// Nothing here retries; that is the orchestrating caller's concern.
#[derive(Debug)]
pub struct IgnitionProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    backend: &'a dyn StorageBackend,
}

impl<'a> IgnitionProvisioner<'a> {
    /// A provisioner using the given process runner and storage backend.
    pub fn new(runner: &'a dyn CommandRunner, backend: &'a dyn StorageBackend) -> Self {
        Self { runner, backend }
    }

    /// Resolve the ignition payload for `volume_name` from the secret
    /// store.
    #[context("Resolving ignition payload for {volume_name}")]
    pub fn payload_from_secret(
        &self,
        secrets: &dyn SecretSource,
        namespace: &str,
        secret_name: &str,
        volume_name: &str,
        pool: &str,
    ) -> Result<PayloadSpec> {
        let content = secret::user_data(secrets, namespace, secret_name)?;
        Ok(PayloadSpec {
            name: volume_name.to_string(),
            pool: pool.to_string(),
            content,
        })
    }

    /// The config-drive path: build the ISO, upload it into the pool,
    /// and return the cdrom disk to append to the guest's device list
    /// before first boot.
    #[context("Provisioning config drive {}", payload.name)]
    pub fn provision_config_drive(&self, payload: &PayloadSpec) -> Result<DiskDescriptor> {
        let staged = configdrive::build(self.runner, payload)?;
        // `staged` is dropped, and with it the local image file, whether
        // or not the upload succeeds.
        let key = volume::upload(self.backend, payload, &staged)?;
        disk::config_drive_disk(self.backend, &key)
    }

    /// The direct-injection path: write `content` into the boot
    /// filesystem of an already attached disk image.
    #[context("Injecting ignition into {image}")]
    pub fn inject_into_image(&self, image: &Utf8Path, content: &[u8]) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix("ignition-inject-")
            .tempdir()
            .context("Allocating scratch directory")?;
        let local = scratch.path().join("config.ign");
        std::fs::write(&local, content)
            .with_context(|| format!("Writing {}", local.display()))?;
        let local = Utf8Path::from_path(&local).context("Scratch path is not UTF-8")?;
        guestfish::inject_ignition(self.runner, image, local)
        // `scratch` and the payload copy are removed on every exit path.
    }
}
