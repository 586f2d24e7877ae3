//! The storage backend boundary.
//!
//! Only three operations of the hypervisor's volume management are
//! consumed here, so they are modeled as a trait and the pipeline is
//! testable without a hypervisor. The shipped implementation drives the
//! `virsh` client through the command runner rather than linking
//! libvirt.

use anyhow::{ensure, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use ignition_utils::{CommandRunner, Invocation};

use crate::volume::VolumeDescriptor;

/// Minimal surface of the hypervisor's volume management.
pub trait StorageBackend: std::fmt::Debug {
    /// Create the volume in `pool`; returns its backend key.
    fn declare_volume(&self, pool: &str, descriptor: &VolumeDescriptor) -> Result<String>;

    /// Stream the bytes of `source` into the volume identified by `key`.
    fn stream_bytes(&self, key: &str, source: &Utf8Path) -> Result<()>;

    /// Resolve a backend key to a host-visible file path.
    fn lookup_by_key(&self, key: &str) -> Result<Utf8PathBuf>;
}

/// Storage backend driving the `virsh` command line client.
#[derive(Debug)]
pub struct VirshBackend<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> VirshBackend<'a> {
    /// A backend executing `virsh` through `runner`.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn virsh(&self, args: &[&str]) -> Result<String> {
        self.runner
            .run(&Invocation::new("virsh").args(args.iter().copied()))
    }
}

impl StorageBackend for VirshBackend<'_> {
    #[context("Declaring volume {} in pool {pool}", descriptor.name)]
    fn declare_volume(&self, pool: &str, descriptor: &VolumeDescriptor) -> Result<String> {
        let capacity = format!("{}b", descriptor.capacity_bytes);
        self.virsh(&[
            "vol-create-as",
            pool,
            &descriptor.name,
            &capacity,
            "--format",
            descriptor.format.as_str(),
        ])?;
        let key = self.virsh(&["vol-key", "--pool", pool, &descriptor.name])?;
        let key = key.trim();
        ensure!(!key.is_empty(), "Empty volume key for {}", descriptor.name);
        Ok(key.to_string())
    }

    #[context("Streaming {source} into volume {key}")]
    fn stream_bytes(&self, key: &str, source: &Utf8Path) -> Result<()> {
        self.virsh(&["vol-upload", key, source.as_str()])?;
        Ok(())
    }

    #[context("Resolving volume {key}")]
    fn lookup_by_key(&self, key: &str) -> Result<Utf8PathBuf> {
        let path = self.virsh(&["vol-path", key])?;
        let path = path.trim();
        ensure!(!path.is_empty(), "No path for volume key {key}");
        Ok(path.into())
    }
}
