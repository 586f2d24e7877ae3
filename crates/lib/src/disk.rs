//! Disk descriptors for attaching an uploaded config drive.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use fn_error_context::context;
use serde::Serialize;

use crate::storage::StorageBackend;

/// In-guest device node the config drive appears at.
pub const CONFIG_DRIVE_TARGET_DEV: &str = "vdb";

/// Kind of guest device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevice {
    /// Removable media.
    Cdrom,
    /// Fixed disk.
    Disk,
}

impl DiskDevice {
    /// Name used in the domain XML.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskDevice::Cdrom => "cdrom",
            DiskDevice::Disk => "disk",
        }
    }
}

/// Bus the device hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    /// Virtual SCSI; required where the architecture has no IDE
    /// controller (s390x).
    Scsi,
    /// Virtio block device.
    Virtio,
}

impl DiskBus {
    /// Name used in the domain XML.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskBus::Scsi => "scsi",
            DiskBus::Virtio => "virtio",
        }
    }
}

/// A disk element to append to the guest domain's device list.
///
/// Appending is not idempotent: attaching twice yields two devices.
#[derive(Debug, Clone, Serialize)]
pub struct DiskDescriptor {
    /// Device kind.
    pub device: DiskDevice,
    /// Device bus.
    pub bus: DiskBus,
    /// In-guest target device node.
    pub target_dev: String,
    /// Driver type handed to qemu.
    pub driver_type: String,
    /// Host path of the backing file.
    pub source_file: Utf8PathBuf,
}

impl DiskDescriptor {
    /// Render as a libvirt domain `<disk>` element.
    pub fn to_domain_xml(&self) -> String {
        format!(
            "<disk type=\"file\" device=\"{device}\">\n  \
             <driver name=\"qemu\" type=\"{driver}\"/>\n  \
             <source file=\"{source}\"/>\n  \
             <target dev=\"{dev}\" bus=\"{bus}\"/>\n\
             </disk>\n",
            device = self.device.as_str(),
            driver = self.driver_type,
            source = self.source_file,
            dev = self.target_dev,
            bus = self.bus.as_str(),
        )
    }
}

/// Resolve `key` and produce the cdrom descriptor for the config drive.
#[context("Attaching config drive volume {key}")]
pub fn config_drive_disk(backend: &dyn StorageBackend, key: &str) -> Result<DiskDescriptor> {
    let source_file = backend
        .lookup_by_key(key)
        .with_context(|| format!("Resolving volume {key}"))?;
    Ok(DiskDescriptor {
        device: DiskDevice::Cdrom,
        bus: DiskBus::Scsi,
        target_dev: CONFIG_DRIVE_TARGET_DEV.to_string(),
        driver_type: "raw".to_string(),
        source_file,
    })
}
