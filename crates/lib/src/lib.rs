//! # Ignition provisioning for libvirt guests
//!
//! Some guest architectures (notably s390x) cannot read an ignition
//! payload from an attached disk at first boot. This crate provisions
//! the payload anyway, two ways:
//!
//! - **Config drive**: synthesize a `config-2` labeled ISO 9660 image
//!   containing the payload, upload it into a libvirt storage pool, and
//!   produce a cdrom disk element to attach before first boot.
//! - **Direct injection**: mount the guest's boot filesystem from the
//!   host via a guestfish remote-control session and write the payload
//!   file straight into it.
//!
//! All external tooling is driven through the injectable
//! [`CommandRunner`](ignition_utils::CommandRunner) capability.

pub mod config;
pub mod configdrive;
pub mod disk;
pub mod guestfish;
pub mod provision;
pub mod secret;
pub mod storage;
pub mod volume;

#[cfg(test)]
pub(crate) mod testutil;
