//! Declaring and populating storage volumes.

use anyhow::{Context, Result};
use fn_error_context::context;

use crate::configdrive::{PayloadSpec, StagedImage};
use crate::storage::StorageBackend;

/// On-backend format of a volume's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFormat {
    /// Raw bytes; an ISO image is already its own on-disk format.
    Raw,
}

impl VolumeFormat {
    /// Name understood by the storage backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeFormat::Raw => "raw",
        }
    }
}

/// Declaration of a volume prior to streaming content into it.
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    /// Volume name within the pool.
    pub name: String,
    /// Capacity in bytes. Must equal the exact source length: the
    /// backend must neither truncate nor pad the image.
    pub capacity_bytes: u64,
    /// Content format.
    pub format: VolumeFormat,
}

/// Declare a volume sized exactly to `source` and stream the image in.
///
/// Returns the backend key of the new volume. A volume that was
/// declared but whose streaming failed is left behind on the backend;
/// that gap is deliberate (see DESIGN.md) and the error is still
/// returned to the caller.
#[context("Uploading {} to pool {}", payload.name, payload.pool)]
pub fn upload(
    backend: &dyn StorageBackend,
    payload: &PayloadSpec,
    source: &StagedImage,
) -> Result<String> {
    let descriptor = VolumeDescriptor {
        name: payload.name.clone(),
        capacity_bytes: source.size_bytes(),
        format: VolumeFormat::Raw,
    };
    let key = backend
        .declare_volume(&payload.pool, &descriptor)
        .context("Declaring volume")?;
    tracing::debug!(
        "Declared volume {} ({} bytes) as {key}",
        descriptor.name,
        descriptor.capacity_bytes
    );
    backend
        .stream_bytes(&key, source.path())
        .context("Streaming image content")?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{staged_fixture, MockBackend};

    fn payload() -> PayloadSpec {
        PayloadSpec {
            name: "test-ign".into(),
            pool: "default".into(),
            content: b"hello-ignition".to_vec(),
        }
    }

    #[test]
    fn test_upload_declares_exact_capacity() -> Result<()> {
        let staged = staged_fixture("test-ign", b"twelve bytes");
        let backend = MockBackend::default();
        let key = upload(&backend, &payload(), &staged)?;
        assert_eq!(key, "key-test-ign");

        let declared = backend.declared.borrow();
        assert_eq!(declared.len(), 1);
        let (pool, descriptor) = &declared[0];
        assert_eq!(pool, "default");
        assert_eq!(descriptor.name, "test-ign");
        assert_eq!(descriptor.capacity_bytes, staged.size_bytes());
        assert_eq!(descriptor.capacity_bytes, 12);
        assert_eq!(descriptor.format, VolumeFormat::Raw);

        let streamed = backend.streamed.borrow();
        assert_eq!(streamed.len(), 1);
        assert_eq!(streamed[0].0, "key-test-ign");
        assert_eq!(streamed[0].1, staged.path());
        Ok(())
    }

    #[test]
    fn test_stream_failure_propagates() {
        let staged = staged_fixture("test-ign", b"bytes");
        let backend = MockBackend::default();
        backend.fail_stream.set(true);
        let err = upload(&backend, &payload(), &staged).unwrap_err();
        assert!(format!("{err:#}").contains("Streaming image content"));
        // The declared volume is left behind; the staged image is not.
        assert_eq!(backend.declared.borrow().len(), 1);
    }
}
