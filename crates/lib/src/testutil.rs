//! Test doubles shared across the crate's unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, bail, Result};
use camino::{Utf8Path, Utf8PathBuf};
use ignition_utils::{CommandRunner, Invocation};

use crate::configdrive::{self, PayloadSpec, StagedImage};
use crate::secret::SecretSource;
use crate::storage::StorageBackend;
use crate::volume::VolumeDescriptor;

/// Which [`CommandRunner`] entry point a double was driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Run,
    Start,
}

/// A `CommandRunner` backed by a closure; records every invocation.
pub(crate) struct FnRunner<F> {
    recorded: RefCell<Vec<(Mode, Invocation)>>,
    handler: F,
}

impl<F> fmt::Debug for FnRunner<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRunner").finish_non_exhaustive()
    }
}

impl<F: Fn(Mode, &Invocation) -> Result<String>> FnRunner<F> {
    pub(crate) fn new(handler: F) -> Self {
        Self {
            recorded: RefCell::new(Vec::new()),
            handler,
        }
    }

    pub(crate) fn recorded(&self) -> Vec<(Mode, Invocation)> {
        self.recorded.borrow().clone()
    }

    fn dispatch(&self, mode: Mode, invocation: &Invocation) -> Result<String> {
        self.recorded.borrow_mut().push((mode, invocation.clone()));
        (self.handler)(mode, invocation)
    }
}

impl<F: Fn(Mode, &Invocation) -> Result<String>> CommandRunner for FnRunner<F> {
    fn run(&self, invocation: &Invocation) -> Result<String> {
        self.dispatch(Mode::Run, invocation)
    }

    fn start(&self, invocation: &Invocation) -> Result<String> {
        self.dispatch(Mode::Start, invocation)
    }
}

/// An in-memory [`StorageBackend`] recording every call.
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    pub(crate) declared: RefCell<Vec<(String, VolumeDescriptor)>>,
    pub(crate) streamed: RefCell<Vec<(String, Utf8PathBuf)>>,
    pub(crate) lookups: RefCell<Vec<String>>,
    pub(crate) paths: RefCell<BTreeMap<String, Utf8PathBuf>>,
    pub(crate) fail_stream: Cell<bool>,
}

impl StorageBackend for MockBackend {
    fn declare_volume(&self, pool: &str, descriptor: &VolumeDescriptor) -> Result<String> {
        self.declared
            .borrow_mut()
            .push((pool.to_string(), descriptor.clone()));
        Ok(format!("key-{}", descriptor.name))
    }

    fn stream_bytes(&self, key: &str, source: &Utf8Path) -> Result<()> {
        if self.fail_stream.get() {
            bail!("stream interrupted");
        }
        self.streamed
            .borrow_mut()
            .push((key.to_string(), source.to_owned()));
        Ok(())
    }

    fn lookup_by_key(&self, key: &str) -> Result<Utf8PathBuf> {
        self.lookups.borrow_mut().push(key.to_string());
        self.paths
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("unknown volume key {key}"))
    }
}

/// An in-memory [`SecretSource`].
#[derive(Debug, Default)]
pub(crate) struct MockSecrets {
    secrets: RefCell<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>,
}

impl MockSecrets {
    pub(crate) fn insert(&self, namespace: &str, name: &str, key: &str, value: &[u8]) {
        self.secrets
            .borrow_mut()
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), value.to_vec());
    }
}

impl SecretSource for MockSecrets {
    fn get(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        Ok(self
            .secrets
            .borrow()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// A [`StagedImage`] built through a fake genisoimage that writes
/// `iso_bytes` to the requested output path.
pub(crate) fn staged_fixture(name: &str, iso_bytes: &'static [u8]) -> StagedImage {
    let payload = PayloadSpec {
        name: name.to_string(),
        pool: "default".to_string(),
        content: b"fixture".to_vec(),
    };
    let runner = FnRunner::new(move |_, inv: &Invocation| {
        std::fs::write(inv.args[1].as_str(), iso_bytes)?;
        Ok(String::new())
    });
    configdrive::build(&runner, &payload).unwrap()
}
