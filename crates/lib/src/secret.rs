//! The secret source boundary for ignition payloads.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use fn_error_context::context;

/// Key within the secret that holds the ignition payload bytes.
pub const USER_DATA_KEY: &str = "userData";

/// Minimal read-only view of the platform's secret store.
pub trait SecretSource: std::fmt::Debug {
    /// Fetch a secret's key/value data, or `None` if it does not exist.
    fn get(&self, namespace: &str, name: &str) -> Result<Option<BTreeMap<String, Vec<u8>>>>;
}

/// Retrieve the ignition payload bytes from `source`.
///
/// An unset secret name, a missing secret and a missing `userData` key
/// are all hard failures naming the secret coordinates.
#[context("Retrieving user data secret {namespace}/{name}")]
pub fn user_data(source: &dyn SecretSource, namespace: &str, name: &str) -> Result<Vec<u8>> {
    if name.is_empty() {
        bail!("user data secret name not set");
    }
    let mut secret = source
        .get(namespace, name)?
        .ok_or_else(|| anyhow!("secret not found"))?;
    secret
        .remove(USER_DATA_KEY)
        .ok_or_else(|| anyhow!("key '{USER_DATA_KEY}' not found in the secret"))
}
