//! Cache layer that applies namespace and expiration policy over storage.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::storage::CacheStorage;
use super::traits::{CachedResponse, RequestKey};
use crate::net::{Method, Request, Response};

const ACTIVE_SHELL_VERSION: &str = "active_shell_version";

/// Largest accepted max age, roughly a century. Keeps `Duration` and the
/// cutoff arithmetic in range.
pub const MAX_AGE_LIMIT_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Count and age bounds for one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
  pub max_entries: Option<usize>,
  pub max_age: Option<Duration>,
}

impl ExpirationPolicy {
  /// No bounds; entries live until the namespace is dropped.
  pub fn unbounded() -> Self {
    Self::default()
  }

  /// Ages above [`MAX_AGE_LIMIT_SECONDS`] are clamped to it.
  pub fn new(max_entries: usize, max_age_seconds: u64) -> Self {
    let seconds = max_age_seconds.min(MAX_AGE_LIMIT_SECONDS) as i64;
    Self {
      max_entries: Some(max_entries),
      max_age: Some(Duration::seconds(seconds)),
    }
  }

  /// Entries captured before the returned instant are expired.
  fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.max_age.map(|max_age| now - max_age)
  }
}

/// Name of a versioned namespace, e.g. `beer-app-cache-v1`.
pub fn versioned_name(prefix: &str, version: &str) -> String {
  format!("{}-{}", prefix, version)
}

/// Owned handle to the whole cache store.
///
/// Cloning is cheap; all clones share the same storage.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self { storage }
  }

  /// Open (creating if needed) a namespace with the given policy.
  pub fn open(&self, namespace: &str, policy: ExpirationPolicy) -> Result<Cache> {
    self.storage.create_namespace(namespace)?;
    Ok(self.handle(namespace, policy))
  }

  /// Handle to a namespace without registering it.
  pub fn handle(&self, namespace: &str, policy: ExpirationPolicy) -> Cache {
    Cache {
      storage: Arc::clone(&self.storage),
      namespace: namespace.to_string(),
      policy,
    }
  }

  pub fn contains_namespace(&self, namespace: &str) -> Result<bool> {
    Ok(self.storage.namespaces()?.iter().any(|n| n == namespace))
  }

  pub fn delete(&self, namespace: &str) -> Result<usize> {
    self.storage.delete_namespace(namespace)
  }

  /// Normalized URLs stored in `namespace`, oldest first.
  pub fn urls(&self, namespace: &str) -> Result<Vec<String>> {
    self.storage.urls(namespace)
  }

  /// Drop every `<prefix>-*` namespace other than `current`.
  ///
  /// Returns the names that were removed.
  pub fn supersede(&self, prefix: &str, current: &str) -> Result<Vec<String>> {
    let version_prefix = format!("{}-", prefix);
    let mut removed = Vec::new();

    for name in self.storage.namespaces()? {
      if name != current && name.starts_with(&version_prefix) {
        let entries = self.storage.delete_namespace(&name)?;
        debug!(namespace = %name, entries, "Superseded cache namespace");
        removed.push(name);
      }
    }

    Ok(removed)
  }

  /// Every namespace with its entry count.
  pub fn summary(&self) -> Result<Vec<(String, usize)>> {
    self
      .storage
      .namespaces()?
      .into_iter()
      .map(|name| {
        let count = self.storage.count(&name)?;
        Ok((name, count))
      })
      .collect()
  }

  pub fn active_shell_version(&self) -> Result<Option<String>> {
    self.storage.registration(ACTIVE_SHELL_VERSION)
  }

  pub fn set_active_shell_version(&self, version: &str) -> Result<()> {
    self.storage.set_registration(ACTIVE_SHELL_VERSION, version)
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.clear()
  }
}

/// A single namespace with its expiration policy.
#[derive(Clone)]
pub struct Cache {
  storage: Arc<dyn CacheStorage>,
  namespace: String,
  policy: ExpirationPolicy,
}

impl Cache {
  pub fn name(&self) -> &str {
    &self.namespace
  }

  pub fn key_for(&self, request: &Request) -> RequestKey {
    RequestKey::for_request(request)
  }

  /// Look up the entry for `request`.
  ///
  /// Entries past `max_age` count as absent and are deleted on the way out.
  /// An entry whose `Vary` headers differ from the request's is absent too,
  /// but stays stored.
  pub fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let key = self.key_for(request);
    let Some(entry) = self.storage.get(&self.namespace, &key)? else {
      return Ok(None);
    };

    if let Some(cutoff) = self.policy.cutoff(Utc::now()) {
      if entry.cached_at < cutoff {
        debug!(namespace = %self.namespace, url = %key.url(), "Cache entry expired");
        // Conditional so an entry stored after our read survives
        self.storage.delete_if_older(&self.namespace, &key, cutoff)?;
        return Ok(None);
      }
    }

    if !entry.matches(request) {
      debug!(namespace = %self.namespace, url = %key.url(), "Cache entry varies from request");
      return Ok(None);
    }

    Ok(Some(entry))
  }

  /// Store `response` for `request` if it is eligible.
  ///
  /// Returns `false` (and writes nothing) for non-GET requests and
  /// non-200 responses.
  pub fn put(&self, request: &Request, response: &Response) -> Result<bool> {
    self.put_entry(request, CachedResponse::capture(request, response))
  }

  pub fn put_entry(&self, request: &Request, entry: CachedResponse) -> Result<bool> {
    if request.method != Method::GET || !entry.response.is_cacheable() {
      return Ok(false);
    }

    let key = self.key_for(request);
    self.storage.put(&self.namespace, &key, &entry)?;
    self.enforce_limits()?;

    Ok(true)
  }

  #[cfg(test)]
  pub fn len(&self) -> Result<usize> {
    self.storage.count(&self.namespace)
  }

  fn enforce_limits(&self) -> Result<()> {
    if let Some(cutoff) = self.policy.cutoff(Utc::now()) {
      let expired = self.storage.delete_older_than(&self.namespace, cutoff)?;
      if expired > 0 {
        debug!(namespace = %self.namespace, expired, "Expired cache entries");
      }
    }

    if let Some(max_entries) = self.policy.max_entries {
      let evicted = self.storage.trim_to(&self.namespace, max_entries)?;
      if evicted > 0 {
        debug!(namespace = %self.namespace, evicted, "Evicted cache entries");
      }
    }

    Ok(())
  }
}
