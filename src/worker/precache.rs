//! Install-time precache of the application shell.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{versioned_name, CacheStore, ExpirationPolicy};
use crate::config::ShellConfig;
use crate::net::{Fetcher, Request, Response};

/// The fixed shell manifest for one worker version.
pub struct Precache {
  namespace: String,
  origin: Url,
  paths: Vec<String>,
  fetcher: Arc<dyn Fetcher>,
}

impl Precache {
  pub fn new(shell: &ShellConfig, fetcher: Arc<dyn Fetcher>) -> Self {
    Self {
      namespace: versioned_name(&shell.cache_prefix, &shell.version),
      origin: shell.origin.clone(),
      paths: shell.manifest.clone(),
      fetcher,
    }
  }

  /// Shell namespace this version installs into.
  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  /// Absolute URLs of the manifest entries.
  pub fn urls(&self) -> Result<Vec<Url>> {
    self
      .paths
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", path, e))
      })
      .collect()
  }

  /// Whether `url` is one of the manifest entries.
  pub fn contains(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin() && self.paths.iter().any(|p| p == url.path())
  }

  /// Fetch every manifest entry and store them all, or store nothing.
  ///
  /// Any network failure or non-200 status fails the whole install.
  pub async fn install(&self, store: &CacheStore) -> Result<usize> {
    let requests: Vec<Request> = self.urls()?.into_iter().map(Request::get).collect();

    let responses = try_join_all(requests.iter().map(|request| self.fetch_asset(request))).await?;

    let existed = store.contains_namespace(&self.namespace)?;
    let cache = store.open(&self.namespace, ExpirationPolicy::unbounded())?;

    for (request, response) in requests.iter().zip(&responses) {
      if let Err(e) = cache.put(request, response) {
        // Don't leave a half-written shell behind for a fresh version
        if !existed {
          if let Err(cleanup) = store.delete(&self.namespace) {
            warn!(namespace = %self.namespace, error = %cleanup, "Failed to remove partial shell");
          }
        }
        return Err(e);
      }
      debug!(url = %request.url, "Precached shell asset");
    }

    Ok(responses.len())
  }

  async fn fetch_asset(&self, request: &Request) -> Result<Response> {
    let response = self
      .fetcher
      .fetch(request)
      .await
      .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;

    if !response.is_cacheable() {
      return Err(eyre!(
        "Failed to precache {}: server returned status {}",
        request.url,
        response.status
      ));
    }

    Ok(response)
  }
}
