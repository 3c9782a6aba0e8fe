//! Network-first policy for the remote API.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheResult};
use crate::net::{FetchError, Fetcher, Request, Response};

/// Prefer live data; fall back to the cache only when the network is
/// unreachable. One network attempt per request, no retries.
pub struct NetworkFirst {
  cache: Cache,
  fetcher: Arc<dyn Fetcher>,
}

impl NetworkFirst {
  pub fn new(cache: Cache, fetcher: Arc<dyn Fetcher>) -> Self {
    Self { cache, fetcher }
  }

  #[cfg(test)]
  pub fn cache(&self) -> &Cache {
    &self.cache
  }

  pub async fn handle(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        // Non-200 responses pass through untouched
        if self.cache.put(request, &response)? {
          debug!(url = %request.url, namespace = self.cache.name(), "Cached API response");
        } else {
          debug!(url = %request.url, status = response.status, "API response not cacheable");
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        warn!(url = %request.url, error = %err, "Network unavailable, trying cache");
        match self.cache.match_request(request)? {
          Some(entry) => {
            debug!(url = %request.url, cached_at = %entry.cached_at, "Serving API response from cache");
            Ok(CacheResult::offline(entry.response, entry.cached_at))
          }
          None => Err(err),
        }
      }
    }
  }
}
