//! Stale-while-revalidate policy for hashed images.

use std::sync::Arc;
use tracing::{debug, warn};

use super::tasks::BackgroundTasks;
use crate::cache::{Cache, CacheResult};
use crate::net::{FetchError, Fetcher, Request, Response};

/// Serve the cached copy immediately and refresh it in the background.
/// Without a cached copy, wait for the network and cache the result.
pub struct StaleWhileRevalidate {
  cache: Cache,
  fetcher: Arc<dyn Fetcher>,
}

impl StaleWhileRevalidate {
  pub fn new(cache: Cache, fetcher: Arc<dyn Fetcher>) -> Self {
    Self { cache, fetcher }
  }

  #[cfg(test)]
  pub fn cache(&self) -> &Cache {
    &self.cache
  }

  pub async fn handle(
    &self,
    request: &Request,
    tasks: &BackgroundTasks,
  ) -> Result<CacheResult<Response>, FetchError> {
    if let Some(entry) = self.cache.match_request(request)? {
      debug!(url = %request.url, "Image cache hit, revalidating in background");

      let cache = self.cache.clone();
      let fetcher = Arc::clone(&self.fetcher);
      let request = request.clone();
      tasks.spawn(async move {
        revalidate(&cache, fetcher.as_ref(), &request).await;
      });

      return Ok(CacheResult::from_cache(entry.response, entry.cached_at, true));
    }

    debug!(url = %request.url, "Image cache miss");
    let response = self.fetcher.fetch(request).await?;
    self.cache.put(request, &response)?;

    Ok(CacheResult::from_network(response))
  }
}

async fn revalidate(cache: &Cache, fetcher: &dyn Fetcher, request: &Request) {
  let response = match fetcher.fetch(request).await {
    Ok(response) => response,
    Err(e) => {
      warn!(url = %request.url, error = %e, "Background revalidation failed");
      return;
    }
  };

  match cache.put(request, &response) {
    Ok(true) => debug!(url = %request.url, "Revalidated cached image"),
    Ok(false) => debug!(url = %request.url, status = response.status, "Kept cached image"),
    Err(e) => warn!(url = %request.url, error = %e, "Failed to store revalidated image"),
  }
}
