//! Policy for everything that isn't the remote API.

use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;
use url::Origin;

use super::precache::Precache;
use super::stale_while_revalidate::StaleWhileRevalidate;
use super::tasks::BackgroundTasks;
use crate::cache::{versioned_name, Cache, CacheResult, CacheStore, ExpirationPolicy};
use crate::config::Config;
use crate::net::{FetchError, Fetcher, Method, Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRoute {
  /// Manifest entry, served from the active shell namespace
  Precached,
  /// Hashed image, stale-while-revalidate
  Image,
  /// Straight to the network, never cached
  Passthrough,
}

pub struct StaticAssets {
  store: CacheStore,
  shell_prefix: String,
  precache: Precache,
  images: StaleWhileRevalidate,
  /// Only images served from the shell's own origin are cached
  shell_origin: Origin,
  image_pattern: Regex,
  fetcher: Arc<dyn Fetcher>,
}

impl StaticAssets {
  pub fn new(
    config: &Config,
    store: CacheStore,
    image_cache: Cache,
    fetcher: Arc<dyn Fetcher>,
  ) -> Result<Self> {
    let image_pattern = Regex::new(&config.images.pattern)
      .map_err(|e| eyre!("Invalid image pattern '{}': {}", config.images.pattern, e))?;

    Ok(Self {
      store,
      shell_prefix: config.shell.cache_prefix.clone(),
      precache: Precache::new(&config.shell, Arc::clone(&fetcher)),
      images: StaleWhileRevalidate::new(image_cache, Arc::clone(&fetcher)),
      shell_origin: config.shell.origin.origin(),
      image_pattern,
      fetcher,
    })
  }

  pub fn precache(&self) -> &Precache {
    &self.precache
  }

  #[cfg(test)]
  pub fn image_cache(&self) -> &Cache {
    self.images.cache()
  }

  pub fn classify(&self, request: &Request) -> AssetRoute {
    if request.method != Method::GET {
      AssetRoute::Passthrough
    } else if self.precache.contains(&request.url) {
      AssetRoute::Precached
    } else if request.url.origin() == self.shell_origin
      && self.image_pattern.is_match(request.url.path())
    {
      AssetRoute::Image
    } else {
      AssetRoute::Passthrough
    }
  }

  pub async fn handle(
    &self,
    request: &Request,
    tasks: &BackgroundTasks,
  ) -> Result<CacheResult<Response>, FetchError> {
    match self.classify(request) {
      AssetRoute::Precached => self.serve_precached(request).await,
      AssetRoute::Image => self.images.handle(request, tasks).await,
      AssetRoute::Passthrough => Ok(CacheResult::from_network(
        self.fetcher.fetch(request).await?,
      )),
    }
  }

  /// Cache-first from whichever shell version is active.
  async fn serve_precached(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    if let Some(version) = self.store.active_shell_version()? {
      let shell = self.store.handle(
        &versioned_name(&self.shell_prefix, &version),
        ExpirationPolicy::unbounded(),
      );
      if let Some(entry) = shell.match_request(request)? {
        debug!(url = %request.url, namespace = shell.name(), "Serving shell asset from cache");
        return Ok(CacheResult::from_cache(entry.response, entry.cached_at, false));
      }
    }

    debug!(url = %request.url, "Shell asset not cached, fetching");
    Ok(CacheResult::from_network(self.fetcher.fetch(request).await?))
  }
}
