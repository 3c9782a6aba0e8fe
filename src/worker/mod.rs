//! Service-worker style request interception.
//!
//! [`ServiceWorker`] owns the cache store and the fetcher. Every outgoing
//! request goes through [`ServiceWorker::handle_fetch`], which routes it to
//! exactly one policy:
//! - remote API origin: network-first with bounded cache fallback
//! - shell manifest entries: cache-first from the active shell version
//! - hashed images: stale-while-revalidate
//! - anything else: network passthrough
//!
//! Install precaches the shell for the configured version; activate makes it
//! the active version and drops older shell namespaces.

mod network_first;
mod precache;
mod router;
mod stale_while_revalidate;
mod static_assets;
mod tasks;

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

#[cfg(test)]
use crate::cache::Cache;
use crate::cache::{CacheResult, CacheStore, ExpirationPolicy};
use crate::config::Config;
use crate::net::{FetchError, Fetcher, Request, Response};

pub use static_assets::AssetRoute;

use network_first::NetworkFirst;
use router::{Route, Router};
use static_assets::StaticAssets;
use tasks::BackgroundTasks;

pub struct ServiceWorker {
  router: Router,
  api: NetworkFirst,
  assets: StaticAssets,
  store: CacheStore,
  shell_prefix: String,
  shell_version: String,
  tasks: BackgroundTasks,
}

impl ServiceWorker {
  /// Build a worker over `store`, registering the API and image namespaces.
  pub fn new(config: &Config, store: CacheStore, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
    let api_cache = store.open(
      &config.api.cache_name,
      ExpirationPolicy::new(config.api.max_entries, config.api.max_age_seconds),
    )?;
    let image_cache = store.open(&config.images.cache_name, ExpirationPolicy::unbounded())?;

    Ok(Self {
      router: Router::new(&config.api.base_url),
      api: NetworkFirst::new(api_cache, Arc::clone(&fetcher)),
      assets: StaticAssets::new(config, store.clone(), image_cache, fetcher)?,
      store,
      shell_prefix: config.shell.cache_prefix.clone(),
      shell_version: config.shell.version.clone(),
      tasks: BackgroundTasks::new(),
    })
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  #[cfg(test)]
  pub fn api_cache(&self) -> &Cache {
    self.api.cache()
  }

  #[cfg(test)]
  pub fn image_cache(&self) -> &Cache {
    self.assets.image_cache()
  }

  /// Shell namespace for the configured version.
  pub fn shell_namespace(&self) -> &str {
    self.assets.precache().namespace()
  }

  pub fn active_version(&self) -> Result<Option<String>> {
    self.store.active_shell_version()
  }

  /// Precache the shell manifest for this version.
  ///
  /// All-or-nothing: on failure nothing from this attempt is kept and the
  /// previously active version stays in control.
  pub async fn install(&self) -> Result<usize> {
    info!(version = %self.shell_version, namespace = self.shell_namespace(), "Installing");

    match self.assets.precache().install(&self.store).await {
      Ok(count) => {
        info!(version = %self.shell_version, assets = count, "Installed");
        Ok(count)
      }
      Err(e) => {
        error!(version = %self.shell_version, error = %e, "Install failed");
        Err(e)
      }
    }
  }

  /// Make this version active and drop every other shell version.
  pub fn activate(&self) -> Result<Vec<String>> {
    let current = self.shell_namespace();
    if !self.store.contains_namespace(current)? {
      return Err(eyre!(
        "Cannot activate {}: shell was never installed",
        self.shell_version
      ));
    }

    self.store.set_active_shell_version(&self.shell_version)?;
    let removed = self.store.supersede(&self.shell_prefix, current)?;
    info!(version = %self.shell_version, superseded = ?removed, "Activated");

    Ok(removed)
  }

  pub async fn install_and_activate(&self) -> Result<usize> {
    let count = self.install().await?;
    self.activate()?;
    Ok(count)
  }

  /// Route one request to its policy and return what it produced.
  pub async fn handle_fetch(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    let route = self.router.route(request);
    debug!(method = %request.method, url = %request.url, ?route, "Dispatching request");

    let result = match route {
      Route::Api => self.api.handle(request).await,
      Route::Static => self.assets.handle(request, &self.tasks).await,
    };

    match &result {
      Ok(served) => debug!(url = %request.url, status = served.data.status, source = %served.source, "Served"),
      Err(e) => error!(url = %request.url, error = %e, "Request failed"),
    }

    result
  }

  pub fn classify_asset(&self, request: &Request) -> Option<AssetRoute> {
    match self.router.route(request) {
      Route::Api => None,
      Route::Static => Some(self.assets.classify(request)),
    }
  }

  /// Wait for background revalidations to finish.
  pub async fn wait_until_idle(&self) {
    self.tasks.wait_idle().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, CacheStorage, CachedResponse, SqliteStorage};
  use crate::net::scripted::ScriptedFetcher;
  use crate::net::Method;
  use chrono::{Duration, Utc};
  use url::Url;

  const BREWERIES: &str = "https://api.openbrewerydb.org/v1/breweries?page=1&per_page=9";
  const IMAGE: &str = "http://localhost:3000/dist/beer.0123456789abcdef0123456789abcdef.png";
  const MANIFEST: [&str; 5] = [
    "http://localhost:3000/",
    "http://localhost:3000/index.html",
    "http://localhost:3000/manifest.json",
    "http://localhost:3000/static/js/bundle.js",
    "http://localhost:3000/beer",
  ];

  fn setup(config: &Config) -> (Arc<ScriptedFetcher>, ServiceWorker) {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = CacheStore::new(Arc::new(SqliteStorage::open_in_memory().unwrap()));
    let worker = ServiceWorker::new(config, store, fetcher.clone()).unwrap();
    (fetcher, worker)
  }

  fn request(url: &str) -> Request {
    Request::parse(url).unwrap()
  }

  fn script_manifest(fetcher: &ScriptedFetcher) {
    for url in MANIFEST {
      fetcher.respond(url, 200, &format!("asset {}", url));
    }
  }

  #[tokio::test]
  async fn test_api_success_is_cached() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.respond(BREWERIES, 200, "[{\"id\":\"a\"}]");

    let served = worker.handle_fetch(&request(BREWERIES)).await.unwrap();

    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(served.data.text(), "[{\"id\":\"a\"}]");
    let stored = worker.api_cache().match_request(&request(BREWERIES)).unwrap();
    assert_eq!(stored.unwrap().response.body, served.data.body);
  }

  #[tokio::test]
  async fn test_api_prefers_network_over_cache() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.respond(BREWERIES, 200, "old");
    worker.handle_fetch(&request(BREWERIES)).await.unwrap();

    fetcher.respond(BREWERIES, 200, "new");
    let served = worker.handle_fetch(&request(BREWERIES)).await.unwrap();

    assert_eq!(served.data.text(), "new");
    assert_eq!(fetcher.calls_to(BREWERIES), 2);
    assert_eq!(worker.api_cache().len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_api_offline_serves_cached_body_verbatim() {
    let (fetcher, worker) = setup(&Config::default());
    let body = "[{\"id\":\"a\",\"name\":\"Ñandú Brewing\"}]";
    fetcher.respond(BREWERIES, 200, body);
    worker.handle_fetch(&request(BREWERIES)).await.unwrap();

    fetcher.set_offline(true);
    let served = worker.handle_fetch(&request(BREWERIES)).await.unwrap();

    assert_eq!(served.source, CacheSource::Offline);
    assert_eq!(served.data.body, body.as_bytes());
    assert!(served.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_api_offline_hit_ignores_headers_outside_vary() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.respond_with_headers(BREWERIES, 200, "[]", &[("Vary", "Origin")]);
    let json = request(BREWERIES).with_header("Accept", "application/json");
    worker.handle_fetch(&json).await.unwrap();

    fetcher.set_offline(true);
    let served = worker.handle_fetch(&request(BREWERIES)).await.unwrap();

    assert_eq!(served.source, CacheSource::Offline);
    assert_eq!(served.data.text(), "[]");
  }

  #[tokio::test]
  async fn test_api_offline_miss_when_varied_header_differs() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.respond_with_headers(BREWERIES, 200, "[]", &[("Vary", "Accept")]);
    let json = request(BREWERIES).with_header("Accept", "application/json");
    worker.handle_fetch(&json).await.unwrap();

    fetcher.set_offline(true);
    let csv = request(BREWERIES).with_header("Accept", "text/csv");
    let err = worker.handle_fetch(&csv).await.unwrap_err();

    assert!(err.is_network());
    let served = worker.handle_fetch(&json).await.unwrap();
    assert_eq!(served.source, CacheSource::Offline);
  }

  #[tokio::test]
  async fn test_api_offline_without_cache_fails_and_writes_nothing() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.set_offline(true);

    let err = worker.handle_fetch(&request(BREWERIES)).await.unwrap_err();

    assert!(err.is_network());
    assert_eq!(worker.api_cache().len().unwrap(), 0);
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_api_offline_with_expired_entry_fails() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let store = CacheStore::new(storage.clone());
    let worker = ServiceWorker::new(&Config::default(), store, fetcher.clone()).unwrap();

    // Straight to storage so the put-time sweep doesn't remove it first
    let stale = CachedResponse {
      response: Response::new(Url::parse(BREWERIES).unwrap(), 200, "old"),
      request_headers: Vec::new(),
      cached_at: Utc::now() - Duration::seconds(3601),
    };
    let key = worker.api_cache().key_for(&request(BREWERIES));
    storage.put("api-cache", &key, &stale).unwrap();

    fetcher.set_offline(true);
    let err = worker.handle_fetch(&request(BREWERIES)).await.unwrap_err();

    assert!(err.is_network());
    assert_eq!(worker.api_cache().len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_api_error_status_passes_through_uncached() {
    let (fetcher, worker) = setup(&Config::default());
    let missing = "https://api.openbrewerydb.org/v1/breweries/nope";
    fetcher.respond(missing, 404, "{\"message\":\"Couldn't find Brewery\"}");

    let served = worker.handle_fetch(&request(missing)).await.unwrap();

    assert_eq!(served.data.status, 404);
    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(worker.api_cache().len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_api_post_is_never_cached() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.respond(BREWERIES, 200, "[]");

    let post = request(BREWERIES).with_method(Method::POST);
    worker.handle_fetch(&post).await.unwrap();

    assert_eq!(worker.api_cache().len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_api_cache_is_bounded() {
    let mut config = Config::default();
    config.api.max_entries = 2;
    let (fetcher, worker) = setup(&config);

    for page in 1..=3 {
      let url = format!("https://api.openbrewerydb.org/v1/breweries?page={}", page);
      fetcher.respond(&url, 200, "[]");
      worker.handle_fetch(&request(&url)).await.unwrap();
    }

    assert_eq!(worker.api_cache().len().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_install_makes_manifest_available_offline() {
    let (fetcher, worker) = setup(&Config::default());
    script_manifest(&fetcher);

    assert_eq!(worker.install_and_activate().await.unwrap(), 5);
    assert_eq!(worker.active_version().unwrap().as_deref(), Some("v1"));

    fetcher.set_offline(true);
    let calls_before = fetcher.calls();
    for url in MANIFEST {
      let served = worker.handle_fetch(&request(url)).await.unwrap();
      assert_eq!(served.source, CacheSource::CacheFresh);
      assert_eq!(served.data.text(), format!("asset {}", url));
    }
    assert_eq!(fetcher.calls(), calls_before);
  }

  #[tokio::test]
  async fn test_install_fails_if_any_asset_fails() {
    let (fetcher, worker) = setup(&Config::default());
    script_manifest(&fetcher);
    fetcher.fail("http://localhost:3000/manifest.json");

    assert!(worker.install().await.is_err());
    assert!(!worker.store().contains_namespace("beer-app-cache-v1").unwrap());
    assert!(worker.activate().is_err());
    assert_eq!(worker.active_version().unwrap(), None);
  }

  #[tokio::test]
  async fn test_install_fails_on_error_status() {
    let (fetcher, worker) = setup(&Config::default());
    script_manifest(&fetcher);
    fetcher.respond("http://localhost:3000/beer", 500, "oops");

    let err = worker.install().await.unwrap_err();
    assert!(err.to_string().contains("status 500"));
  }

  #[tokio::test]
  async fn test_failed_upgrade_keeps_previous_version() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = CacheStore::new(Arc::new(SqliteStorage::open_in_memory().unwrap()));
    script_manifest(&fetcher);

    let v1 = ServiceWorker::new(&Config::default(), store.clone(), fetcher.clone()).unwrap();
    v1.install_and_activate().await.unwrap();

    let mut config = Config::default();
    config.shell.version = "v2".to_string();
    let v2 = ServiceWorker::new(&config, store.clone(), fetcher.clone()).unwrap();
    fetcher.fail("http://localhost:3000/static/js/bundle.js");

    assert!(v2.install_and_activate().await.is_err());
    assert_eq!(store.active_shell_version().unwrap().as_deref(), Some("v1"));

    fetcher.set_offline(true);
    let served = v2.handle_fetch(&request("http://localhost:3000/index.html")).await.unwrap();
    assert_eq!(served.source, CacheSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_activate_supersedes_previous_version() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let store = CacheStore::new(Arc::new(SqliteStorage::open_in_memory().unwrap()));
    script_manifest(&fetcher);

    let v1 = ServiceWorker::new(&Config::default(), store.clone(), fetcher.clone()).unwrap();
    v1.install_and_activate().await.unwrap();

    let mut config = Config::default();
    config.shell.version = "v2".to_string();
    let v2 = ServiceWorker::new(&config, store.clone(), fetcher.clone()).unwrap();
    v2.install().await.unwrap();
    let removed = v2.activate().unwrap();

    assert_eq!(removed, vec!["beer-app-cache-v1"]);
    assert!(!store.contains_namespace("beer-app-cache-v1").unwrap());
    assert_eq!(store.active_shell_version().unwrap().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_shell_asset_before_install_goes_to_network() {
    let (fetcher, worker) = setup(&Config::default());
    script_manifest(&fetcher);

    let served = worker.handle_fetch(&request("http://localhost:3000/")).await.unwrap();

    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_cached_image_served_without_network_then_revalidated() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.respond(IMAGE, 200, "v1-bytes");

    let first = worker.handle_fetch(&request(IMAGE)).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(fetcher.calls_to(IMAGE), 1);

    fetcher.respond(IMAGE, 200, "v2-bytes");
    let second = worker.handle_fetch(&request(IMAGE)).await.unwrap();

    // Served from cache before any network round trip happened
    assert_eq!(second.source, CacheSource::CacheStale);
    assert_eq!(second.data.body, b"v1-bytes");
    assert_eq!(fetcher.calls_to(IMAGE), 1);

    worker.wait_until_idle().await;
    assert_eq!(fetcher.calls_to(IMAGE), 2);

    let refreshed = worker.image_cache().match_request(&request(IMAGE)).unwrap().unwrap();
    assert_eq!(refreshed.response.body, b"v2-bytes");
  }

  #[tokio::test]
  async fn test_failed_revalidation_keeps_cached_image() {
    let (fetcher, worker) = setup(&Config::default());
    fetcher.respond(IMAGE, 200, "v1-bytes");
    worker.handle_fetch(&request(IMAGE)).await.unwrap();

    fetcher.set_offline(true);
    let served = worker.handle_fetch(&request(IMAGE)).await.unwrap();
    worker.wait_until_idle().await;

    assert_eq!(served.data.body, b"v1-bytes");
    let kept = worker.image_cache().match_request(&request(IMAGE)).unwrap().unwrap();
    assert_eq!(kept.response.body, b"v1-bytes");
  }

  #[tokio::test]
  async fn test_other_requests_pass_through() {
    let (fetcher, worker) = setup(&Config::default());
    let other = "http://localhost:3000/favicon.ico";
    fetcher.respond(other, 200, "icon");

    let served = worker.handle_fetch(&request(other)).await.unwrap();

    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(worker.classify_asset(&request(other)), Some(AssetRoute::Passthrough));
    assert_eq!(worker.image_cache().len().unwrap(), 0);

    fetcher.set_offline(true);
    assert!(worker.handle_fetch(&request(other)).await.is_err());
  }

  #[tokio::test]
  async fn test_cross_origin_hashed_image_is_not_cached() {
    let (fetcher, worker) = setup(&Config::default());
    let foreign = "https://cdn.example.com/dist/beer.0123456789abcdef0123456789abcdef.png";
    fetcher.respond(foreign, 200, "foreign-bytes");

    assert_eq!(worker.classify_asset(&request(foreign)), Some(AssetRoute::Passthrough));
    let served = worker.handle_fetch(&request(foreign)).await.unwrap();

    assert_eq!(served.source, CacheSource::Network);
    assert_eq!(worker.image_cache().len().unwrap(), 0);
  }

  #[test]
  fn test_classification() {
    let (_, worker) = setup(&Config::default());

    assert_eq!(worker.classify_asset(&request(BREWERIES)), None);
    assert_eq!(
      worker.classify_asset(&request("http://localhost:3000/index.html")),
      Some(AssetRoute::Precached)
    );
    assert_eq!(worker.classify_asset(&request(IMAGE)), Some(AssetRoute::Image));
    assert_eq!(
      worker.classify_asset(&request("http://localhost:3000/dist/beer.png")),
      Some(AssetRoute::Passthrough)
    );
    assert_eq!(
      worker.classify_asset(&request("http://localhost:3000/index.html").with_method(Method::POST)),
      Some(AssetRoute::Passthrough)
    );
  }
}
