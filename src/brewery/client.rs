use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use super::types::{Brewery, Meta};
use crate::cache::{CacheResult, CacheSource};
use crate::net::{FetchError, Request, Response};
use crate::worker::ServiceWorker;

/// Default number of breweries returned by `breweries/random`.
pub const DEFAULT_RANDOM_SIZE: u32 = 3;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("server returned an error with status code: {status}")]
  Status { status: u16 },

  #[error("no response from the server")]
  NoResponse(#[source] FetchError),

  #[error("failed to decode response from {url}: {reason}")]
  Decode { url: String, reason: String },

  #[error("invalid endpoint: {0}")]
  InvalidEndpoint(String),
}

/// Query parameters for `breweries/`. Unset fields are left off the URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
  pub page: Option<u32>,
  pub per_page: Option<u32>,
  pub sort: Option<String>,
}

impl ListParams {
  fn pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(page) = self.page {
      pairs.push(("page", page.to_string()));
    }
    if let Some(per_page) = self.per_page {
      pairs.push(("per_page", per_page.to_string()));
    }
    if let Some(sort) = &self.sort {
      pairs.push(("sort", sort.clone()));
    }
    pairs
  }
}

/// Brewery API client. Every request goes through the service worker.
#[derive(Clone)]
pub struct BreweryClient {
  worker: Arc<ServiceWorker>,
  base_url: Url,
}

impl BreweryClient {
  pub fn new(worker: Arc<ServiceWorker>, base_url: Url) -> Self {
    Self { worker, base_url }
  }

  /// List breweries, one page at a time
  pub async fn list(&self, params: &ListParams) -> Result<CacheResult<Vec<Brewery>>, ApiError> {
    let url = self.endpoint("breweries/", &params.pairs())?;
    self.get_json(url).await
  }

  /// Get a single brewery by id
  pub async fn get(&self, id: &str) -> Result<CacheResult<Brewery>, ApiError> {
    let mut url = self.endpoint("breweries/", &[])?;
    url
      .path_segments_mut()
      .map_err(|_| ApiError::InvalidEndpoint(self.base_url.to_string()))?
      .pop_if_empty()
      .push(id);
    self.get_json(url).await
  }

  pub async fn random(&self, size: u32) -> Result<CacheResult<Vec<Brewery>>, ApiError> {
    let url = self.endpoint("breweries/random", &[("size", size.to_string())])?;
    self.get_json(url).await
  }

  /// Full-text search over names and locations
  pub async fn search(&self, query: &str) -> Result<CacheResult<Vec<Brewery>>, ApiError> {
    let url = self.endpoint("breweries/search", &[("query", query.to_string())])?;
    self.get_json(url).await
  }

  /// Lighter search returning only ids and names
  pub async fn autocomplete(&self, query: &str) -> Result<CacheResult<Vec<Brewery>>, ApiError> {
    let url = self.endpoint("breweries/autocomplete", &[("query", query.to_string())])?;
    self.get_json(url).await
  }

  pub async fn meta(&self, by_state: Option<&str>) -> Result<CacheResult<Meta>, ApiError> {
    let params: Vec<(&str, String)> = by_state
      .map(|state| vec![("by_state", state.to_string())])
      .unwrap_or_default();
    let url = self.endpoint("breweries/meta", &params)?;
    self.get_json(url).await
  }

  /// Load image bytes from any URL. Resolves once with the bytes or the
  /// reason they could not be loaded.
  pub async fn load_image(&self, url: &str) -> Result<CacheResult<Vec<u8>>, ApiError> {
    let request = Request::parse(url).map_err(|e| ApiError::InvalidEndpoint(e.to_string()))?;
    let served = self.send(&request).await?;
    Ok(served.map(|response| response.body))
  }

  fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ApiError> {
    let mut url = self
      .base_url
      .join(path)
      .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", path, e)))?;

    if !params.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
    }

    Ok(url)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<CacheResult<T>, ApiError> {
    let request = Request::get(url).with_header("accept", "application/json");
    let served = self.send(&request).await?;
    let source = served.source;
    let cached_at = served.cached_at;

    let data = serde_json::from_slice(&served.data.body).map_err(|e| {
      let err = ApiError::Decode {
        url: request.url.to_string(),
        reason: e.to_string(),
      };
      error!(error = %err, "Internal error decoding API response");
      err
    })?;

    Ok(CacheResult {
      data,
      source,
      cached_at,
    })
  }

  async fn send(&self, request: &Request) -> Result<CacheResult<Response>, ApiError> {
    let served = match self.worker.handle_fetch(request).await {
      Ok(served) => served,
      Err(e) => {
        error!(url = %request.url, error = %e, "No response from the server");
        return Err(ApiError::NoResponse(e));
      }
    };

    if served.data.status != 200 {
      let status = served.data.status;
      error!(url = %request.url, status, "Server returned an error with status code: {}", status);
      return Err(ApiError::Status { status });
    }

    if served.source != CacheSource::Network {
      debug!(url = %request.url, source = %served.source, "Served without network");
    }

    Ok(served)
  }
}
