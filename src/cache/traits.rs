//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response};

/// Identity of a request inside a namespace.
///
/// Built from the method and the normalized URL, then hashed into a
/// fixed-length key. Request headers are not part of identity; a stored
/// entry's `Vary` header decides whether it answers a given request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  hash: String,
  url: String,
}

impl RequestKey {
  pub fn for_request(request: &Request) -> Self {
    let url = normalize_url(&request.url);
    let input = format!("{} {}", request.method.as_str(), url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { hash, url }
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// The normalized URL, kept for listing and debugging.
  pub fn url(&self) -> &str {
    &self.url
  }
}

/// `Url` already lowercases scheme and host and drops default ports;
/// the fragment never reaches the network so it is not part of identity.
fn normalize_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// A stored response snapshot with its capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// Request values of the headers the response's `Vary` names.
  /// Headers the request did not carry are left out.
  pub request_headers: Vec<(String, String)>,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Snapshot a response to `request` as of now.
  pub fn capture(request: &Request, response: &Response) -> Self {
    let request_headers = vary_names(response)
      .into_iter()
      .filter_map(|name| {
        let value = request.header(&name)?.trim().to_string();
        Some((name, value))
      })
      .collect();

    Self {
      response: response.clone(),
      request_headers,
      cached_at: Utc::now(),
    }
  }

  /// Whether this entry answers `request` under the response's `Vary` header.
  ///
  /// `Vary: *` never matches. Otherwise every named header must carry the
  /// same value it had when the entry was stored, absent matching absent.
  pub fn matches(&self, request: &Request) -> bool {
    vary_names(&self.response).iter().all(|name| {
      if name == "*" {
        return false;
      }
      let stored = self
        .request_headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str());
      stored == request.header(name).map(str::trim)
    })
  }
}

/// Lowercased header names listed in the response's `Vary` header.
fn vary_names(response: &Response) -> Vec<String> {
  response
    .header("vary")
    .map(|value| {
      value
        .split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
    })
    .unwrap_or_default()
}

/// Result of serving a request, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  ///
  /// `is_stale` marks data that is being refreshed in the background.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, served without touching the network
  CacheFresh,
  /// Data from cache while a background refresh is in flight
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::CacheStale => "cache (revalidating)",
      Self::Offline => "offline cache",
    };
    f.write_str(label)
  }
}
