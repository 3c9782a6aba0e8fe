//! Request/response types and the network fetch contract.
//!
//! Everything that leaves the process goes through a [`Fetcher`]. The worker
//! wraps a fetcher with cache policy; tests swap in a scripted one.

mod http;
#[cfg(test)]
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use http::HttpFetcher;
pub use reqwest::Method;

/// Failure of a single fetch through the worker.
#[derive(Debug, Error)]
pub enum FetchError {
  /// No response could be obtained at all.
  #[error("network request to {url} failed: {reason}")]
  Network { url: String, reason: String },

  #[error("invalid request url '{0}'")]
  InvalidUrl(String),

  /// The cache store failed while serving the request.
  #[error("cache storage failure: {0}")]
  Storage(String),
}

impl FetchError {
  pub fn network(url: &Url, reason: impl ToString) -> Self {
    Self::Network {
      url: url.to_string(),
      reason: reason.to_string(),
    }
  }

  #[cfg(test)]
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. })
  }
}

impl From<color_eyre::Report> for FetchError {
  fn from(err: color_eyre::Report) -> Self {
    Self::Storage(format!("{:#}", err))
  }
}

/// An outgoing request descriptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// Header names are stored lowercased.
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: Vec::new(),
    }
  }

  /// Parse an absolute URL into a GET request.
  pub fn parse(url: &str) -> Result<Self, FetchError> {
    Url::parse(url)
      .map(Self::get)
      .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))
  }

  #[cfg(test)]
  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    let name = name.to_ascii_lowercase();
    self.headers.retain(|(n, _)| *n != name);
    self.headers.push((name, value.to_string()));
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

/// A response as observed by the requester, fully buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: Url,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  #[cfg(test)]
  pub fn new(url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url,
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Only plain 200 responses are ever written to a cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

/// Performs a single network round trip.
///
/// Implementations return `Ok` for any HTTP status; `Err` means no response
/// was obtainable.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_headers_are_case_insensitive() {
    let request = Request::parse("https://example.com/a")
      .unwrap()
      .with_header("Accept", "application/json")
      .with_header("ACCEPT", "text/html");

    assert_eq!(request.headers.len(), 1);
    assert_eq!(request.header("accept"), Some("text/html"));
  }

  #[test]
  fn test_only_200_is_cacheable() {
    let url = Url::parse("https://example.com/").unwrap();
    assert!(Response::new(url.clone(), 200, "ok").is_cacheable());
    assert!(!Response::new(url.clone(), 204, "").is_cacheable());
    assert!(!Response::new(url, 500, "boom").is_cacheable());
  }

  #[test]
  fn test_parse_rejects_relative_url() {
    let err = Request::parse("/index.html").unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl(_)));
  }
}
