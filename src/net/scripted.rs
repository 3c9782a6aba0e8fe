//! In-process fetcher for tests: canned responses, call log, offline switch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{FetchError, Fetcher, Request, Response};

type Route = (u16, Vec<u8>, Vec<(String, String)>);

#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Route>>,
  down: Mutex<Vec<String>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `body` with `status` for an exact URL. Replaces earlier scripts.
  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.respond_with_headers(url, status, body, &[]);
  }

  pub fn respond_with_headers(&self, url: &str, status: u16, body: &str, headers: &[(&str, &str)]) {
    let headers = headers
      .iter()
      .map(|(n, v)| (n.to_ascii_lowercase(), v.to_string()))
      .collect();
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), (status, body.as_bytes().to_vec(), headers));
  }

  /// Make a single URL unreachable.
  pub fn fail(&self, url: &str) {
    self.down.lock().unwrap().push(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| *u == url)
      .count()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    if self.offline.load(Ordering::SeqCst) || self.down.lock().unwrap().contains(&url) {
      return Err(FetchError::network(&request.url, "connection refused"));
    }

    let (status, body, headers) = self
      .routes
      .lock()
      .unwrap()
      .get(&url)
      .cloned()
      .unwrap_or((404, b"not found".to_vec(), Vec::new()));

    let mut response = Response::new(request.url.clone(), status, body);
    response.headers = headers;
    Ok(response)
  }
}
