//! Request classification: which policy handles a request.

use url::{Origin, Url};

use crate::net::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Remote API origin, network-first
  Api,
  /// Everything else: shell assets, images, passthrough
  Static,
}

/// Routes by origin. Every request gets exactly one route.
#[derive(Debug, Clone)]
pub struct Router {
  api_origin: Origin,
}

impl Router {
  pub fn new(api_base: &Url) -> Self {
    Self {
      api_origin: api_base.origin(),
    }
  }

  pub fn route(&self, request: &Request) -> Route {
    if request.url.origin() == self.api_origin {
      Route::Api
    } else {
      Route::Static
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn router() -> Router {
    Router::new(&Url::parse("https://api.openbrewerydb.org/v1/").unwrap())
  }

  fn route(url: &str) -> Route {
    router().route(&Request::parse(url).unwrap())
  }

  #[test]
  fn test_api_origin_routes_to_api() {
    assert_eq!(route("https://api.openbrewerydb.org/v1/breweries?page=2"), Route::Api);
    assert_eq!(route("https://API.openbrewerydb.org:443/v1/breweries/meta"), Route::Api);
    // Same origin outside the versioned prefix is still the API
    assert_eq!(route("https://api.openbrewerydb.org/v2/breweries"), Route::Api);
  }

  #[test]
  fn test_other_origins_route_to_static() {
    assert_eq!(route("http://api.openbrewerydb.org/v1/breweries"), Route::Static);
    assert_eq!(route("https://api.openbrewerydb.org:8443/v1/breweries"), Route::Static);
    assert_eq!(route("http://localhost:3000/index.html"), Route::Static);
    assert_eq!(route("data:text/plain,hello"), Route::Static);
  }
}
