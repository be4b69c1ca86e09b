use chrono::{DateTime, Utc};
use url::Url;

/// How a response relates to the configured app origin.
///
/// Mirrors the web platform's response types: only `Basic` responses may be
/// stored by the general asset strategy, since cross-origin bytes cannot be
/// assumed inspectable or reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same origin as the app
  Basic,
  /// Cross-origin with an access-control-allow-origin grant
  Cors,
  /// Cross-origin without any access grant
  Opaque,
}

impl ResponseKind {
  /// Classify a response from its request URL and response headers.
  pub fn classify(app_origin: &Url, request_url: &Url, headers: &[(String, String)]) -> Self {
    if same_origin(app_origin, request_url) {
      return ResponseKind::Basic;
    }

    let has_cors_grant = headers
      .iter()
      .any(|(name, _)| name.eq_ignore_ascii_case("access-control-allow-origin"));

    if has_cors_grant {
      ResponseKind::Cors
    } else {
      ResponseKind::Opaque
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
    }
  }

  /// Parse a stored kind; unknown values degrade to the most restrictive.
  pub fn parse(s: &str) -> Self {
    match s {
      "basic" => ResponseKind::Basic,
      "cors" => ResponseKind::Cors,
      _ => ResponseKind::Opaque,
    }
  }
}

/// True when two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
  a.scheme() == b.scheme()
    && a.host_str() == b.host_str()
    && a.port_or_known_default() == b.port_or_known_default()
}

/// A response held in a cache store, keyed by its request URL.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub kind: ResponseKind,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_same_origin_ignores_path() {
    let origin = url("http://localhost:3000");
    assert!(same_origin(&origin, &url("http://localhost:3000/api/watchlist")));
  }

  #[test]
  fn test_same_origin_rejects_other_host_and_scheme() {
    let origin = url("http://localhost:3000");
    assert!(!same_origin(&origin, &url("http://localhost:4000/")));
    assert!(!same_origin(&origin, &url("https://localhost:3000/")));
    assert!(!same_origin(&origin, &url("http://image.tmdb.org/t/p/w500/x.jpg")));
  }

  #[test]
  fn test_classify_same_origin_is_basic() {
    let origin = url("http://localhost:3000");
    let kind = ResponseKind::classify(&origin, &url("http://localhost:3000/about"), &[]);
    assert_eq!(kind, ResponseKind::Basic);
  }

  #[test]
  fn test_classify_cross_origin_with_grant_is_cors() {
    let origin = url("http://localhost:3000");
    let headers = vec![("Access-Control-Allow-Origin".to_string(), "*".to_string())];
    let kind = ResponseKind::classify(&origin, &url("https://fonts.example.com/a.woff2"), &headers);
    assert_eq!(kind, ResponseKind::Cors);
  }

  #[test]
  fn test_classify_cross_origin_without_grant_is_opaque() {
    let origin = url("http://localhost:3000");
    let kind = ResponseKind::classify(&origin, &url("https://cdn.example.com/lib.js"), &[]);
    assert_eq!(kind, ResponseKind::Opaque);
  }

  #[test]
  fn test_kind_round_trips_through_storage_form() {
    for kind in [ResponseKind::Basic, ResponseKind::Cors, ResponseKind::Opaque] {
      assert_eq!(ResponseKind::parse(kind.as_str()), kind);
    }
    assert_eq!(ResponseKind::parse("garbage"), ResponseKind::Opaque);
  }
}
