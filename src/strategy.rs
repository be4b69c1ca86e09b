//! Request classification.
//!
//! Every intercepted request falls into exactly one strategy, first match
//! wins: API paths go network-first, the third-party image host is
//! cache-first, and everything else is cache-first with same-origin caching.

use url::Url;

/// How a request should be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Live fetch preferred, cache as fallback. Used for API data where
  /// staleness hurts more than a miss.
  NetworkFirst,
  /// Cached bytes preferred, fetched once on miss. Poster and backdrop
  /// images never change once published.
  ImageCacheFirst,
  /// Cached bytes preferred; only same-origin 200 responses are cached.
  AssetCacheFirst,
}

/// URL shapes that select a strategy.
#[derive(Debug, Clone)]
pub struct FetchRules {
  /// Reserved path segment for API routes, e.g. "/api".
  pub api_prefix: String,
  /// Hostname of the third-party image CDN.
  pub image_host: String,
}

impl FetchRules {
  pub fn classify(&self, url: &Url) -> Strategy {
    if path_has_prefix(url.path(), &self.api_prefix) {
      return Strategy::NetworkFirst;
    }
    if url.host_str() == Some(self.image_host.as_str()) {
      return Strategy::ImageCacheFirst;
    }
    Strategy::AssetCacheFirst
  }
}

/// Segment-aware prefix test: "/api" matches "/api" and "/api/movies" but
/// not "/apiary".
fn path_has_prefix(path: &str, prefix: &str) -> bool {
  let prefix = prefix.trim_end_matches('/');
  if prefix.is_empty() {
    return false;
  }
  match path.strip_prefix(prefix) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rules() -> FetchRules {
    FetchRules {
      api_prefix: "/api".to_string(),
      image_host: "image.tmdb.org".to_string(),
    }
  }

  fn classify(url: &str) -> Strategy {
    rules().classify(&Url::parse(url).unwrap())
  }

  #[test]
  fn test_api_paths_are_network_first() {
    assert_eq!(classify("http://localhost:3000/api/movies"), Strategy::NetworkFirst);
    assert_eq!(classify("http://localhost:3000/api"), Strategy::NetworkFirst);
    assert_eq!(
      classify("http://localhost:3000/api/reviews?movie=603"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn test_api_prefix_is_segment_aware() {
    assert_eq!(classify("http://localhost:3000/apiary"), Strategy::AssetCacheFirst);
  }

  #[test]
  fn test_image_host_is_cache_first() {
    assert_eq!(
      classify("https://image.tmdb.org/t/p/w500/poster.jpg"),
      Strategy::ImageCacheFirst
    );
  }

  #[test]
  fn test_api_path_wins_over_image_host() {
    assert_eq!(
      classify("https://image.tmdb.org/api/config"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn test_other_hosts_and_paths_fall_through() {
    assert_eq!(classify("http://localhost:3000/"), Strategy::AssetCacheFirst);
    assert_eq!(classify("http://localhost:3000/icons/logo.png"), Strategy::AssetCacheFirst);
    assert_eq!(classify("https://fonts.example.com/roboto.woff2"), Strategy::AssetCacheFirst);
  }
}
