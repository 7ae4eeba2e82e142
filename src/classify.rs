//! Request classification: which strategy handles a request.

use color_eyre::Result;
use std::fmt;
use tracing::warn;

use crate::config::Config;
use crate::http::Request;
use crate::matcher::PatternSet;

/// How a request is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Network only, offline artifact on failure
  AlwaysNetwork,
  /// Network first, writing to cache; cache or offline artifact on failure
  FetchAndCache,
  /// Cache first, network (with cache write) on miss; offline artifact on failure
  CacheFirst,
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Strategy::AlwaysNetwork => write!(f, "always-network"),
      Strategy::FetchAndCache => write!(f, "fetch-and-cache"),
      Strategy::CacheFirst => write!(f, "cache-first"),
    }
  }
}

pub struct Classifier {
  development: bool,
  ignore: PatternSet,
}

impl Classifier {
  pub fn new(development: bool, ignore: PatternSet) -> Self {
    Self {
      development,
      ignore,
    }
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self::new(config.development, config.ignore_set()?))
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    if self.should_always_fetch(request) {
      return Strategy::AlwaysNetwork;
    }

    match request.accept() {
      Some(accept) if accept.contains("text/html") => Strategy::FetchAndCache,
      Some(_) => Strategy::CacheFirst,
      None => {
        warn!(target: "sw", "(no accept header) {} {}", request.method, request.url);
        Strategy::CacheFirst
      }
    }
  }

  fn should_always_fetch(&self, request: &Request) -> bool {
    self.development || request.method != "GET" || self.ignore.matches(&request.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::default_ignore_patterns;

  fn classifier() -> Classifier {
    Classifier::new(false, PatternSet::compile(default_ignore_patterns()).unwrap())
  }

  fn html(method: &str, url: &str) -> Request {
    Request::new(method, url).with_header("accept", "text/html,application/xhtml+xml")
  }

  #[test]
  fn test_html_get_is_fetch_and_cache() {
    let c = classifier();
    assert_eq!(
      c.classify(&html("GET", "https://example.com/post/1")),
      Strategy::FetchAndCache
    );
  }

  #[test]
  fn test_non_get_is_always_network() {
    let c = classifier();
    for method in ["POST", "PUT", "DELETE", "HEAD", "PATCH"] {
      assert_eq!(
        c.classify(&html(method, "https://example.com/post/1")),
        Strategy::AlwaysNetwork
      );
      let bare = Request::new(method, "https://example.com/img/a.png");
      assert_eq!(c.classify(&bare), Strategy::AlwaysNetwork);
    }
  }

  #[test]
  fn test_ignored_urls_bypass_cache() {
    let c = classifier();
    let req = html("GET", "https://fonts.googleapis.com/css?family=Lato");
    assert_eq!(c.classify(&req), Strategy::AlwaysNetwork);
  }

  #[test]
  fn test_assets_are_cache_first() {
    let c = classifier();
    let req = Request::get("https://example.com/css/main.css").with_header("accept", "text/css");
    assert_eq!(c.classify(&req), Strategy::CacheFirst);
  }

  #[test]
  fn test_accept_match_is_case_sensitive() {
    let c = classifier();
    let req = Request::get("https://example.com/").with_header("accept", "TEXT/HTML");
    assert_eq!(c.classify(&req), Strategy::CacheFirst);
  }

  #[test]
  fn test_missing_accept_defaults_to_cache_first() {
    let c = classifier();
    assert_eq!(
      c.classify(&Request::get("https://example.com/")),
      Strategy::CacheFirst
    );
  }

  #[test]
  fn test_development_mode_always_network() {
    let c = Classifier::new(true, PatternSet::empty());
    assert_eq!(
      c.classify(&html("GET", "https://example.com/")),
      Strategy::AlwaysNetwork
    );
    assert_eq!(
      c.classify(&Request::get("https://example.com/a.png")),
      Strategy::AlwaysNetwork
    );
  }
}
