//! Compiled URL matchers.
//!
//! Both the ignore list and the image-suffix test are declared as plain
//! pattern strings in the config and compiled once into a [`PatternSet`].

use color_eyre::{eyre::eyre, Result};
use regex::RegexSet;

/// An ordered set of URL patterns; a URL matches if any pattern does.
#[derive(Debug, Clone)]
pub struct PatternSet {
  set: RegexSet,
}

impl PatternSet {
  /// Compile a list of regular expressions.
  pub fn compile<I, S>(patterns: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let patterns: Vec<String> = patterns
      .into_iter()
      .map(|p| p.as_ref().to_string())
      .collect();
    let set = RegexSet::new(&patterns)
      .map_err(|e| eyre!("Invalid URL pattern in {:?}: {}", patterns, e))?;
    Ok(Self { set })
  }

  /// A set that never matches.
  pub fn empty() -> Self {
    Self {
      set: RegexSet::empty(),
    }
  }

  pub fn matches(&self, url: &str) -> bool {
    self.set.is_match(url)
  }

  pub fn len(&self) -> usize {
    self.set.len()
  }

  pub fn is_empty(&self) -> bool {
    self.set.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{default_ignore_patterns, DEFAULT_IMAGE_PATTERN};

  #[test]
  fn test_empty_never_matches() {
    let set = PatternSet::empty();
    assert!(set.is_empty());
    assert!(!set.matches("https://example.com/"));
  }

  #[test]
  fn test_ignore_patterns() {
    let set = PatternSet::compile(default_ignore_patterns()).unwrap();
    assert_eq!(set.len(), 6);
    assert!(set.matches("https://www.google-analytics.com/collect?v=1"));
    assert!(set.matches("http://fonts.gstatic.com/s/roboto.woff2"));
    assert!(set.matches("https://onesignal.com/api/v1/sync"));
    assert!(!set.matches("https://example.com/fonts.googleapis.com"));
  }

  #[test]
  fn test_image_suffix() {
    let set = PatternSet::compile([DEFAULT_IMAGE_PATTERN]).unwrap();
    assert!(set.matches("https://example.com/img/logo.png"));
    assert!(set.matches("https://example.com/a.jpeg?w=200"));
    assert!(set.matches("/banner.svg"));
    assert!(!set.matches("https://example.com/some/page"));
    assert!(!set.matches("https://example.com/logo.png.html"));
    assert!(!set.matches("https://example.com/LOGO.PNG"));
  }

  #[test]
  fn test_invalid_pattern_is_error() {
    assert!(PatternSet::compile(["(unclosed"]).is_err());
  }
}
