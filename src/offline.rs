//! Canned fallbacks for requests neither the network nor the cache can satisfy.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, CachedResponse};
use crate::config::Config;
use crate::http::{Request, RequestKey};
use crate::matcher::PatternSet;

/// Picks the offline HTML shell or the placeholder image for a failed request.
pub struct OfflineResolver<S: CacheStorage> {
  storage: Arc<S>,
  images: PatternSet,
  page: RequestKey,
  image: RequestKey,
}

impl<S: CacheStorage> OfflineResolver<S> {
  /// `page_url` and `image_url` must be absolute, as stored at install time.
  pub fn new(storage: Arc<S>, images: PatternSet, page_url: String, image_url: String) -> Self {
    Self {
      storage,
      images,
      page: RequestKey::get(page_url),
      image: RequestKey::get(image_url),
    }
  }

  pub fn from_config(storage: Arc<S>, config: &Config) -> Result<Self> {
    Ok(Self::new(
      storage,
      config.image_set()?,
      config.resolve(&config.offline_page)?,
      config.resolve(&config.offline_image)?,
    ))
  }

  /// The artifact key a failed request falls back to.
  pub fn artifact_for(&self, request: &Request) -> &RequestKey {
    if self.images.matches(&request.url) {
      &self.image
    } else {
      &self.page
    }
  }

  /// Look up the fallback for `request`. `None` when the artifact was never installed.
  pub async fn resolve(&self, request: &Request) -> Option<CachedResponse> {
    debug!(target: "sw", "(offline) {} {}", request.method, request.url);

    let artifact = self.artifact_for(request);
    match self.storage.match_any(artifact).await {
      Ok(Some(hit)) => Some(hit),
      Ok(None) => {
        warn!(target: "sw", "(offline artifact missing) {}", artifact.url);
        None
      }
      Err(e) => {
        warn!(target: "sw", "(offline artifact unreadable) {}: {}", artifact.url, e);
        None
      }
    }
  }
}
