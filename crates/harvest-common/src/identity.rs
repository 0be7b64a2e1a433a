//! Record identity: `(source, normalized url)`
//!
//! The same page must map to the same key on every run, whichever harvester
//! produced it, so normalization only depends on the url text.

use crate::{HarvestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Query parameters that only carry campaign or click tracking.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "yclid", "mc_cid", "mc_eid", "_openstat"];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Normalize a document url.
///
/// Lowercases scheme and host, drops the default port and the fragment,
/// removes tracking query parameters and strips trailing slashes from the
/// path. Relative or host-less urls are rejected.
pub fn normalize_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(HarvestError::validation("url is empty"));
    }

    let mut url =
        Url::parse(raw).map_err(|e| HarvestError::validation(format!("invalid url '{raw}': {e}")))?;

    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(HarvestError::validation(format!("url '{raw}' has no host")));
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let trimmed = url.path().trim_end_matches('/').to_string();
    if trimmed.len() != url.path().len() {
        // An empty path serializes back to "/" for http(s)
        url.set_path(&trimmed);
    }

    Ok(url.into())
}

/// Uniqueness key of a record in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub source: String,
    pub url: String,
}

impl IdentityKey {
    /// Build a key from raw harvester values, trimming the source and
    /// normalizing the url.
    pub fn new(source: &str, url: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(HarvestError::validation("source is empty"));
        }
        Ok(Self {
            source: source.to_string(),
            url: normalize_url(url)?,
        })
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source, self.url)
    }
}
