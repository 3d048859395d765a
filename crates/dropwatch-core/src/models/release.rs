use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::error::DropwatchError;

static ID_GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

/// Identifier of a stored release.
///
/// ULIDs sort by creation time, so "lowest id" and "earliest created" agree.
/// Ids minted by one process are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(Ulid);

impl ReleaseId {
    pub fn new() -> Self {
        let next = ID_GENERATOR
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok());
        Self(next.unwrap_or_else(Ulid::new))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for ReleaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReleaseId {
    type Err = DropwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|_| DropwatchError::InvalidId(s.to_string()))
    }
}

/// A "new release" as handed over by a feed or scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCandidate {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ReleaseCandidate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_url: None,
            image_url: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

/// A stored release row.
///
/// `title_normalized` and `source_product_hash` are derived from `title` and
/// `source_url` by the store on every write and never set by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: ReleaseId,
    pub title: String,
    pub title_normalized: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    pub source_product_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into_id: Option<ReleaseId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReleaseRecord {
    /// Superseded records are never match targets.
    pub fn is_merged(&self) -> bool {
        self.merged_into_id.is_some()
    }

    /// The candidate this record would have been ingested from.
    pub fn as_candidate(&self) -> ReleaseCandidate {
        ReleaseCandidate {
            title: self.title.clone(),
            source_url: self.source_url.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_ids_are_increasing() {
        let a = ReleaseId::new();
        let b = ReleaseId::new();
        let c = ReleaseId::new();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_release_id_string_roundtrip() {
        let id = ReleaseId::new();
        let parsed: ReleaseId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-ulid".parse::<ReleaseId>().is_err());
    }

    #[test]
    fn test_candidate_from_json_with_missing_fields() {
        let candidate: ReleaseCandidate =
            serde_json::from_str(r#"{"title": "Stitch Plush"}"#).unwrap();
        assert_eq!(candidate.title, "Stitch Plush");
        assert!(candidate.source_url.is_none());
        assert!(candidate.image_url.is_none());
    }

    #[test]
    fn test_candidate_builder() {
        let candidate = ReleaseCandidate::new("Spirit Jersey")
            .with_source_url("https://blog/a")
            .with_image_url("https://cdn/a.jpg");
        assert_eq!(candidate.source_url.as_deref(), Some("https://blog/a"));
        assert_eq!(candidate.image_url.as_deref(), Some("https://cdn/a.jpg"));
    }
}
