//! Tiered duplicate resolution for incoming release candidates.
//!
//! Tiers run from most to least precise and the first match wins:
//! fingerprint, URL + key, image, trigram similarity, word overlap.

use std::collections::HashSet;
use std::fmt;

use dropwatch_core::{
    fingerprint, DedupConfig, ReleaseCandidate, ReleaseId, ReleaseRecord, ReleaseRepository,
};
use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};
use crate::similarity::{trigram_similarity, word_overlap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ExactHashMatch,
    ExactUrlTitleMatch,
    ExactImageMatch,
    SimilarTitle,
    WordOverlap,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::ExactHashMatch => "exact_hash_match",
            MatchReason::ExactUrlTitleMatch => "exact_url_title_match",
            MatchReason::ExactImageMatch => "exact_image_match",
            MatchReason::SimilarTitle => "similar_title",
            MatchReason::WordOverlap => "word_overlap",
        }
    }
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub matched_id: Option<ReleaseId>,
    pub reason: Option<MatchReason>,
    pub score: f64,
}

impl DuplicateVerdict {
    pub fn unique() -> Self {
        Self {
            is_duplicate: false,
            matched_id: None,
            reason: None,
            score: 0.0,
        }
    }

    fn matched(id: ReleaseId, reason: MatchReason, score: f64) -> Self {
        Self {
            is_duplicate: true,
            matched_id: Some(id),
            reason: Some(reason),
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    pub similarity_threshold: f64,
    pub word_overlap_threshold: f64,
    pub placeholder_marker: String,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&DedupConfig::default())
    }
}

impl From<&DedupConfig> for ResolverSettings {
    fn from(config: &DedupConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold.clamp(0.0, 1.0),
            word_overlap_threshold: config.word_overlap_threshold.clamp(0.0, 1.0),
            placeholder_marker: config.placeholder_marker.clone(),
        }
    }
}

/// Which stored releases a resolution may match.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Only releases with an id strictly below this one.
    pub before: Option<ReleaseId>,
    pub excluded: HashSet<ReleaseId>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn before(id: ReleaseId) -> Self {
        Self {
            before: Some(id),
            excluded: HashSet::new(),
        }
    }

    pub fn admits(&self, id: &ReleaseId) -> bool {
        self.before.is_none_or(|limit| *id < limit) && !self.excluded.contains(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    ExactHash,
    UrlTitle,
    Image,
    SimilarTitle,
    WordOverlap,
}

const TIERS: [Tier; 5] = [
    Tier::ExactHash,
    Tier::UrlTitle,
    Tier::Image,
    Tier::SimilarTitle,
    Tier::WordOverlap,
];

struct Lookup<'c> {
    candidate: &'c ReleaseCandidate,
    key: String,
    hash: String,
    /// Active releases in id order, loaded on first use by a fuzzy tier.
    active: Option<Vec<ReleaseRecord>>,
}

/// Decides whether a candidate is already in the store.
///
/// Holds no state between calls; the store is the only input besides the
/// candidate.
#[derive(Debug, Clone, Default)]
pub struct DuplicateResolver {
    settings: ResolverSettings,
}

impl DuplicateResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(ResolverSettings::from(config))
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn resolve<R>(&self, store: &R, candidate: &ReleaseCandidate) -> Result<DuplicateVerdict>
    where
        R: ReleaseRepository + ?Sized,
    {
        self.resolve_in(store, candidate, &Scope::all())
    }

    /// Resolve against the subset of the store admitted by `scope`.
    pub fn resolve_in<R>(
        &self,
        store: &R,
        candidate: &ReleaseCandidate,
        scope: &Scope,
    ) -> Result<DuplicateVerdict>
    where
        R: ReleaseRepository + ?Sized,
    {
        let key = store.normalizer().normalize(&candidate.title);
        let hash = fingerprint(candidate.source_url.as_deref(), &key);
        let mut lookup = Lookup {
            candidate,
            key,
            hash,
            active: None,
        };

        for tier in TIERS {
            if let Some(verdict) = self.evaluate(tier, store, &mut lookup, scope)? {
                tracing::debug!(
                    title = %candidate.title,
                    reason = ?verdict.reason,
                    matched = ?verdict.matched_id,
                    score = verdict.score,
                    "candidate is a duplicate"
                );
                return Ok(verdict);
            }
        }

        tracing::debug!(title = %candidate.title, key = %lookup.key, "candidate is new");
        Ok(DuplicateVerdict::unique())
    }

    fn evaluate<R>(
        &self,
        tier: Tier,
        store: &R,
        lookup: &mut Lookup<'_>,
        scope: &Scope,
    ) -> Result<Option<DuplicateVerdict>>
    where
        R: ReleaseRepository + ?Sized,
    {
        match tier {
            Tier::ExactHash => {
                let found = store.find_active_by_hash(&lookup.hash)?;
                single_exact(found, scope, MatchReason::ExactHashMatch)
            }
            Tier::UrlTitle => {
                let Some(url) = lookup.candidate.source_url.as_deref() else {
                    return Ok(None);
                };
                let found = store.find_active_by_url_and_title(url, &lookup.key)?;
                single_exact(found, scope, MatchReason::ExactUrlTitleMatch)
            }
            Tier::Image => {
                let Some(image) = lookup.candidate.image_url.as_deref() else {
                    return Ok(None);
                };
                if image.is_empty() || image.contains(self.settings.placeholder_marker.as_str()) {
                    return Ok(None);
                }
                let found = store.find_active_by_image(image)?;
                Ok(found
                    .iter()
                    .find(|record| scope.admits(&record.id))
                    .map(|record| {
                        DuplicateVerdict::matched(record.id, MatchReason::ExactImageMatch, 1.0)
                    }))
            }
            Tier::SimilarTitle => {
                if lookup.key.is_empty() {
                    return Ok(None);
                }
                let key = lookup.key.clone();
                let active = load_active(store, lookup)?;
                Ok(best_match(active, scope, |record| {
                    trigram_similarity(&key, &record.title_normalized)
                })
                .filter(|(_, score)| *score >= self.settings.similarity_threshold)
                .map(|(id, score)| DuplicateVerdict::matched(id, MatchReason::SimilarTitle, score)))
            }
            Tier::WordOverlap => {
                if lookup.key.is_empty() {
                    return Ok(None);
                }
                let key = lookup.key.clone();
                let active = load_active(store, lookup)?;
                Ok(best_match(active, scope, |record| {
                    if record.title_normalized.is_empty() {
                        0.0
                    } else {
                        word_overlap(&key, &record.title_normalized)
                    }
                })
                .filter(|(_, score)| *score >= self.settings.word_overlap_threshold)
                .map(|(id, score)| DuplicateVerdict::matched(id, MatchReason::WordOverlap, score)))
            }
        }
    }
}

fn load_active<'p, R>(store: &R, lookup: &'p mut Lookup<'_>) -> Result<&'p [ReleaseRecord]>
where
    R: ReleaseRepository + ?Sized,
{
    if lookup.active.is_none() {
        lookup.active = Some(store.scan_active()?);
    }
    Ok(lookup.active.as_deref().unwrap_or_default())
}

/// Exact tiers must find at most one admitted release.
fn single_exact(
    found: Vec<ReleaseRecord>,
    scope: &Scope,
    reason: MatchReason,
) -> Result<Option<DuplicateVerdict>> {
    let ids: Vec<ReleaseId> = found
        .into_iter()
        .map(|record| record.id)
        .filter(|id| scope.admits(id))
        .collect();
    match ids.as_slice() {
        [] => Ok(None),
        [id] => Ok(Some(DuplicateVerdict::matched(*id, reason, 1.0))),
        _ => {
            tracing::warn!(%reason, ?ids, "several active releases satisfy an exact tier");
            Err(DedupError::AmbiguousMerge { reason, ids })
        }
    }
}

/// Highest-scoring admitted record; ties go to the lowest id.
fn best_match<F>(records: &[ReleaseRecord], scope: &Scope, score: F) -> Option<(ReleaseId, f64)>
where
    F: Fn(&ReleaseRecord) -> f64,
{
    let mut best: Option<(ReleaseId, f64)> = None;
    for record in records.iter().filter(|r| scope.admits(&r.id)) {
        let value = score(record);
        best = match best {
            Some((id, top)) if top > value || (top == value && id < record.id) => Some((id, top)),
            _ => Some((record.id, value)),
        };
    }
    best
}
