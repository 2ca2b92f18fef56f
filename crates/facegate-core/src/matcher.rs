//! Nearest-face matching.
//!
//! Every [`Matcher`] implements the same decision rule over a [`Snapshot`]:
//! the candidate minimizing `(euclidean distance, snapshot position)` is the
//! best one, and it is accepted iff its distance is `<= tolerance`. The
//! implementations only differ in how they find that candidate.

use crate::store::Snapshot;
use crate::types::{euclidean_distance, Embedding, EmbeddingError, MatchDecision};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error(transparent)]
    InvalidEmbedding(#[from] EmbeddingError),
    #[error("tolerance must be a non-negative number, got {0}")]
    InvalidTolerance(f32),
}

/// Strategy for finding the enrolled face closest to a probe.
///
/// Implementations are pure: they read the snapshot and never mutate a store.
pub trait Matcher {
    fn find_match(
        &self,
        probe: &Embedding,
        snapshot: &Snapshot,
        tolerance: f32,
    ) -> Result<MatchDecision, MatchError>;
}

fn check_inputs(probe: &Embedding, snapshot: &Snapshot, tolerance: f32) -> Result<(), MatchError> {
    probe.validate(snapshot.dimension())?;
    if tolerance.is_nan() || tolerance < 0.0 {
        return Err(MatchError::InvalidTolerance(tolerance));
    }
    Ok(())
}

fn decide(snapshot: &Snapshot, best: Option<(usize, f32)>, tolerance: f32) -> MatchDecision {
    match best {
        Some((position, distance)) if distance <= tolerance => MatchDecision::Matched {
            identity: snapshot.identity_at(position).clone(),
            distance,
        },
        _ => MatchDecision::NoMatch,
    }
}

/// Full scan over the snapshot, O(N·D) per probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearMatcher;

impl Matcher for LinearMatcher {
    fn find_match(
        &self,
        probe: &Embedding,
        snapshot: &Snapshot,
        tolerance: f32,
    ) -> Result<MatchDecision, MatchError> {
        check_inputs(probe, snapshot, tolerance)?;

        let mut best: Option<(usize, f32)> = None;
        for (position, (_, candidate)) in snapshot.iter().enumerate() {
            let distance = euclidean_distance(&probe.values, &candidate.values);
            // Strict comparison: the earliest of several equidistant
            // candidates is kept.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((position, distance));
            }
        }

        let decision = decide(snapshot, best, tolerance);
        tracing::debug!(
            candidates = snapshot.len(),
            best_distance = ?best.map(|(_, d)| d),
            matched = decision.is_match(),
            "linear match"
        );
        Ok(decision)
    }
}

/// Vantage-point tree search, sub-linear on typical galleries.
///
/// The index is built once per snapshot and cached inside it, so repeated
/// probes against the same snapshot only pay for the search.
#[derive(Debug, Clone, Copy, Default)]
pub struct VpTreeMatcher;

impl Matcher for VpTreeMatcher {
    fn find_match(
        &self,
        probe: &Embedding,
        snapshot: &Snapshot,
        tolerance: f32,
    ) -> Result<MatchDecision, MatchError> {
        check_inputs(probe, snapshot, tolerance)?;

        let best = snapshot
            .vp_tree()
            .nearest(snapshot, &probe.values, tolerance);

        let decision = decide(snapshot, best, tolerance);
        tracing::debug!(
            candidates = snapshot.len(),
            best_distance = ?best.map(|(_, d)| d),
            matched = decision.is_match(),
            "vp-tree match"
        );
        Ok(decision)
    }
}

/// Matcher selection, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatcherKind {
    #[default]
    Linear,
    VpTree,
}

impl MatcherKind {
    pub fn build(self) -> Box<dyn Matcher + Send + Sync> {
        match self {
            MatcherKind::Linear => Box::new(LinearMatcher),
            MatcherKind::VpTree => Box::new(VpTreeMatcher),
        }
    }
}

impl FromStr for MatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "scan" => Ok(MatcherKind::Linear),
            "vptree" | "vp-tree" => Ok(MatcherKind::VpTree),
            other => Err(format!("unknown matcher {other:?} (expected linear or vptree)")),
        }
    }
}

impl fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatcherKind::Linear => "linear",
            MatcherKind::VpTree => "vptree",
        })
    }
}
