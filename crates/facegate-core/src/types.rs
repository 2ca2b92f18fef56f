use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Embedding dimensionality produced by the reference face encoder.
pub const DEFAULT_DIMENSION: usize = 128;

/// Maximum Euclidean distance accepted as the same face.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// An embedding that cannot be stored or compared.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("invalid embedding: expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid embedding: component {index} is not finite")]
    NonFinite { index: usize },
    #[error("invalid embedding: cannot parse component {index} ({token:?})")]
    Parse { index: usize, token: String },
    #[error("invalid embedding: {len}-byte blob is not a whole number of f32 components")]
    TornBlob { len: usize },
    #[error("unusable embedding dimension: {dimension}")]
    InvalidDimension { dimension: usize },
}

/// Check that `dimension` can size a store: non-zero, and small enough that
/// the `4 * D` byte blob length fits in `usize`.
pub fn check_dimension(dimension: usize) -> Result<(), EmbeddingError> {
    if dimension == 0 || dimension.checked_mul(std::mem::size_of::<f32>()).is_none() {
        return Err(EmbeddingError::InvalidDimension { dimension });
    }
    Ok(())
}

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Check that the embedding has exactly `dimension` finite components.
    ///
    /// Never pads or truncates: a wrong-sized vector is rejected as-is.
    pub fn validate(&self, dimension: usize) -> Result<(), EmbeddingError> {
        check_dimension(dimension)?;
        if self.values.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: self.values.len(),
            });
        }
        if let Some(index) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        Ok(())
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Both sides must already be validated against the same dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        euclidean_distance(&self.values, &other.values)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// `sqrt(Σ (a_i - b_i)^2)`, rounded to `f32`.
///
/// Every reported distance in the crate goes through this function so that
/// the linear and indexed matchers see bit-identical values for the same pair.
pub(crate) fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_f64(a, b) as f32
}

/// Unrounded distance, accumulated in `f64`.
///
/// Squares of finite `f32` differences cannot overflow here, so the result
/// is finite for any pair of validated embeddings.
pub(crate) fn euclidean_distance_f64(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (f64::from(x) - f64::from(y)).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Opaque reference to a registered account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Outcome of matching one probe against a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchDecision {
    Matched { identity: Identity, distance: f32 },
    NoMatch,
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchDecision::Matched { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MatchDecision::Matched { identity, .. } => Some(identity),
            MatchDecision::NoMatch => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.5, -0.25, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn test_validate_rejects_wrong_dimension() {
        let e = Embedding::new(vec![0.0; 127]);
        assert_eq!(
            e.validate(DEFAULT_DIMENSION),
            Err(EmbeddingError::DimensionMismatch { expected: 128, actual: 127 })
        );
        assert!(Embedding::new(vec![0.0; 128]).validate(DEFAULT_DIMENSION).is_ok());
        assert_eq!(
            Embedding::new(vec![]).validate(0),
            Err(EmbeddingError::InvalidDimension { dimension: 0 })
        );
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let e = Embedding::new(vec![0.0, f32::NAN, 1.0]);
        assert_eq!(e.validate(3), Err(EmbeddingError::NonFinite { index: 1 }));
        let e = Embedding::new(vec![f32::INFINITY, 0.0, 1.0]);
        assert_eq!(e.validate(3), Err(EmbeddingError::NonFinite { index: 0 }));
    }

    #[test]
    fn test_distance_of_extreme_components_is_finite() {
        let a = [3e38f32, -3e38];
        let b = [-3e38f32, 3e38];
        assert!(euclidean_distance_f64(&a, &b).is_finite());
        assert_eq!(euclidean_distance(&a, &b), f32::INFINITY);
        assert_eq!(euclidean_distance(&a, &a), 0.0);
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(DEFAULT_DIMENSION).is_ok());
        assert_eq!(check_dimension(0), Err(EmbeddingError::InvalidDimension { dimension: 0 }));
        assert_eq!(
            check_dimension(usize::MAX),
            Err(EmbeddingError::InvalidDimension { dimension: usize::MAX })
        );
    }

    #[test]
    fn test_match_decision_serializes_tagged() {
        let d = MatchDecision::Matched { identity: "u1".into(), distance: 0.25 };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["result"], "matched");
        assert_eq!(json["identity"], "u1");
        assert_eq!(
            serde_json::to_value(MatchDecision::NoMatch).unwrap()["result"],
            "no_match"
        );
        assert_eq!(d.identity().map(Identity::as_str), Some("u1"));
        assert!(!MatchDecision::NoMatch.is_match());
    }
}
