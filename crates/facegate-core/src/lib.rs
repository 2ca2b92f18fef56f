//! facegate-core — facial-signature matching.
//!
//! Stores at most one face embedding per identity and answers "which enrolled
//! identity, if any, is this face?" by Euclidean nearest-neighbor search under
//! a fixed tolerance.

pub mod auth;
pub mod codec;
pub mod enroll;
pub mod matcher;
pub mod store;
pub mod types;
mod vptree;

pub use auth::{AuthError, Authenticator, Extractor, ExtractorError};
pub use enroll::enroll;
pub use matcher::{LinearMatcher, MatchError, Matcher, MatcherKind, VpTreeMatcher};
pub use store::{EmbeddingStore, MemoryStore, Snapshot, StoreError};
pub use types::{
    check_dimension, Embedding, EmbeddingError, Identity, MatchDecision, DEFAULT_DIMENSION,
    DEFAULT_TOLERANCE,
};
