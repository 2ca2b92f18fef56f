//! Embedding store contract and the in-memory implementation.
//!
//! A [`Snapshot`] is an immutable, identity-ordered view of every enrolled
//! embedding. Stores hand snapshots out behind an `Arc`; a snapshot never
//! changes after it is returned, so a matcher can scan it without locks while
//! enrollments continue.

use crate::types::{check_dimension, Embedding, EmbeddingError, Identity};
use crate::vptree::VpTree;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    InvalidEmbedding(#[from] EmbeddingError),
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identity),
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Storage of at most one embedding per identity.
pub trait EmbeddingStore {
    /// Dimensionality every stored embedding must have.
    fn dimension(&self) -> usize;

    /// Set or replace the identity's embedding wholesale.
    fn put(&self, identity: &Identity, embedding: Embedding) -> Result<(), StoreError>;

    /// Point-in-time view of all identities that have an embedding.
    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError>;
}

impl<T: EmbeddingStore + ?Sized> EmbeddingStore for Arc<T> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn put(&self, identity: &Identity, embedding: Embedding) -> Result<(), StoreError> {
        (**self).put(identity, embedding)
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        (**self).snapshot()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    identity: Identity,
    embedding: Arc<Embedding>,
}

/// Immutable set of `(identity, embedding)` pairs, sorted by identity.
///
/// Iteration order is the tie-break order used by every matcher: among
/// equidistant candidates the one that comes first here wins.
///
/// The generation increases each time the owning store publishes a snapshot
/// with possibly different contents.
#[derive(Debug)]
pub struct Snapshot {
    dimension: usize,
    generation: u64,
    entries: Vec<Entry>,
    index: OnceLock<VpTree>,
}

impl Snapshot {
    pub fn empty(dimension: usize) -> Self {
        Self::from_sorted(dimension, 0, Vec::new())
    }

    /// Build a snapshot from arbitrary pairs, validating each embedding.
    ///
    /// When an identity appears more than once the last pair wins.
    pub fn from_pairs<I>(dimension: usize, pairs: I) -> Result<Self, EmbeddingError>
    where
        I: IntoIterator<Item = (Identity, Embedding)>,
    {
        check_dimension(dimension)?;
        let mut entries: Vec<Entry> = Vec::new();
        for (identity, embedding) in pairs {
            embedding.validate(dimension)?;
            entries.push(Entry {
                identity,
                embedding: Arc::new(embedding),
            });
        }
        // Stable sort keeps arrival order within an identity; dedup then
        // keeps the last arrival.
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        entries.reverse();
        entries.dedup_by(|a, b| a.identity == b.identity);
        entries.reverse();

        Ok(Self::from_sorted(dimension, 0, entries))
    }

    fn from_sorted(dimension: usize, generation: u64, entries: Vec<Entry>) -> Self {
        Self {
            dimension,
            generation,
            entries,
            index: OnceLock::new(),
        }
    }

    /// Same snapshot, stamped with `generation`.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Identity, &Embedding)> + '_ {
        self.entries.iter().map(|e| (&e.identity, e.embedding.as_ref()))
    }

    pub fn get(&self, identity: &Identity) -> Option<&Embedding> {
        self.position(identity)
            .ok()
            .map(|i| self.entries[i].embedding.as_ref())
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.position(identity).is_ok()
    }

    pub(crate) fn identity_at(&self, position: usize) -> &Identity {
        &self.entries[position].identity
    }

    pub(crate) fn values_at(&self, position: usize) -> &[f32] {
        &self.entries[position].embedding.values
    }

    /// Vantage-point tree over this snapshot, built on first use.
    pub(crate) fn vp_tree(&self) -> &VpTree {
        self.index.get_or_init(|| {
            let tree = VpTree::build(self);
            tracing::debug!(candidates = self.len(), "built vantage-point index");
            tree
        })
    }

    fn position(&self, identity: &Identity) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.identity.cmp(identity))
    }

    /// Copy of this snapshot with `identity` set to `embedding`.
    ///
    /// Embeddings are shared by `Arc`, so this copies pointers, not vectors.
    fn with_entry(&self, identity: &Identity, embedding: Arc<Embedding>) -> Self {
        let mut entries = self.entries.clone();
        match self.position(identity) {
            Ok(i) => entries[i].embedding = embedding,
            Err(i) => entries.insert(
                i,
                Entry {
                    identity: identity.clone(),
                    embedding,
                },
            ),
        }
        Self::from_sorted(self.dimension, self.generation + 1, entries)
    }

    fn without_entry(&self, position: usize) -> Self {
        let mut entries = self.entries.clone();
        entries.remove(position);
        Self::from_sorted(self.dimension, self.generation + 1, entries)
    }
}

/// Process-local store with copy-on-write snapshots.
///
/// Writers serialize on the lock and publish a fresh snapshot; readers clone
/// the current `Arc` and never observe a partially applied write.
#[derive(Debug)]
pub struct MemoryStore {
    current: RwLock<Arc<Snapshot>>,
}

impl MemoryStore {
    /// Empty store for `dimension`-sized embeddings. Zero is rejected.
    pub fn new(dimension: usize) -> Result<Self, EmbeddingError> {
        check_dimension(dimension)?;
        Ok(Self {
            current: RwLock::new(Arc::new(Snapshot::empty(dimension))),
        })
    }

    /// Drop the identity's embedding. Returns whether one was present.
    pub fn remove(&self, identity: &Identity) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let Ok(position) = current.position(identity) else {
            return false;
        };
        let next = Arc::new(current.without_entry(position));
        *current = next;
        tracing::info!(identity = %identity, "embedding removed");
        true
    }
}

impl EmbeddingStore for MemoryStore {
    fn dimension(&self) -> usize {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dimension()
    }

    fn put(&self, identity: &Identity, embedding: Embedding) -> Result<(), StoreError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        embedding.validate(current.dimension())?;

        if current.get(identity) == Some(&embedding) {
            tracing::debug!(identity = %identity, "embedding unchanged");
            return Ok(());
        }

        let next = Arc::new(current.with_entry(identity, Arc::new(embedding)));
        *current = next;
        tracing::debug!(
            identity = %identity,
            enrolled = current.len(),
            generation = current.generation(),
            "embedding stored"
        );
        Ok(())
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        Ok(Arc::clone(
            &self.current.read().unwrap_or_else(PoisonError::into_inner),
        ))
    }
}
