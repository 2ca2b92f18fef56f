use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, Identity};

/// Associate `embedding` with `identity`, replacing any previous one.
///
/// No matching happens here: re-enrollment overwrites unconditionally.
pub fn enroll<S>(store: &S, identity: &Identity, embedding: Embedding) -> Result<(), StoreError>
where
    S: EmbeddingStore + ?Sized,
{
    if let Err(e) = embedding.validate(store.dimension()) {
        tracing::warn!(identity = %identity, error = %e, "enrollment rejected");
        return Err(e.into());
    }
    store.put(identity, embedding)?;
    tracing::info!(identity = %identity, "face enrolled");
    Ok(())
}
