//! At-rest encodings for embeddings.
//!
//! Two forms are supported:
//! - text: components separated by single spaces, the legacy column format;
//! - binary: `4 * D` bytes of little-endian `f32`, used by the SQLite store.
//!
//! Both decoders check the component count against the deployment dimension
//! and reject anything else.

use crate::types::{Embedding, EmbeddingError};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Render an embedding as space-separated floats.
///
/// `f32`'s `Display` emits the shortest string that parses back to the same
/// bits, so text round-trips are exact.
pub fn encode_text(embedding: &Embedding) -> String {
    let mut out = String::with_capacity(embedding.values.len() * 12);
    for (i, v) in embedding.values.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&v.to_string());
    }
    out
}

/// Parse a whitespace-separated embedding and validate it against `dimension`.
pub fn decode_text(text: &str, dimension: usize) -> Result<Embedding, EmbeddingError> {
    let values = text
        .split_whitespace()
        .enumerate()
        .map(|(index, token)| {
            token.parse::<f32>().map_err(|_| EmbeddingError::Parse {
                index,
                token: token.to_string(),
            })
        })
        .collect::<Result<Vec<f32>, _>>()?;

    let embedding = Embedding::new(values);
    embedding.validate(dimension)?;
    Ok(embedding)
}

/// Encode an embedding as a fixed-width little-endian `f32` blob.
pub fn encode_binary(embedding: &Embedding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.values.len() * F32_BYTES);
    for value in &embedding.values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian `f32` blob; its length must be exactly `4 * dimension`.
pub fn decode_binary(bytes: &[u8], dimension: usize) -> Result<Embedding, EmbeddingError> {
    if bytes.len() % F32_BYTES != 0 {
        return Err(EmbeddingError::TornBlob { len: bytes.len() });
    }
    if dimension.checked_mul(F32_BYTES) != Some(bytes.len()) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bytes.len() / F32_BYTES,
        });
    }

    let values = bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let embedding = Embedding::new(values);
    embedding.validate(dimension)?;
    Ok(embedding)
}
