//! Image-level login and enrollment.
//!
//! Glue between an uploaded image, an [`Extractor`] and the store/matcher
//! pair. Token issuance belongs to the caller: a successful login only yields
//! the matched identity.

use crate::enroll::enroll;
use crate::matcher::{MatchError, Matcher};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, Identity, MatchDecision};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("extractor failed: {0}")]
pub struct ExtractorError(pub String);

/// Face encoder: one embedding per detected face, in detection order.
pub trait Extractor {
    fn extract(&self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractorError>;
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("match failed: {0}")]
    Match(#[from] MatchError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct Authenticator<E, S> {
    extractor: E,
    store: S,
    matcher: Box<dyn Matcher + Send + Sync>,
    tolerance: f32,
}

impl<E: Extractor, S: EmbeddingStore> Authenticator<E, S> {
    pub fn new(
        extractor: E,
        store: S,
        matcher: Box<dyn Matcher + Send + Sync>,
        tolerance: f32,
    ) -> Self {
        Self {
            extractor,
            store,
            matcher,
            tolerance,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decode `image_bytes`, encode the first face and match it.
    pub fn login(&self, image_bytes: &[u8]) -> Result<MatchDecision, AuthError> {
        let probe = self.first_face(image_bytes)?;
        let snapshot = self.store.snapshot()?;
        let decision = self.matcher.find_match(&probe, &snapshot, self.tolerance)?;

        match &decision {
            MatchDecision::Matched { identity, distance } => {
                tracing::info!(identity = %identity, distance, "facial login accepted");
            }
            MatchDecision::NoMatch => {
                tracing::info!(candidates = snapshot.len(), "facial login rejected: no match");
            }
        }
        Ok(decision)
    }

    /// Decode `image_bytes`, encode the first face and enroll it for `identity`.
    pub fn enroll_image(&self, identity: &Identity, image_bytes: &[u8]) -> Result<(), AuthError> {
        let embedding = self.first_face(image_bytes)?;
        enroll(&self.store, identity, embedding)?;
        Ok(())
    }

    fn first_face(&self, image_bytes: &[u8]) -> Result<Embedding, AuthError> {
        let image = image::load_from_memory(image_bytes)?.to_rgb8();
        let mut faces = self.extractor.extract(&image)?;

        if faces.len() > 1 {
            tracing::debug!(faces = faces.len(), "multiple faces detected; using the first");
        }
        if faces.is_empty() {
            return Err(AuthError::NoFaceDetected);
        }
        Ok(faces.swap_remove(0))
    }
}
