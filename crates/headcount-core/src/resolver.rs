//! Identity resolution: match a face against the gallery or mint a new identity.

use crate::attributes::FaceAttributes;
use crate::gallery::{
    check_insertable, person_name, GalleryError, NewIdentity, VectorGallery, DEFAULT_NEIGHBORS,
};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};

/// Minimum dot-product similarity for a match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub similarity_threshold: f32,
    pub neighbors: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            neighbors: DEFAULT_NEIGHBORS,
        }
    }
}

/// Outcome of resolving one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub person_id: i64,
    pub person_name: String,
    pub is_new_identity: bool,
    /// Similarity to the best gallery candidate, if one was compared.
    pub similarity: Option<f32>,
    /// Id of the record inserted for a new identity. `None` for matches and for
    /// degenerate embeddings, which are never stored.
    pub record_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver {
    config: ResolverConfig,
}

impl IdentityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a normalized embedding against `gallery`.
    ///
    /// Below-threshold (or absent) neighbors mint a new person and append a record carrying
    /// `attributes`. A match returns the stored identity untouched. An embedding that is not
    /// unit-norm skips the lookup: it gets a fresh person id but is not stored. A unit
    /// embedding of the wrong width is an error and draws no id.
    pub fn resolve<G>(
        &self,
        gallery: &mut G,
        embedding: &Embedding,
        attributes: &FaceAttributes,
    ) -> Result<Resolution, GalleryError>
    where
        G: VectorGallery + ?Sized,
    {
        if !embedding.is_unit() {
            let person_id = gallery.next_person_id()?;
            tracing::warn!(
                person_id,
                norm = embedding.norm(),
                dim = embedding.dim(),
                "degenerate embedding; minted identity without storing it"
            );
            return Ok(Resolution {
                person_id,
                person_name: person_name(person_id),
                is_new_identity: true,
                similarity: None,
                record_id: None,
            });
        }

        // Reject unstorable input before a person id is drawn.
        check_insertable(embedding, gallery.dimension())?;

        let neighbor = gallery.nearest_neighbor(&embedding.values, self.config.neighbors)?;

        if let Some(neighbor) = &neighbor {
            // `>=` is false for NaN, so a NaN score falls through to a new identity.
            if neighbor.similarity >= self.config.similarity_threshold {
                tracing::debug!(
                    person_id = neighbor.record.person_id,
                    person_name = %neighbor.record.person_name,
                    similarity = neighbor.similarity,
                    "matched existing identity"
                );
                return Ok(Resolution {
                    person_id: neighbor.record.person_id,
                    person_name: neighbor.record.person_name.clone(),
                    is_new_identity: false,
                    similarity: Some(neighbor.similarity),
                    record_id: None,
                });
            }
        }

        let person_id = gallery.next_person_id()?;
        let name = person_name(person_id);
        let stored = gallery.insert(NewIdentity {
            person_id,
            person_name: name.clone(),
            embedding: embedding.clone(),
            attributes: attributes.clone(),
        })?;

        let similarity = neighbor.map(|n| n.similarity);
        tracing::info!(person_id, person_name = %name, ?similarity, "new identity");

        Ok(Resolution {
            person_id,
            person_name: name,
            is_new_identity: true,
            similarity,
            record_id: Some(stored.id),
        })
    }
}
