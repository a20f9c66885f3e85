//! Gallery and person-ledger contracts.
//!
//! A gallery holds one [`IdentityRecord`] per "new face" decision. Records are never
//! updated in place; membership only changes through age, person or full deletion.

use crate::attributes::{Attribute, FaceAttributes};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Candidates ranked per nearest-neighbor query.
pub const DEFAULT_NEIGHBORS: usize = 10;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding is not unit-norm (norm {norm})")]
    NotNormalized { norm: f32 },
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("storage: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl GalleryError {
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        GalleryError::Storage(Box::new(err))
    }
}

/// One stored face observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: i64,
    pub person_id: i64,
    pub person_name: String,
    pub embedding: Embedding,
    pub attributes: FaceAttributes,
    /// Insertion time, epoch milliseconds.
    pub created_at: i64,
}

/// Insert payload. `id` and `created_at` are assigned by the gallery.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub person_id: i64,
    pub person_name: String,
    pub embedding: Embedding,
    pub attributes: FaceAttributes,
}

/// Best nearest-neighbor hit and its dot-product similarity to the query.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub record: IdentityRecord,
    pub similarity: f32,
}

/// Explicitly registered person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person_id: i64,
    pub person_name: String,
    pub num_images: u64,
    /// Registration time, epoch milliseconds.
    pub add_time: i64,
}

/// Display label for a minted identity.
pub fn person_name(person_id: i64) -> String {
    format!("Person_{person_id}")
}

/// Vector-indexed identity store.
pub trait VectorGallery {
    /// Width every stored embedding must have.
    fn dimension(&self) -> usize;

    /// Append a record, stamping `created_at` from the gallery clock.
    fn insert(&mut self, record: NewIdentity) -> Result<IdentityRecord, GalleryError>;

    /// Rank the `k` closest records by dot product and return the first.
    fn nearest_neighbor(&self, query: &[f32], k: usize) -> Result<Option<Neighbor>, GalleryError>;

    /// Draw the next person id from the gallery-owned sequence.
    fn next_person_id(&mut self) -> Result<i64, GalleryError>;

    fn count_total(&self) -> Result<u64, GalleryError>;

    fn count_where(&self, attribute: Attribute, value: &str) -> Result<u64, GalleryError>;

    /// Remove every record with `created_at < cutoff`. Returns how many were removed.
    fn delete_older_than(&mut self, cutoff: i64) -> Result<usize, GalleryError>;

    fn delete_by_person_id(&mut self, person_id: i64) -> Result<usize, GalleryError>;

    /// Remove every record and reset the person-id sequence.
    fn clear(&mut self) -> Result<usize, GalleryError>;

    /// Records with `from <= created_at <= to`.
    fn records_created_between(&self, from: i64, to: i64)
        -> Result<Vec<IdentityRecord>, GalleryError>;

    /// Most recently created record of a person over all time.
    fn latest_for_person(&self, person_id: i64) -> Result<Option<IdentityRecord>, GalleryError>;
}

/// Ledger of explicitly registered persons.
pub trait PersonLedger {
    fn add_person(&mut self, name: &str, num_images: u64) -> Result<PersonRecord, GalleryError>;

    fn remove_person(&mut self, person_id: i64) -> Result<bool, GalleryError>;

    fn count_persons(&self) -> Result<u64, GalleryError>;

    fn persons(&self) -> Result<Vec<PersonRecord>, GalleryError>;

    fn clear_persons(&mut self) -> Result<usize, GalleryError>;
}

/// Validate an embedding before it is written.
pub fn check_insertable(embedding: &Embedding, dimension: usize) -> Result<(), GalleryError> {
    if embedding.dim() != dimension {
        return Err(GalleryError::DimensionMismatch {
            expected: dimension,
            actual: embedding.dim(),
        });
    }
    if !embedding.is_unit() {
        return Err(GalleryError::NotNormalized {
            norm: embedding.norm(),
        });
    }
    Ok(())
}

/// Rank `(record_id, vector)` candidates by dot product with `query`.
///
/// Returns at most `k` `(record_id, similarity)` pairs, best first; equal scores keep
/// ascending record id so the oldest record wins. Candidates of the wrong width or with a
/// non-finite score are skipped.
pub fn rank_candidates<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<(i64, f32)>
where
    I: IntoIterator<Item = (i64, &'a [f32])>,
{
    if k == 0 || query.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(i64, f32)> = candidates
        .into_iter()
        .filter(|(_, v)| v.len() == query.len())
        .map(|(id, v)| (id, crate::types::dot(query, v)))
        .filter(|(_, sim)| sim.is_finite())
        .collect();

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_by_similarity_then_id() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let c = [1.0f32, 0.0];
        let ranked = rank_candidates(&[1.0, 0.0], vec![(3, &b[..]), (2, &c[..]), (1, &a[..])], 10);
        assert_eq!(ranked.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rank_truncates_to_k() {
        let v = [1.0f32];
        let ranked = rank_candidates(&[1.0], (0..20).map(|i| (i, &v[..])), 10);
        assert_eq!(ranked.len(), 10);
        assert!(rank_candidates(&[1.0], vec![(1, &v[..])], 0).is_empty());
    }

    #[test]
    fn test_rank_skips_mismatched_width() {
        let short = [1.0f32];
        let ranked = rank_candidates(&[1.0, 0.0], vec![(1, &short[..])], 10);
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_check_insertable() {
        assert!(check_insertable(&Embedding::new(vec![1.0, 0.0]), 2).is_ok());
        assert!(matches!(
            check_insertable(&Embedding::new(vec![1.0, 0.0]), 3),
            Err(GalleryError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            check_insertable(&Embedding::new(vec![0.0, 0.0]), 2),
            Err(GalleryError::NotNormalized { .. })
        ));
    }

    #[test]
    fn test_person_name_format() {
        assert_eq!(person_name(7), "Person_7");
    }
}
