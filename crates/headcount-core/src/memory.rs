//! In-process gallery and ledger. Not durable; used for tests and ephemeral sessions.

use crate::attributes::Attribute;
use crate::clock::Clock;
use crate::gallery::{
    check_insertable, rank_candidates, GalleryError, IdentityRecord, Neighbor, NewIdentity,
    PersonLedger, PersonRecord, VectorGallery,
};
use std::sync::Arc;

pub struct MemoryGallery {
    dimension: usize,
    clock: Arc<dyn Clock>,
    records: Vec<IdentityRecord>,
    last_record_id: i64,
    last_person_id: i64,
}

impl MemoryGallery {
    pub fn new(dimension: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            dimension,
            clock,
            records: Vec::new(),
            last_record_id: 0,
            last_person_id: 0,
        }
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }
}

impl VectorGallery for MemoryGallery {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn insert(&mut self, record: NewIdentity) -> Result<IdentityRecord, GalleryError> {
        check_insertable(&record.embedding, self.dimension)?;
        self.last_record_id += 1;
        let stored = IdentityRecord {
            id: self.last_record_id,
            person_id: record.person_id,
            person_name: record.person_name,
            embedding: record.embedding,
            attributes: record.attributes,
            created_at: self.clock.now_millis(),
        };
        self.records.push(stored.clone());
        Ok(stored)
    }

    fn nearest_neighbor(&self, query: &[f32], k: usize) -> Result<Option<Neighbor>, GalleryError> {
        let ranked = rank_candidates(
            query,
            self.records
                .iter()
                .map(|r| (r.id, r.embedding.values.as_slice())),
            k,
        );
        let Some(&(id, similarity)) = ranked.first() else {
            return Ok(None);
        };
        Ok(self
            .records
            .iter()
            .find(|r| r.id == id)
            .map(|record| Neighbor {
                record: record.clone(),
                similarity,
            }))
    }

    fn next_person_id(&mut self) -> Result<i64, GalleryError> {
        self.last_person_id += 1;
        Ok(self.last_person_id)
    }

    fn count_total(&self) -> Result<u64, GalleryError> {
        Ok(self.records.len() as u64)
    }

    fn count_where(&self, attribute: Attribute, value: &str) -> Result<u64, GalleryError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.attributes.get(attribute) == Some(value))
            .count() as u64)
    }

    fn delete_older_than(&mut self, cutoff: i64) -> Result<usize, GalleryError> {
        let before = self.records.len();
        self.records.retain(|r| r.created_at >= cutoff);
        Ok(before - self.records.len())
    }

    fn delete_by_person_id(&mut self, person_id: i64) -> Result<usize, GalleryError> {
        let before = self.records.len();
        self.records.retain(|r| r.person_id != person_id);
        Ok(before - self.records.len())
    }

    fn clear(&mut self) -> Result<usize, GalleryError> {
        let removed = self.records.len();
        self.records.clear();
        self.last_person_id = 0;
        Ok(removed)
    }

    fn records_created_between(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Vec<IdentityRecord>, GalleryError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.created_at >= from && r.created_at <= to)
            .cloned()
            .collect())
    }

    fn latest_for_person(&self, person_id: i64) -> Result<Option<IdentityRecord>, GalleryError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.person_id == person_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }
}

pub struct MemoryLedger {
    clock: Arc<dyn Clock>,
    persons: Vec<PersonRecord>,
    last_person_id: i64,
}

impl MemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            persons: Vec::new(),
            last_person_id: 0,
        }
    }
}

impl PersonLedger for MemoryLedger {
    fn add_person(&mut self, name: &str, num_images: u64) -> Result<PersonRecord, GalleryError> {
        self.last_person_id += 1;
        let person = PersonRecord {
            person_id: self.last_person_id,
            person_name: name.to_string(),
            num_images,
            add_time: self.clock.now_millis(),
        };
        self.persons.push(person.clone());
        Ok(person)
    }

    fn remove_person(&mut self, person_id: i64) -> Result<bool, GalleryError> {
        let before = self.persons.len();
        self.persons.retain(|p| p.person_id != person_id);
        Ok(self.persons.len() != before)
    }

    fn count_persons(&self) -> Result<u64, GalleryError> {
        Ok(self.persons.len() as u64)
    }

    fn persons(&self) -> Result<Vec<PersonRecord>, GalleryError> {
        Ok(self.persons.clone())
    }

    fn clear_persons(&mut self) -> Result<usize, GalleryError> {
        let removed = self.persons.len();
        self.persons.clear();
        Ok(removed)
    }
}
