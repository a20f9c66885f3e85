//! [`VectorGallery`] and [`PersonLedger`] over a borrowed SQLite connection.
//!
//! Both types are cheap views meant to live for one transaction: the async handle in
//! [`crate::store`] opens the transaction and lends it here.

use crate::schema::PERSON_SEQUENCE;
use headcount_core::gallery::{check_insertable, rank_candidates};
use headcount_core::{
    Attribute, Clock, Embedding, FaceAttributes, GalleryError, IdentityRecord, Neighbor,
    NewIdentity, PersonLedger, PersonRecord, VectorGallery,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

const RECORD_COLUMNS: &str =
    "id, person_id, person_name, embedding, dimension, model_version, gender, age_group, expression, created_at";

pub struct SqliteGallery<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
    dimension: usize,
}

impl<'c> SqliteGallery<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock, dimension: usize) -> Self {
        Self {
            conn,
            clock,
            dimension,
        }
    }

    fn record_by_id(&self, id: i64) -> Result<Option<IdentityRecord>, GalleryError> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM face_records WHERE id = ?1"),
                [id],
                row_to_record,
            )
            .optional()
            .map_err(GalleryError::storage)
    }

    fn count(&self, sql: &str, value: Option<&str>) -> Result<u64, GalleryError> {
        let n: i64 = match value {
            Some(v) => self.conn.query_row(sql, [v], |r| r.get(0)),
            None => self.conn.query_row(sql, [], |r| r.get(0)),
        }
        .map_err(GalleryError::storage)?;
        Ok(n.max(0) as u64)
    }
}

impl VectorGallery for SqliteGallery<'_> {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn insert(&mut self, record: NewIdentity) -> Result<IdentityRecord, GalleryError> {
        check_insertable(&record.embedding, self.dimension)?;
        let created_at = self.clock.now_millis();
        let attrs = &record.attributes;

        self.conn
            .execute(
                "INSERT INTO face_records
                    (person_id, person_name, embedding, dimension, model_version,
                     gender, age_group, expression, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.person_id,
                    record.person_name,
                    encode_embedding(&record.embedding.values),
                    record.embedding.dim() as i64,
                    record.embedding.model_version,
                    attrs.gender,
                    attrs.age_group,
                    attrs.expression,
                    created_at,
                ],
            )
            .map_err(GalleryError::storage)?;

        Ok(IdentityRecord {
            id: self.conn.last_insert_rowid(),
            person_id: record.person_id,
            person_name: record.person_name,
            embedding: record.embedding,
            attributes: record.attributes,
            created_at,
        })
    }

    fn nearest_neighbor(&self, query: &[f32], k: usize) -> Result<Option<Neighbor>, GalleryError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, embedding, dimension FROM face_records WHERE dimension = ?1")
            .map_err(GalleryError::storage)?;
        let rows = stmt
            .query_map([query.len() as i64], |row| {
                let id: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let dimension: i64 = row.get(2)?;
                Ok((id, blob, dimension))
            })
            .map_err(GalleryError::storage)?;

        let mut candidates: Vec<(i64, Vec<f32>)> = Vec::new();
        for row in rows {
            let (id, blob, dimension) = row.map_err(GalleryError::storage)?;
            candidates.push((id, decode_embedding(&blob, dimension as usize)?));
        }

        let ranked = rank_candidates(
            query,
            candidates.iter().map(|(id, v)| (*id, v.as_slice())),
            k,
        );
        let Some(&(id, similarity)) = ranked.first() else {
            return Ok(None);
        };

        Ok(self
            .record_by_id(id)?
            .map(|record| Neighbor { record, similarity }))
    }

    fn next_person_id(&mut self) -> Result<i64, GalleryError> {
        self.conn
            .query_row(
                "UPDATE sequences SET value = value + 1 WHERE name = ?1 RETURNING value",
                [PERSON_SEQUENCE],
                |row| row.get(0),
            )
            .map_err(GalleryError::storage)
    }

    fn count_total(&self) -> Result<u64, GalleryError> {
        self.count("SELECT COUNT(*) FROM face_records", None)
    }

    fn count_where(&self, attribute: Attribute, value: &str) -> Result<u64, GalleryError> {
        let sql = format!(
            "SELECT COUNT(*) FROM face_records WHERE {} = ?1",
            attribute.column()
        );
        self.count(&sql, Some(value))
    }

    fn delete_older_than(&mut self, cutoff: i64) -> Result<usize, GalleryError> {
        self.conn
            .execute("DELETE FROM face_records WHERE created_at < ?1", [cutoff])
            .map_err(GalleryError::storage)
    }

    fn delete_by_person_id(&mut self, person_id: i64) -> Result<usize, GalleryError> {
        self.conn
            .execute("DELETE FROM face_records WHERE person_id = ?1", [person_id])
            .map_err(GalleryError::storage)
    }

    fn clear(&mut self) -> Result<usize, GalleryError> {
        let removed = self
            .conn
            .execute("DELETE FROM face_records", [])
            .map_err(GalleryError::storage)?;
        self.conn
            .execute(
                "UPDATE sequences SET value = 0 WHERE name = ?1",
                [PERSON_SEQUENCE],
            )
            .map_err(GalleryError::storage)?;
        Ok(removed)
    }

    fn records_created_between(
        &self,
        from: i64,
        to: i64,
    ) -> Result<Vec<IdentityRecord>, GalleryError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "SELECT {RECORD_COLUMNS} FROM face_records
                 WHERE created_at BETWEEN ?1 AND ?2
                 ORDER BY created_at ASC, id ASC"
            ))
            .map_err(GalleryError::storage)?;
        let rows = stmt
            .query_map([from, to], row_to_record)
            .map_err(GalleryError::storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(GalleryError::storage)
    }

    fn latest_for_person(&self, person_id: i64) -> Result<Option<IdentityRecord>, GalleryError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM face_records
                     WHERE person_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1"
                ),
                [person_id],
                row_to_record,
            )
            .optional()
            .map_err(GalleryError::storage)
    }
}

pub struct SqliteLedger<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
}

impl<'c> SqliteLedger<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock) -> Self {
        Self { conn, clock }
    }
}

impl PersonLedger for SqliteLedger<'_> {
    fn add_person(&mut self, name: &str, num_images: u64) -> Result<PersonRecord, GalleryError> {
        let add_time = self.clock.now_millis();
        let images = i64::try_from(num_images)
            .map_err(|_| GalleryError::Corrupt(format!("image count out of range: {num_images}")))?;
        self.conn
            .execute(
                "INSERT INTO persons (person_name, num_images, add_time) VALUES (?1, ?2, ?3)",
                params![name, images, add_time],
            )
            .map_err(GalleryError::storage)?;
        Ok(PersonRecord {
            person_id: self.conn.last_insert_rowid(),
            person_name: name.to_string(),
            num_images,
            add_time,
        })
    }

    fn remove_person(&mut self, person_id: i64) -> Result<bool, GalleryError> {
        let removed = self
            .conn
            .execute("DELETE FROM persons WHERE person_id = ?1", [person_id])
            .map_err(GalleryError::storage)?;
        Ok(removed > 0)
    }

    fn count_persons(&self) -> Result<u64, GalleryError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM persons", [], |r| r.get(0))
            .map_err(GalleryError::storage)?;
        Ok(n.max(0) as u64)
    }

    fn persons(&self) -> Result<Vec<PersonRecord>, GalleryError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT person_id, person_name, num_images, add_time FROM persons ORDER BY person_id",
            )
            .map_err(GalleryError::storage)?;
        let rows = stmt
            .query_map([], |row| {
                let images: i64 = row.get(2)?;
                Ok(PersonRecord {
                    person_id: row.get(0)?,
                    person_name: row.get(1)?,
                    num_images: images.max(0) as u64,
                    add_time: row.get(3)?,
                })
            })
            .map_err(GalleryError::storage)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(GalleryError::storage)
    }

    fn clear_persons(&mut self) -> Result<usize, GalleryError> {
        self.conn
            .execute("DELETE FROM persons", [])
            .map_err(GalleryError::storage)
    }
}

fn row_to_record(row: &Row) -> rusqlite::Result<IdentityRecord> {
    let blob: Vec<u8> = row.get(3)?;
    let dimension: i64 = row.get(4)?;
    let values = decode_embedding(&blob, dimension as usize)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Blob, Box::new(e)))?;

    Ok(IdentityRecord {
        id: row.get(0)?,
        person_id: row.get(1)?,
        person_name: row.get(2)?,
        embedding: Embedding {
            values,
            model_version: row.get(5)?,
        },
        attributes: FaceAttributes {
            gender: row.get(6)?,
            age_group: row.get(7)?,
            expression: row.get(8)?,
        },
        created_at: row.get(9)?,
    })
}

/// Little-endian f32 packing.
pub fn encode_embedding(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(blob: &[u8], dimension: usize) -> Result<Vec<f32>, GalleryError> {
    let expected = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected {
        return Err(GalleryError::Corrupt(format!(
            "embedding blob is {} bytes, expected {expected}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
