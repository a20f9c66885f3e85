//! Async handle over the SQLite gallery.
//!
//! Every operation runs inside one transaction on the connection's worker thread, so a
//! resolve (lookup, sequence bump, insert) is atomic with respect to every other caller
//! sharing the handle.

use crate::error::Result;
use crate::gallery::{SqliteGallery, SqliteLedger};
use crate::schema::migrate;
use headcount_core::counters::{stored_counts, StoredCounts};
use headcount_core::retention::{sweep, RetentionPolicy};
use headcount_core::types::DEFAULT_EMBEDDING_DIM;
use headcount_core::{
    Clock, Embedding, FaceAttributes, GalleryError, IdentityRecord, IdentityResolver, Neighbor,
    NewIdentity, PersonLedger, PersonRecord, Report, ReportAggregator, ReportRequest,
    Resolution, SystemClock, VectorGallery,
};
use rusqlite::{Connection as RawConnection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rusqlite::Connection;

/// Default database location: `$XDG_DATA_HOME/headcount/gallery.db`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("headcount")
        .join("gallery.db")
}

#[derive(Clone)]
pub struct StoreOptions {
    pub dimension: usize,
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIM,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Clone-safe handle to the gallery database.
#[derive(Clone)]
pub struct FaceStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
    dimension: usize,
}

impl FaceStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub async fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            tracing::debug!(journal_mode = %mode, "sqlite pragmas applied");
            Ok(())
        })
        .await?;

        let store = Self::init(conn, options).await?;
        tracing::info!(path = %path.display(), dimension = store.dimension, "gallery opened");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, options).await
    }

    async fn init(conn: Connection, options: StoreOptions) -> Result<Self> {
        let previous = conn.call(|conn| Ok(migrate(conn)?)).await?;
        tracing::debug!(schema_version = previous, "schema checked");
        Ok(Self {
            conn,
            clock: options.clock,
            dimension: options.dimension,
        })
    }

    /// Close the underlying connection. Other clones fail on their next call.
    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    async fn transact<T, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RawConnection, &dyn Clock, usize) -> std::result::Result<T, GalleryError>
            + Send
            + 'static,
    {
        let clock = Arc::clone(&self.clock);
        let dimension = self.dimension;
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(behavior)?;
                match f(&tx, clock.as_ref(), dimension) {
                    Ok(value) => {
                        tx.commit()?;
                        Ok(Ok(value))
                    }
                    // Dropping `tx` rolls back.
                    Err(e) => Ok(Err(e)),
                }
            })
            .await?;
        Ok(outcome?)
    }

    async fn write<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RawConnection, &dyn Clock, usize) -> std::result::Result<T, GalleryError>
            + Send
            + 'static,
    {
        self.transact(TransactionBehavior::Immediate, f).await
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RawConnection, &dyn Clock, usize) -> std::result::Result<T, GalleryError>
            + Send
            + 'static,
    {
        self.transact(TransactionBehavior::Deferred, f).await
    }

    // ── gallery ──

    /// Match `embedding` against the gallery or mint a new identity, atomically.
    pub async fn resolve(
        &self,
        resolver: IdentityResolver,
        embedding: Embedding,
        attributes: FaceAttributes,
    ) -> Result<Resolution> {
        self.write(move |conn, clock, dim| {
            let mut gallery = SqliteGallery::new(conn, clock, dim);
            resolver.resolve(&mut gallery, &embedding, &attributes)
        })
        .await
    }

    pub async fn insert(&self, record: NewIdentity) -> Result<IdentityRecord> {
        self.write(move |conn, clock, dim| SqliteGallery::new(conn, clock, dim).insert(record))
            .await
    }

    pub async fn nearest_neighbor(&self, query: Vec<f32>, k: usize) -> Result<Option<Neighbor>> {
        self.read(move |conn, clock, dim| {
            SqliteGallery::new(conn, clock, dim).nearest_neighbor(&query, k)
        })
        .await
    }

    pub async fn count_total(&self) -> Result<u64> {
        self.read(|conn, clock, dim| SqliteGallery::new(conn, clock, dim).count_total())
            .await
    }

    /// Exact-label counters over every stored record, read from one snapshot.
    pub async fn stored_counts(&self) -> Result<StoredCounts> {
        self.read(|conn, clock, dim| stored_counts(&SqliteGallery::new(conn, clock, dim)))
            .await
    }

    pub async fn delete_older_than(&self, cutoff: i64) -> Result<usize> {
        self.write(move |conn, clock, dim| {
            SqliteGallery::new(conn, clock, dim).delete_older_than(cutoff)
        })
        .await
    }

    /// Evict records older than the policy horizon, measured from the store clock.
    pub async fn sweep(&self, policy: RetentionPolicy) -> Result<usize> {
        self.write(move |conn, clock, dim| {
            let now = clock.now_millis();
            sweep(&mut SqliteGallery::new(conn, clock, dim), &policy, now)
        })
        .await
    }

    /// Remove every record of one person. Returns the number removed.
    pub async fn forget_person(&self, person_id: i64) -> Result<usize> {
        let removed = self
            .write(move |conn, clock, dim| {
                SqliteGallery::new(conn, clock, dim).delete_by_person_id(person_id)
            })
            .await?;
        tracing::info!(person_id, removed, "forgot person");
        Ok(removed)
    }

    /// Drop every record and restart person numbering.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self
            .write(|conn, clock, dim| SqliteGallery::new(conn, clock, dim).clear())
            .await?;
        tracing::info!(removed, "gallery cleared");
        Ok(removed)
    }

    pub async fn build_report(
        &self,
        aggregator: ReportAggregator,
        request: ReportRequest,
    ) -> Result<Report> {
        self.read(move |conn, clock, dim| {
            let gallery = SqliteGallery::new(conn, clock, dim);
            let ledger = SqliteLedger::new(conn, clock);
            aggregator.build_report(&gallery, &ledger, &request)
        })
        .await
    }

    // ── person ledger ──

    pub async fn add_person(&self, name: String, num_images: u64) -> Result<PersonRecord> {
        self.write(move |conn, clock, _| SqliteLedger::new(conn, clock).add_person(&name, num_images))
            .await
    }

    pub async fn remove_person(&self, person_id: i64) -> Result<bool> {
        self.write(move |conn, clock, _| SqliteLedger::new(conn, clock).remove_person(person_id))
            .await
    }

    pub async fn persons(&self) -> Result<Vec<PersonRecord>> {
        self.read(|conn, clock, _| SqliteLedger::new(conn, clock).persons())
            .await
    }

    pub async fn count_persons(&self) -> Result<u64> {
        self.read(|conn, clock, _| SqliteLedger::new(conn, clock).count_persons())
            .await
    }

    pub async fn clear_persons(&self) -> Result<usize> {
        self.write(|conn, clock, _| SqliteLedger::new(conn, clock).clear_persons())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use headcount_core::clock::{ManualClock, MILLIS_PER_HOUR, MILLIS_PER_MINUTE};
    use headcount_core::{AgeGroup, Expression, Gender};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;
    const DIM: usize = 8;

    async fn store() -> (FaceStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let options = StoreOptions {
            dimension: DIM,
            clock: clock.clone(),
        };
        (FaceStore::open_in_memory(options).await.unwrap(), clock)
    }

    fn axis(i: usize) -> Embedding {
        let mut v = vec![0.0; DIM];
        v[i] = 1.0;
        Embedding::new(v)
    }

    fn male_adult() -> FaceAttributes {
        FaceAttributes::new(Some(Gender::Male), Some(AgeGroup::Adult), Some(Expression::Happy))
    }

    #[tokio::test]
    async fn test_first_face_then_repeat() {
        let (store, _) = store().await;
        let resolver = IdentityResolver::default();

        let first = store.resolve(resolver, axis(0), male_adult()).await.unwrap();
        assert!(first.is_new_identity);
        assert_eq!(first.person_id, 1);
        assert_eq!(first.person_name, "Person_1");

        let again = store.resolve(resolver, axis(0), FaceAttributes::default()).await.unwrap();
        assert!(!again.is_new_identity);
        assert_eq!(again.person_id, 1);
        assert_eq!(store.count_total().await.unwrap(), 1);

        let counts = store.stored_counts().await.unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.gender.male, 1);
        assert_eq!(counts.age_group.adult, 1);
        assert_eq!(counts.expression.happy, 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_insert_once() {
        let (store, _) = store().await;
        let resolver = IdentityResolver::default();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.resolve(resolver, axis(3), FaceAttributes::default()).await
            }));
        }
        let mut new_count = 0;
        for task in tasks {
            let r = task.await.unwrap().unwrap();
            assert_eq!(r.person_id, 1);
            if r.is_new_identity {
                new_count += 1;
            }
        }
        assert_eq!(new_count, 1);
        assert_eq!(store.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_distinct_faces_get_distinct_ids() {
        let (store, _) = store().await;
        let resolver = IdentityResolver::default();
        let mut ids = Vec::new();
        for i in 0..DIM {
            let r = store.resolve(resolver, axis(i), FaceAttributes::default()).await.unwrap();
            assert!(r.is_new_identity);
            ids.push(r.person_id);
        }
        assert_eq!(ids, (1..=DIM as i64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_retention_never_reuses_ids() {
        let (store, clock) = store().await;
        let resolver = IdentityResolver::default();
        store.resolve(resolver, axis(0), FaceAttributes::default()).await.unwrap();
        store.resolve(resolver, axis(1), FaceAttributes::default()).await.unwrap();

        clock.advance(2 * MILLIS_PER_HOUR);
        let policy = RetentionPolicy {
            horizon: Duration::from_secs(3600),
            interval: Duration::from_secs(900),
        };
        assert_eq!(store.sweep(policy).await.unwrap(), 2);
        assert_eq!(store.sweep(policy).await.unwrap(), 0);

        let r = store.resolve(resolver, axis(0), FaceAttributes::default()).await.unwrap();
        assert!(r.is_new_identity);
        assert_eq!(r.person_id, 3);
    }

    #[tokio::test]
    async fn test_sweep_boundary() {
        let (store, clock) = store().await;
        clock.set(NOW - 2 * MILLIS_PER_HOUR);
        store.insert(NewIdentity {
            person_id: 1,
            person_name: "Person_1".into(),
            embedding: axis(0),
            attributes: FaceAttributes::default(),
        })
        .await
        .unwrap();
        clock.set(NOW - 30 * MILLIS_PER_MINUTE);
        store.insert(NewIdentity {
            person_id: 2,
            person_name: "Person_2".into(),
            embedding: axis(1),
            attributes: FaceAttributes::default(),
        })
        .await
        .unwrap();
        clock.set(NOW);

        assert_eq!(store.delete_older_than(NOW - MILLIS_PER_HOUR).await.unwrap(), 1);
        assert_eq!(store.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_degenerate_embedding_is_not_stored() {
        let (store, _) = store().await;
        let r = store
            .resolve(IdentityResolver::default(), Embedding::new(vec![0.0; DIM]), male_adult())
            .await
            .unwrap();
        assert!(r.is_new_identity);
        assert_eq!(r.record_id, None);
        assert_eq!(store.count_total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_dimension_insert_is_rejected() {
        let (store, _) = store().await;
        let err = store
            .insert(NewIdentity {
                person_id: 1,
                person_name: "Person_1".into(),
                embedding: Embedding::new(vec![1.0, 0.0]),
                attributes: FaceAttributes::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Gallery(GalleryError::DimensionMismatch { expected: DIM, actual: 2 })
        ));
        assert_eq!(store.count_total().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_restarts_numbering() {
        let (store, _) = store().await;
        let resolver = IdentityResolver::default();
        store.resolve(resolver, axis(0), FaceAttributes::default()).await.unwrap();
        store.resolve(resolver, axis(1), FaceAttributes::default()).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        let r = store.resolve(resolver, axis(2), FaceAttributes::default()).await.unwrap();
        assert_eq!(r.person_id, 1);
    }

    #[tokio::test]
    async fn test_forget_person() {
        let (store, _) = store().await;
        let resolver = IdentityResolver::default();
        store.resolve(resolver, axis(0), FaceAttributes::default()).await.unwrap();
        store.resolve(resolver, axis(1), FaceAttributes::default()).await.unwrap();
        assert_eq!(store.forget_person(1).await.unwrap(), 1);
        assert_eq!(store.forget_person(1).await.unwrap(), 0);
        assert_eq!(store.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_report_with_ledger_fallback() {
        let (store, clock) = store().await;
        let resolver = IdentityResolver::default();
        let aggregator = ReportAggregator::new(chrono::FixedOffset::east_opt(0).unwrap());

        let ledger_person = store.add_person("alice".into(), 3).await.unwrap();
        assert_eq!(ledger_person.person_id, 1);

        store.resolve(resolver, axis(0), male_adult()).await.unwrap();
        clock.advance(10 * MILLIS_PER_MINUTE);
        store
            .resolve(
                resolver,
                axis(1),
                FaceAttributes::new(Some(Gender::Female), Some(AgeGroup::Child), None),
            )
            .await
            .unwrap();

        let now = store.now_millis();
        let request = ReportRequest {
            camera_ids: vec!["camera1".into(), "camera2".into()],
            from: now - MILLIS_PER_MINUTE,
            to: now,
            fallback_to_latest: false,
        };
        let report = store.build_report(aggregator, request.clone()).await.unwrap();
        assert_eq!(report.len(), 2);
        let data = &report["camera1"].data;
        assert_eq!(data.total_head_count, 1);
        assert_eq!(data.gender_count.female, 1);
        assert_eq!(data.age_group.minor, 1);
        assert_eq!(report["camera1"].data, report["camera2"].data);

        let with_fallback = ReportRequest {
            fallback_to_latest: true,
            ..request
        };
        let report = store.build_report(aggregator, with_fallback).await.unwrap();
        let data = &report["camera1"].data;
        assert_eq!(data.total_head_count, 2);
        assert_eq!(data.gender_count.male, 1);
    }

    #[tokio::test]
    async fn test_person_ledger() {
        let (store, _) = store().await;
        store.add_person("alice".into(), 2).await.unwrap();
        let bob = store.add_person("bob".into(), 0).await.unwrap();
        assert_eq!(store.count_persons().await.unwrap(), 2);
        assert!(store.remove_person(bob.person_id).await.unwrap());
        assert!(!store.remove_person(bob.person_id).await.unwrap());
        let names: Vec<String> = store
            .persons()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.person_name)
            .collect();
        assert_eq!(names, vec!["alice".to_string()]);
        assert_eq!(store.clear_persons().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("headcount-{}-{nanos}", std::process::id()));
        let path = dir.join("gallery.db");
        let clock = Arc::new(ManualClock::new(NOW));
        let options = StoreOptions {
            dimension: DIM,
            clock: clock.clone(),
        };
        let resolver = IdentityResolver::default();

        let store = FaceStore::open(&path, options.clone()).await.unwrap();
        store.resolve(resolver, axis(0), male_adult()).await.unwrap();
        store.resolve(resolver, axis(1), male_adult()).await.unwrap();
        store.close().await.unwrap();

        let store = FaceStore::open(&path, options).await.unwrap();
        assert_eq!(store.count_total().await.unwrap(), 2);
        let again = store.resolve(resolver, axis(1), FaceAttributes::default()).await.unwrap();
        assert_eq!(again.person_id, 2);
        assert!(!again.is_new_identity);
        let next = store.resolve(resolver, axis(2), FaceAttributes::default()).await.unwrap();
        assert_eq!(next.person_id, 3);
        store.close().await.unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }
}
