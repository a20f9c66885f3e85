//! headcount-store: durable SQLite backing for the identity gallery and person ledger.
//!
//! Embeddings are stored as little-endian f32 blobs; nearest-neighbor search is an exact
//! scan ranked in process.

pub mod error;
pub mod gallery;
pub mod schema;
pub mod store;

pub use error::StoreError;
pub use gallery::{SqliteGallery, SqliteLedger};
pub use store::{default_db_path, FaceStore, StoreOptions};
