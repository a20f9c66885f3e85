use headcount_core::GalleryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database connection: {0}")]
    Connection(#[from] tokio_rusqlite::Error),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
