//! Schema creation and versioned migrations, tracked in `PRAGMA user_version`.

use rusqlite::Connection;

pub const SCHEMA_VERSION: usize = 1;

/// Name of the person-id row in `sequences`.
pub const PERSON_SEQUENCE: &str = "person_id";

const SCHEMA_V1: &str = r"
CREATE TABLE IF NOT EXISTS face_records (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id     INTEGER NOT NULL,
    person_name   TEXT    NOT NULL,
    embedding     BLOB    NOT NULL,
    dimension     INTEGER NOT NULL,
    model_version TEXT,
    gender        TEXT,
    age_group     TEXT,
    expression    TEXT,
    created_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_face_records_person_id ON face_records (person_id);
CREATE INDEX IF NOT EXISTS idx_face_records_created_at ON face_records (created_at);

CREATE TABLE IF NOT EXISTS sequences (
    name  TEXT    PRIMARY KEY,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO sequences (name, value) VALUES ('person_id', 0);

CREATE TABLE IF NOT EXISTS persons (
    person_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    person_name TEXT    NOT NULL,
    num_images  INTEGER NOT NULL DEFAULT 0,
    add_time    INTEGER NOT NULL
);
";

/// Bring the database up to [`SCHEMA_VERSION`]. Returns the version found before migrating.
pub fn migrate(conn: &Connection) -> rusqlite::Result<usize> {
    let version: usize = conn.query_row("SELECT user_version FROM pragma_user_version", [], |row| {
        row.get(0)
    })?;

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
        tracing::info!(from = version, to = 1, "migrated gallery schema");
    }

    Ok(version)
}
