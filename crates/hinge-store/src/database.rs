use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema;

/// Shared handle to the session snapshot database. Clones share one
/// connection; every statement runs under its mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open the snapshot file at `path`, creating it and any missing parent
    /// directories. Fails on a file written by a newer schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Io(format!("{}: {e}", dir.display())))?;
        }
        let conn = Connection::open(path)?;
        let version = prepare(&conn)?;
        info!(path = %path.display(), schema_version = version, "session database opened");
        Ok(Self::wrap(conn, path.to_owned()))
    }

    /// Private database that disappears with the handle.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        prepare(&conn)?;
        Ok(Self::wrap(conn, PathBuf::from(":memory:")))
    }

    fn wrap(conn: Connection, path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        }
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(|conn| stored_version(conn)?.ok_or_else(|| StoreError::NotFound("schema version".into())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Apply pragmas and tables, stamp the version on a fresh file, and refuse
/// snapshots this build cannot read. Returns the stored version.
fn prepare(conn: &Connection) -> Result<u32, StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("create tables: {e}")))?;

    match stored_version(conn)? {
        Some(found) if found > schema::SCHEMA_VERSION => Err(StoreError::Database(format!(
            "session snapshots use schema v{found}, this build reads up to v{}",
            schema::SCHEMA_VERSION
        ))),
        Some(found) => Ok(found),
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [schema::SCHEMA_VERSION])?;
            debug!(version = schema::SCHEMA_VERSION, "stamped fresh session database");
            Ok(schema::SCHEMA_VERSION)
        }
    }
}

fn stored_version(conn: &Connection) -> Result<Option<u32>, StoreError> {
    Ok(conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get::<_, Option<u32>>(0))
        .optional()?
        .flatten())
}
