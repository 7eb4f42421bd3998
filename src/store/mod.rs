//! Component D — Schema & Spatial Store.
//!
//! Owns the single `rusqlite::Connection`, loads the SpatiaLite extension
//! at open time (the "first-class part of the store's `open` protocol"
//! from spec.md §9), and bootstraps the eight-table schema from
//! `migrations/schema.sql`.

pub mod bounds;
pub mod query;
pub mod writer;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{OsmIntileError, Result};

const SCHEMA_SQL: &str = include_str!("../../migrations/schema.sql");

/// Candidate `(library, entry point)` pairs tried in order until one
/// loads, mirroring the original Go driver's `spatialliteLibNames` table.
const SPATIALITE_CANDIDATES: &[(&str, &str)] = &[
    ("mod_spatialite", "sqlite3_modspatialite_init"),
    ("mod_spatialite.dylib", "sqlite3_modspatialite_init"),
    ("libspatialite.so", "sqlite3_modspatialite_init"),
    ("libspatialite.so.5", "spatialite_init_ex"),
    ("libspatialite.so", "spatialite_init_ex"),
];

/// A process-wide, shared read/write handle onto the spatial store,
/// serialised by a mutex per spec.md §5 ("serialised by the store's own
/// lock"). Cloning shares the same underlying connection.
#[derive(Clone)]
pub struct SpatialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SpatialStore {
    /// Opens a file-backed or in-memory (`:memory:`) database, loads the
    /// spatial extension, and bootstraps the schema.
    pub fn open(path: &str) -> Result<Self> {
        let mut conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        load_spatial_extension(&mut conn)?;
        bootstrap_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

fn load_spatial_extension(conn: &mut Connection) -> Result<()> {
    // Safety: `load_extension` only runs for the lifetime of this call and
    // the candidate libraries are a fixed, trusted allowlist.
    unsafe {
        let guard = conn.load_extension_enable();
        if guard.is_err() {
            return Err(OsmIntileError::SpatialExtensionMissing);
        }

        for (library, entry_point) in SPATIALITE_CANDIDATES {
            if conn
                .load_extension(library, Some(entry_point))
                .is_ok()
            {
                let _ = conn.load_extension_disable();
                return Ok(());
            }
        }
    }

    let _ = conn.load_extension_disable();
    Err(OsmIntileError::SpatialExtensionMissing)
}

fn bootstrap_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_SQL.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        conn.execute(statement, [])?;
    }

    if !has_column(conn, "node", "geom")? {
        conn.execute(
            "SELECT AddGeometryColumn('node', 'geom', 4326, 'POINT', 'XY')",
            [],
        )?;
        conn.execute("SELECT CreateSpatialIndex('node', 'geom')", [])?;
    }

    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_store_and_bootstraps_schema() {
        let store = SpatialStore::open(":memory:").unwrap();
        let conn = store.connection();
        let conn = conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM node", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
