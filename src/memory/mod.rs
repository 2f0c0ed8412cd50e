// src/memory/mod.rs — Persistent store: SQLite-backed session history

pub mod lease;
pub mod schema;
pub mod store;

use rusqlite::Connection;
use std::path::Path;

/// Open (or create) the database at the given path and bring its schema up to date.
pub fn open(path: &Path) -> anyhow::Result<store::Store> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    // WAL lets readers (history, sessions) proceed while a loop is writing.
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    schema::run_migrations(&conn)?;

    Ok(store::Store::new(conn))
}

/// Create an in-memory database (for testing).
pub fn in_memory() -> anyhow::Result<store::Store> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::run_migrations(&conn)?;
    Ok(store::Store::new(conn))
}
