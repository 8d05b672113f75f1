use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub mod anomaly;
pub mod events;
pub mod learning;
pub mod notifications;
pub mod patterns;
pub mod predictions;
pub mod rules;
pub mod scenes;
pub mod schedule;
pub mod schema;

pub fn init_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // Enable WAL mode so background readers never block the writer
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"NORMAL")?;
    conn.pragma_update(None, "foreign_keys", &"ON")?;

    schema::create_tables(&conn)?;

    Ok(conn)
}

/// Open a connection for a single operation. The schema is assumed to exist.
pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "foreign_keys", &"ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    schema::create_tables(&conn).expect("schema");
    conn
}
