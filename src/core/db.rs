use crate::core::error::GateLedgerError;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::Path;

pub fn db_connect(db_path: &Path) -> Result<Connection, GateLedgerError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Opens the host database, creating the file and its tables on first use.
pub fn initialize_host_db(db_path: &Path) -> Result<Connection, GateLedgerError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let conn = db_connect(db_path)?;
    for stmt in schemas::HOST_DB_SCHEMA {
        conn.execute(stmt, [])?;
    }
    Ok(conn)
}
