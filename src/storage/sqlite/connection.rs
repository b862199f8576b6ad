//! Shared connection handling for `SQLite` backends.
//!
//! Each backend owns one `Mutex<Connection>`; these helpers open, configure
//! and lock it consistently.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (a panic in a previous critical section), the
/// inner value is recovered and a warning is logged. The connection itself is
/// still valid because `SQLite` rolls back any open transaction.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection for concurrent use.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with throughput
/// - **`busy_timeout`**: waits up to 5 seconds on lock contention
/// - **`foreign_keys`**: on
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if pragma configuration fails.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so it cannot go through execute_batch
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| Error::operation("configure_connection", e))?;
    conn.pragma_update(None, "busy_timeout", "5000")
        .map_err(|e| Error::operation("configure_connection", e))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::operation("configure_connection", e))?;
    Ok(())
}

/// Opens and configures a connection at `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the directory or database cannot be
/// created.
pub fn open_connection(path: &Path, operation: &'static str) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::operation(operation, e))?;
    }
    let conn = Connection::open(path).map_err(|e| Error::operation(operation, e))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Opens and configures a private in-memory connection.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the connection cannot be opened.
pub fn open_in_memory(operation: &'static str) -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| Error::operation(operation, e))?;
    configure_connection(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    *acquire_lock(&mutex) += 1;
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*acquire_lock(&mutex), 10);
    }

    #[test]
    fn test_acquire_lock_recovers_poison() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex), 1);
    }

    #[test]
    fn test_open_connection_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        let conn = open_connection(&path, "open_test").unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
        assert!(path.exists());
    }
}
