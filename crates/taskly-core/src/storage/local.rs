//! Local store lifecycle
//!
//! A single SQLite connection per installation, opened lazily on first use
//! and shared by every collection. The connection sits behind a mutex so all
//! operations are serialized. `close` and `wipe` are the only other lifecycle
//! operations; after `close` the next operation reopens the file.
//!
//! Files (inside the data directory):
//! - `taskly.db` - the database
//! - `taskly.db-wal`, `taskly.db-shm` - write-ahead log companions

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use rusqlite::Connection;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

use super::collection::{Collection, LocalRecord};
use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use crate::config::Config;

/// Where the database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    /// Private in-memory database, discarded on close
    Memory,
}

/// Retry policy for opening the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Total attempts before giving up
    pub retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * n`
    pub retry_delay: Duration,
    /// How long SQLite itself waits on a locked database per statement
    pub busy_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_millis(200),
            busy_timeout: Duration::from_millis(1000),
        }
    }
}

type SharedConnection = Arc<Mutex<Connection>>;

/// Process-wide handle to the local database
pub struct LocalStore {
    location: StoreLocation,
    options: OpenOptions,
    handle: RwLock<Option<SharedConnection>>,
}

impl LocalStore {
    pub fn new(location: StoreLocation, options: OpenOptions) -> Self {
        Self {
            location,
            options,
            handle: RwLock::new(None),
        }
    }

    /// Store at the configured database path with the configured retry policy
    pub fn from_config(config: &Config) -> Self {
        let options = OpenOptions {
            retries: config.store_open_retries,
            retry_delay: config.store_retry_delay(),
            ..OpenOptions::default()
        };
        Self::new(StoreLocation::File(config.database_path()), options)
    }

    /// In-memory store (useful for testing)
    pub fn in_memory() -> Self {
        Self::new(StoreLocation::Memory, OpenOptions::default())
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn is_open(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Typed view over one collection
    pub fn collection<T: LocalRecord>(&self) -> Collection<'_, T> {
        Collection::new(self)
    }

    /// Open the database if needed and return the shared connection
    ///
    /// Transient failures (lock contention, I/O) are retried with a linearly
    /// increasing delay; the final failure, or any non-transient failure, is
    /// returned to the caller.
    pub fn open(&self) -> StorageResult<SharedConnection> {
        if let Some(handle) = self
            .handle
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Ok(Arc::clone(handle));
        }

        let mut slot = self.handle.write().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let conn = self.open_with_retry()?;
        let handle = Arc::new(Mutex::new(conn));
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Run `f` with exclusive access to the connection
    pub(crate) fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let handle = self.open()?;
        let mut conn = lock(&handle);
        f(&mut conn)
    }

    /// Checkpoint the write-ahead log and release the connection
    ///
    /// Safe to call when already closed.
    pub fn close(&self) -> StorageResult<()> {
        let Some(handle) = self
            .handle
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            debug!("Local store already closed");
            return Ok(());
        };

        if matches!(self.location, StoreLocation::File(_)) {
            lock(&handle).execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }

        // Collections borrow the store, not the connection, so this is
        // normally the last reference.
        match Arc::try_unwrap(handle) {
            Ok(mutex) => {
                let conn = mutex.into_inner().unwrap_or_else(|e| e.into_inner());
                conn.close().map_err(|(_, e)| StorageError::Database(e))?;
            }
            Err(_) => debug!("Connection still in use, released by last holder"),
        }

        info!("Local store closed");
        Ok(())
    }

    /// Close the store and delete the database with its WAL companions
    ///
    /// Missing files are ignored.
    pub fn wipe(&self) -> StorageResult<()> {
        if let Err(e) = self.close() {
            warn!(error = %e, "Checkpoint before wipe failed, deleting anyway");
        }

        let StoreLocation::File(path) = &self.location else {
            return Ok(());
        };

        for file in [path.clone(), with_suffix(path, "-wal"), with_suffix(path, "-shm")] {
            match fs::remove_file(&file) {
                Ok(()) => debug!(path = ?file, "Removed store file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::from_io(e, file)),
            }
        }

        info!(path = ?path, "Local store wiped");
        Ok(())
    }

    fn open_with_retry(&self) -> StorageResult<Connection> {
        let attempts = self.options.retries.max(1);
        let mut attempt = 1;

        loop {
            match self.open_connection() {
                Ok(conn) => {
                    info!(location = ?self.location, attempt, "Local store opened");
                    return Ok(conn);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.options.retry_delay * attempt;
                    warn!(attempt, error = %e, ?delay, "Opening local store failed, retrying");
                    retry_pause(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Local store could not be opened");
                    return Err(e);
                }
            }
        }
    }

    fn open_connection(&self) -> StorageResult<Connection> {
        let path = match &self.location {
            StoreLocation::Memory => {
                let conn = Connection::open_in_memory()?;
                init_schema(&conn)?;
                return Ok(conn);
            }
            StoreLocation::File(path) => path,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let classify = |e: rusqlite::Error| StorageError::from_open(e, path.clone());

        let conn = Connection::open(path).map_err(classify)?;
        conn.busy_timeout(self.options.busy_timeout)
            .map_err(classify)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(classify)?;

        if needs_init(&conn) {
            init_schema(&conn).map_err(classify)?;
        }

        Ok(conn)
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close local store");
        }
    }
}

/// Wait between open attempts
///
/// A lazy reopen after `close` can run inside an async coordinator call. On a
/// multi-threaded runtime the worker's other tasks move to another thread for
/// the duration of the pause.
fn retry_pause(delay: Duration) {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| std::thread::sleep(delay))
        }
        _ => std::thread::sleep(delay),
    }
}

fn lock(handle: &SharedConnection) -> MutexGuard<'_, Connection> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
