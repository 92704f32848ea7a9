//! Connection lifecycle for embedded database files.
//!
//! Handles are opened read-only, cached per path, fingerprinted by file
//! modification time, and reclaimed by an idle sweep. A file modified on
//! disk invalidates its cached handle transparently on next access.

use crate::{Error, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant, UNIX_EPOCH};

/// Helper to acquire a mutex lock with poison recovery.
///
/// If the mutex is poisoned (a panic in a previous critical section), we
/// recover the inner value and log a warning. The connection state itself
/// is still valid; refusing all further queries would be worse.
pub(crate) fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("connection mutex was poisoned, recovering");
            metrics::counter!("tabserve_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Returns a file's modification time as nanoseconds since the Unix epoch.
///
/// This doubles as the result-cache invalidation key: any write to the file
/// bumps it, which both reopens the handle and invalidates cached results.
pub fn file_fingerprint(path: &Path) -> Result<u128> {
    let meta = std::fs::metadata(path).map_err(|e| Error::internal("stat_database", &e))?;
    let mtime = meta
        .modified()
        .map_err(|e| Error::internal("stat_database", &e))?;
    Ok(mtime
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos())
}

/// An open, read-only connection to one database file.
///
/// Owned exclusively by the [`ConnectionManager`]; queries borrow the inner
/// connection through [`DatabaseHandle::with_conn`].
pub struct DatabaseHandle {
    /// Path of the underlying file.
    path: PathBuf,
    /// The open connection, serialized behind a mutex.
    conn: Mutex<Connection>,
    /// File modification fingerprint captured at open time.
    fingerprint: u128,
    /// Last access, for the idle sweep.
    last_access: Mutex<Instant>,
    /// Number of times this handle has been handed out.
    access_count: AtomicU64,
}

impl DatabaseHandle {
    fn open(path: &Path, statement_cache_capacity: usize) -> Result<Self> {
        let fingerprint = file_fingerprint(path)?;
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| Error::internal("open_database", &e))?;

        // Performance pragmas, applied once at open time. journal_mode is a
        // no-op on a read-only handle unless the file is already WAL; both
        // outcomes are fine, so the results are ignored.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "mmap_size", 268_435_456_i64);
        let _ = conn.pragma_update(None, "cache_size", -64_000_i64);
        let _ = conn.pragma_update(None, "query_only", "ON");

        conn.set_prepared_statement_cache_capacity(statement_cache_capacity);
        register_regexp(&conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            fingerprint,
            last_access: Mutex::new(Instant::now()),
            access_count: AtomicU64::new(0),
        })
    }

    /// Runs a closure against the inner connection.
    ///
    /// # Errors
    ///
    /// Propagates whatever the closure returns.
    pub fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = acquire_lock(&self.conn);
        f(&conn)
    }

    /// Path of the underlying database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File modification fingerprint captured when this handle was opened.
    #[must_use]
    pub const fn fingerprint(&self) -> u128 {
        self.fingerprint
    }

    /// Number of times this handle has been handed out.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        *acquire_lock(&self.last_access) = Instant::now();
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        acquire_lock(&self.last_access).elapsed()
    }
}

// The raw connection carries no useful Debug output; show the handle's
// identity and freshness instead.
impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("path", &self.path)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Registers a `REGEXP` scalar function backed by the `regex` crate.
///
/// `SQLite` defines the `REGEXP` operator but ships no implementation; the
/// `regex` filter operator depends on this registration.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<regex::Regex> = ctx.get_or_create_aux(0, |vr| {
                regex::Regex::new(vr.as_str()?)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
            })?;
            let text = ctx
                .get_raw(1)
                .as_str_or_null()
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(text.is_some_and(|t| pattern.is_match(t)))
        },
    )
    .map_err(|e| Error::internal("register_regexp", &e))
}

/// Opens, caches, and expires read-only handles to database files.
///
/// # Thread Safety
///
/// The handle cache is behind an `RwLock` because concurrent HTTP requests
/// may race to open or evict the same path. Individual connections carry
/// their own mutex.
pub struct ConnectionManager {
    handles: RwLock<HashMap<PathBuf, Arc<DatabaseHandle>>>,
    lifespan: Duration,
    statement_cache_capacity: usize,
}

impl ConnectionManager {
    /// Creates a manager that closes handles idle longer than `lifespan`.
    #[must_use]
    pub fn new(lifespan: Duration, statement_cache_capacity: usize) -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
            lifespan,
            statement_cache_capacity,
        }
    }

    /// Returns a live handle for `path`, opening or reopening as needed.
    ///
    /// On every call the file's current modification time is compared
    /// against the fingerprint recorded at open time; a mismatch closes the
    /// stale handle and opens a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file does not exist, or
    /// [`Error::Internal`] if it cannot be opened.
    pub fn handle(&self, path: &Path) -> Result<Arc<DatabaseHandle>> {
        if !path.is_file() {
            return Err(Error::NotFound {
                what: "database",
                name: path.display().to_string(),
            });
        }
        let current = file_fingerprint(path)?;

        {
            let handles = self.handles.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(handle) = handles.get(path) {
                if handle.fingerprint() == current {
                    handle.touch();
                    return Ok(Arc::clone(handle));
                }
            }
        }

        let mut handles = self.handles.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        // Another request may have reopened while we waited for the write lock.
        if let Some(handle) = handles.get(path) {
            if handle.fingerprint() == current {
                handle.touch();
                return Ok(Arc::clone(handle));
            }
            tracing::info!(path = %path.display(), "database file changed, reopening handle");
            metrics::counter!("tabserve_connection_reopen_total").increment(1);
        }

        let handle = Arc::new(DatabaseHandle::open(path, self.statement_cache_capacity)?);
        handle.touch();
        handles.insert(path.to_path_buf(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Closes handles idle longer than the configured lifespan.
    ///
    /// Returns how many were reclaimed. Run on a fixed interval by
    /// [`Self::spawn_sweeper`].
    pub fn sweep_idle(&self) -> usize {
        let mut handles = self.handles.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = handles.len();
        handles.retain(|_, h| h.idle_for() <= self.lifespan);
        let reclaimed = before - handles.len();
        if reclaimed > 0 {
            tracing::info!(reclaimed, "closed idle database handles");
            metrics::counter!("tabserve_connection_sweep_total").increment(reclaimed as u64);
        }
        reclaimed
    }

    /// Spawns the periodic idle sweep on the tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep_idle();
            }
        })
    }

    /// Closes every cached handle. For process shutdown.
    pub fn close_all(&self) {
        let mut handles = self.handles.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let closed = handles.len();
        handles.clear();
        if closed > 0 {
            tracing::info!(closed, "closed all database handles");
        }
    }

    /// Number of currently cached handles.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}
