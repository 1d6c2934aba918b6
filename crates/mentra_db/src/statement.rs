//! Prepared statement cache for write paths.
//!
//! Templates are keyed by their SQL text. A lease marks a template as bound
//! until it is dropped, so a panic or early `?` return inside a write still
//! releases it. sqlx keeps the actual prepared handle per connection when a
//! query is marked persistent; this cache decides which templates deserve
//! that slot and keeps two callers from binding the same template at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;
use tracing::trace;

#[derive(Debug)]
struct CachedStatement {
    sql: Arc<str>,
    leased: AtomicBool,
    uses: AtomicU64,
}

/// Cache of write statement templates.
#[derive(Debug)]
pub struct StatementCache {
    entries: Mutex<HashMap<Arc<str>, Arc<CachedStatement>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    transient: AtomicU64,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementStats {
    pub cached: usize,
    pub hits: u64,
    pub misses: u64,
    pub transient: u64,
}

/// A statement checked out of the cache. Dropping it releases the template.
#[derive(Debug)]
pub struct StatementLease {
    entry: Arc<CachedStatement>,
    transient: bool,
}

impl StatementLease {
    pub fn sql(&self) -> &str {
        &self.entry.sql
    }

    /// Whether this lease bypasses the shared prepared statement.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Start a query on the leased template. Cached leases reuse the
    /// connection's prepared statement; transient ones are prepared fresh.
    pub fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        sqlx::query(&self.entry.sql).persistent(!self.transient)
    }
}

impl Drop for StatementLease {
    fn drop(&mut self) {
        if !self.transient {
            self.entry.leased.store(false, Ordering::Release);
        }
    }
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            transient: AtomicU64::new(0),
        }
    }

    /// Check out the template for `sql`, preparing a cache slot on first use.
    ///
    /// If the template is already leased the caller gets a transient lease
    /// instead of sharing the binding.
    pub fn acquire(&self, sql: &str) -> StatementLease {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(sql) {
            entry.uses.fetch_add(1, Ordering::Relaxed);
            let free = entry
                .leased
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if free {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return StatementLease {
                    entry: entry.clone(),
                    transient: false,
                };
            }
            self.transient.fetch_add(1, Ordering::Relaxed);
            trace!("statement already leased, using transient copy");
            return StatementLease {
                entry: Arc::new(CachedStatement {
                    sql: entry.sql.clone(),
                    leased: AtomicBool::new(true),
                    uses: AtomicU64::new(1),
                }),
                transient: true,
            };
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if entries.len() >= self.capacity {
            Self::evict_one(&mut entries);
        }

        let sql: Arc<str> = Arc::from(sql);
        let entry = Arc::new(CachedStatement {
            sql: sql.clone(),
            leased: AtomicBool::new(true),
            uses: AtomicU64::new(1),
        });
        entries.insert(sql, entry.clone());
        StatementLease {
            entry,
            transient: false,
        }
    }

    /// Explicit release; equivalent to dropping the lease.
    pub fn release(&self, lease: StatementLease) {
        drop(lease);
    }

    /// Drop the least-used template that is not currently leased.
    fn evict_one(entries: &mut HashMap<Arc<str>, Arc<CachedStatement>>) {
        let victim = entries
            .iter()
            .filter(|(_, e)| !e.leased.load(Ordering::Acquire))
            .min_by_key(|(_, e)| e.uses.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            trace!(sql = %key, "evicting statement template");
            entries.remove(&key);
        }
    }

    pub fn stats(&self) -> StatementStats {
        StatementStats {
            cached: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            transient: self.transient.load(Ordering::Relaxed),
        }
    }

    /// Number of templates currently checked out.
    pub fn leased(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.leased.load(Ordering::Acquire))
            .count()
    }
}
