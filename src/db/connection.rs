use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::db::legacy::{self, ReconcileReport};
use crate::db::migration_runner::MigrationRunner;
use crate::error::Result;
use crate::models::JournalEvent;

const EVENT_CAPACITY: usize = 64;

pub struct Database {
    pub conn: Mutex<Connection>,
    symbol: String,
    data_version: AtomicU64,
    events: broadcast::Sender<JournalEvent>,
}

impl Database {
    /// Opens the journal at `db_path`, bringing its schema up to date.
    ///
    /// Trades are scoped to `symbol`; rows for other instruments stay in the
    /// table but are never returned.
    pub fn open(db_path: &str, symbol: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL lets readers in other processes proceed during writes
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::initialize(conn, db_path, symbol)
    }

    pub fn open_in_memory(symbol: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, ":memory:", symbol)
    }

    fn initialize(conn: Connection, db_path: &str, symbol: &str) -> Result<Self> {
        let runner = MigrationRunner::new();

        log::info!("=== Starting database migration check ===");

        let applied = runner.run_pending_migrations(&conn, db_path)?;
        if applied > 0 {
            log::info!("Applied {} migrations successfully", applied);
        } else {
            log::info!("Database schema is up to date");
        }

        runner.verify_migrations(&conn)?;

        if let Some(version) = runner.get_current_version(&conn)? {
            log::info!("Final schema version: {}", version);
        }

        log::info!("=== Migration check complete ===");

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Database {
            conn: Mutex::new(conn),
            symbol: symbol.to_string(),
            data_version: AtomicU64::new(0),
            events,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Re-runs legacy reconciliation. Safe at any time; a current schema is a no-op.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let conn = self.conn.lock()?;
        legacy::reconcile_trades(&conn)
    }

    pub fn data_version(&self) -> u64 {
        self.data_version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JournalEvent> {
        self.events.subscribe()
    }

    /// Marks previously served views as stale after a write
    pub(crate) fn notify_trades_changed(&self, trade_id: i64) -> u64 {
        let data_version = self.data_version.fetch_add(1, Ordering::SeqCst) + 1;

        // No subscribers is fine; nobody holds a stale view
        let _ = self.events.send(JournalEvent::TradesChanged {
            trade_id,
            data_version,
        });

        data_version
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("symbol", &self.symbol)
            .field("data_version", &self.data_version())
            .finish()
    }
}

/// Opens an in-memory store for tests, panicking on failure
#[cfg(test)]
pub(crate) fn test_database() -> Database {
    Database::open_in_memory("XAUUSD").expect("in-memory database")
}
