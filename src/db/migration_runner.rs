use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::db::legacy;
use crate::error::{JournalError, Result};

/// Number of pre-migration backups kept next to the database
const MAX_BACKUPS: usize = 5;

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration {
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn new(version: u32, name: &'static str, sql: &'static str) -> Self {
        Self { version, name, sql }
    }
}

pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self {
            migrations: Self::collect_migrations(),
        }
    }

    fn collect_migrations() -> Vec<Migration> {
        vec![
            Migration::new(
                0,
                "bootstrap",
                include_str!("migrations/000_bootstrap.sql"),
            ),
            Migration::new(
                1,
                "create_trades",
                include_str!("migrations/001_create_trades.sql"),
            ),
            Migration::new(
                2,
                "add_trade_date_index",
                include_str!("migrations/002_add_trade_date_index.sql"),
            ),
        ]
    }

    pub fn run_pending_migrations(&self, conn: &Connection, db_path: &str) -> Result<usize> {
        let has_history = self.has_schema_migrations_table(conn)?;
        let latest = self.migrations.last().map_or(0, |m| m.version);
        let behind = self.get_current_version(conn)?.is_none_or(|v| v < latest);

        // Legacy bootstrap rewrites the trades table, so the copy is taken first
        let backup_path = if behind && db_path != ":memory:" && self.has_trades_table(conn)? {
            let path = self.create_backup(db_path, latest)?;
            log::info!("Backup created: {}", path.display());
            Some(path)
        } else {
            None
        };

        // Databases without a migration history are either fresh or legacy
        if !has_history {
            log::info!("No migration history found - bootstrapping migration system");
            if let Err(e) = self.bootstrap_legacy_schema(conn) {
                log::error!("Legacy bootstrap failed: {}", e);
                if let Some(path) = &backup_path {
                    log::error!("Backup available at: {}", path.display());
                }
                return Err(e);
            }
        }

        let current_version = self.get_current_version(conn)?;
        log::info!("Current schema version: {:?}", current_version);

        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| match current_version {
                Some(v) => m.version > v,
                None => m.version > 0,
            })
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        log::info!("Found {} pending migrations", pending.len());

        let mut applied = 0;
        for migration in pending {
            if let Err(e) = self.apply_migration(conn, migration) {
                log::error!("Migration {} failed: {}", migration.version, e);
                log::error!("Migration stopped. Database rolled back to before this migration.");
                if let Some(path) = &backup_path {
                    log::error!("Backup available at: {}", path.display());
                }
                return Err(e);
            }
            applied += 1;
            log::info!("Applied migration {}: {}", migration.version, migration.name);
        }

        Ok(applied)
    }

    fn apply_migration(&self, conn: &Connection, migration: &Migration) -> Result<()> {
        let start = SystemTime::now();

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;

        let execution_time = start
            .elapsed()
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, notes)
             VALUES (?, ?, ?, ?, ?, NULL)",
            params![
                migration.version,
                migration.name,
                current_timestamp(),
                migration.checksum(),
                execution_time
            ],
        )?;

        tx.commit()?;

        log::debug!("Applied migration {} in {}ms", migration.name, execution_time);

        Ok(())
    }

    /// Fails when an applied migration's SQL no longer matches what was run
    pub fn verify_migrations(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT version, name, checksum FROM schema_migrations WHERE checksum IS NOT NULL ORDER BY version",
        )?;

        let applied: Vec<(u32, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (version, name, stored_checksum) in applied {
            if let Some(migration) = self.migrations.iter().find(|m| m.version == version) {
                let expected_checksum = migration.checksum();
                if stored_checksum != expected_checksum {
                    log::error!("Checksum mismatch for migration {} ({})", version, name);
                    log::error!("Expected: {}", expected_checksum);
                    log::error!("Actual:   {}", stored_checksum);
                    return Err(JournalError::Migration(format!(
                        "migration {} ({}) was modified after it was applied",
                        version, name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn get_current_version(&self, conn: &Connection) -> Result<Option<u32>> {
        if !self.has_schema_migrations_table(conn)? {
            return Ok(None);
        }

        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        Ok(version)
    }

    fn create_backup(&self, db_path: &str, target_version: u32) -> Result<PathBuf> {
        let db_dir = Path::new(db_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let backup_dir = db_dir.join("backups");

        fs::create_dir_all(&backup_dir).map_err(|e| {
            JournalError::Migration(format!("Failed to create backup directory: {}", e))
        })?;

        let backup_name = format!("pre_migration_v{}_{}.db", target_version, current_timestamp());
        let backup_path = backup_dir.join(&backup_name);

        let src = Connection::open(db_path)?;
        let mut dst = Connection::open(&backup_path)?;

        {
            let backup = rusqlite::backup::Backup::new(&src, &mut dst)?;
            backup.run_to_completion(5, Duration::from_millis(250), None)?;
        }

        let metadata = fs::metadata(&backup_path)
            .map_err(|e| JournalError::Migration(format!("Failed to verify backup: {}", e)))?;
        if metadata.len() == 0 {
            return Err(JournalError::Migration("Backup file is empty".to_string()));
        }

        let integrity: String = dst.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if integrity != "ok" {
            return Err(JournalError::Migration(format!(
                "Backup integrity check failed: {}",
                integrity
            )));
        }

        log::info!(
            "Backup created successfully: {} ({:.2} MB)",
            backup_path.display(),
            metadata.len() as f64 / 1_048_576.0
        );

        self.cleanup_old_backups(&backup_dir);

        Ok(backup_path)
    }

    fn cleanup_old_backups(&self, backup_dir: &Path) {
        let entries = match fs::read_dir(backup_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to read backup directory: {}", e);
                return;
            }
        };

        let mut backups: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.path().extension().and_then(|s| s.to_str()) == Some("db")
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|s| s.starts_with("pre_migration_"))
            })
            .collect();

        // Oldest first
        backups.sort_by_key(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        });

        if backups.len() > MAX_BACKUPS {
            for entry in backups.iter().take(backups.len() - MAX_BACKUPS) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    log::warn!("Failed to delete old backup: {}", e);
                }
            }
        }
    }

    fn has_schema_migrations_table(&self, conn: &Connection) -> Result<bool> {
        self.table_exists(conn, "schema_migrations")
    }

    fn has_trades_table(&self, conn: &Connection) -> Result<bool> {
        self.table_exists(conn, "trades")
    }

    fn table_exists(&self, conn: &Connection, table: &str) -> Result<bool> {
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn bootstrap_legacy_schema(&self, conn: &Connection) -> Result<()> {
        let legacy_version = self.detect_legacy_version(conn)?;
        log::info!("Detected legacy schema version: {}", legacy_version);

        if legacy_version > 0 {
            legacy::reconcile_trades(conn)?;
        }

        self.apply_migration(conn, &self.migrations[0])?;

        // Reconciliation may rebuild the table, dropping its indexes; every
        // legacy migration is IF NOT EXISTS, so re-running restores them
        let now = current_timestamp();
        for version in 1..=legacy_version {
            let migration = &self.migrations[version as usize];
            conn.execute_batch(migration.sql)?;
            conn.execute(
                "INSERT INTO schema_migrations (version, name, applied_at, checksum, execution_time_ms, notes)
                 VALUES (?, ?, ?, NULL, 0, 'Legacy migration - detected via introspection')",
                params![version, migration.name, now],
            )?;
            log::info!("Marked legacy migration {} as applied", migration.name);
        }

        self.validate_schema_integrity(conn)?;

        log::info!("Legacy schema bootstrap complete");

        Ok(())
    }

    fn detect_legacy_version(&self, conn: &Connection) -> Result<u32> {
        let index_count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_trades_symbol_trade_date'",
            [],
            |row| row.get(0),
        )?;
        if index_count > 0 {
            return Ok(2);
        }

        if self.has_trades_table(conn)? {
            return Ok(1);
        }

        Ok(0)
    }

    fn validate_schema_integrity(&self, conn: &Connection) -> Result<()> {
        let integrity: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
        if integrity != "ok" {
            return Err(JournalError::Migration(format!(
                "Schema integrity check failed: {}",
                integrity
            )));
        }
        Ok(())
    }
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
