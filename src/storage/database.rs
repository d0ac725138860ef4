//! SQLite Report Store
//!
//! - Connection pooling via r2d2
//! - One `report_sessions` row per (session, user) holding JSON state
//! - `update_exclusive` runs inside `BEGIN IMMEDIATE`, taking the write lock
//!   before the row is read
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};

use crate::report::analysis::AnalysisSnapshot;
use crate::report::store::{RecordMutation, ReportStore, SessionRecord, session_not_found};
use crate::types::{DossierError, Result, ResultExt, SessionId, UserId};

pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS report_sessions (
    session_id    TEXT NOT NULL,
    user_id       TEXT NOT NULL,
    analysis_json TEXT NOT NULL,
    report_json   TEXT,
    report_status TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (session_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_report_sessions_user
    ON report_sessions(user_id, updated_at);
"#;

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Add report_status column",
        up: "ALTER TABLE report_sessions ADD COLUMN report_status TEXT",
    },
    Migration {
        version: 2,
        description: "Add per-user index",
        up: "CREATE INDEX IF NOT EXISTS idx_report_sessions_user
                 ON report_sessions(user_id, updated_at)",
    },
];

/// Connection pool sizing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: u32,
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 2;
    const MAX_POOL_SIZE: u32 = 16;

    /// clamp(cores, MIN, MAX); report writes are serialized by SQLite anyway
    pub fn auto() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        let max_size = cores.clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE);
        Self {
            max_size,
            min_idle: 1,
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

/// Pooled SQLite database implementing [`ReportStore`]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (creating parent directories) and initialize the schema
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(Self::configure_connection);
        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| DossierError::Storage(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    /// Single-connection in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| DossierError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            DossierError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Create the schema on a fresh database, migrate an older one
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")?;

        if current_version == 0 {
            conn.execute_batch(SCHEMA)
                .with_context("Failed to initialize database schema")?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
            return Ok(());
        }

        drop(conn);
        self.migrate(current_version)
    }

    fn migrate(&self, current_version: u32) -> Result<()> {
        let conn = self.conn()?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
            conn.execute_batch(migration.up).with_context_fn(|| {
                format!(
                    "Failed to apply migration {}: {}",
                    migration.version, migration.description
                )
            })?;
            tracing::info!(
                "Applied migration {}: {}",
                migration.version,
                migration.description
            );
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")
    }

    /// Run `f` inside an immediate transaction, rolling back on error or panic
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Rolled back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(DossierError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    // =========================================================================
    // Row Access
    // =========================================================================

    fn read_record(
        conn: &Connection,
        session: &SessionId,
        user: &UserId,
    ) -> Result<Option<SessionRecord>> {
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT analysis_json, report_json FROM report_sessions
                 WHERE session_id = ?1 AND user_id = ?2",
                params![session.as_str(), user.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((analysis_json, report_json)) = row else {
            return Ok(None);
        };
        Ok(Some(SessionRecord {
            analysis: serde_json::from_str(&analysis_json)?,
            report: report_json
                .map(|json| serde_json::from_str(&json))
                .transpose()?,
        }))
    }

    fn write_record(
        conn: &Connection,
        session: &SessionId,
        user: &UserId,
        record: &SessionRecord,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let analysis_json = serde_json::to_string(&record.analysis)?;
        let report_json = record
            .report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let report_status = record.report.as_ref().map(|r| r.status.as_str());

        conn.execute(
            "INSERT INTO report_sessions
                 (session_id, user_id, analysis_json, report_json, report_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(session_id, user_id) DO UPDATE SET
                 analysis_json = excluded.analysis_json,
                 report_json = excluded.report_json,
                 report_status = excluded.report_status,
                 updated_at = excluded.updated_at",
            params![
                session.as_str(),
                user.as_str(),
                analysis_json,
                report_json,
                report_status,
                now
            ],
        )
        .with_context("Failed to write report session")?;
        Ok(())
    }

    /// Session ids with a stored record for `user`, most recently updated first
    pub fn list_sessions(&self, user: &UserId) -> Result<Vec<SessionId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM report_sessions WHERE user_id = ?1 ORDER BY updated_at DESC",
        )?;
        let ids = stmt
            .query_map(params![user.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(SessionId::from).collect())
    }
}

impl ReportStore for Database {
    fn load(&self, session: &SessionId, user: &UserId) -> Result<Option<SessionRecord>> {
        let conn = self.conn()?;
        Self::read_record(&conn, session, user)
    }

    fn save(&self, session: &SessionId, user: &UserId, record: &SessionRecord) -> Result<()> {
        let conn = self.conn()?;
        Self::write_record(&conn, session, user, record)
    }

    fn put_analysis(
        &self,
        session: &SessionId,
        user: &UserId,
        analysis: AnalysisSnapshot,
    ) -> Result<()> {
        self.transaction(|tx| {
            let record = match Self::read_record(tx, session, user)? {
                Some(mut existing) => {
                    existing.analysis = analysis;
                    existing
                }
                None => SessionRecord::new(analysis),
            };
            Self::write_record(tx, session, user, &record)
        })
    }

    fn update_exclusive(
        &self,
        session: &SessionId,
        user: &UserId,
        mutate: &mut RecordMutation<'_>,
    ) -> Result<SessionRecord> {
        self.transaction(|tx| {
            let mut record =
                Self::read_record(tx, session, user)?.ok_or_else(|| session_not_found(session))?;
            mutate(&mut record)?;
            Self::write_record(tx, session, user, &record)?;
            Ok(record)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::store::update_with;
    use crate::report::types::{ReportState, ReportStatus};
    use crate::types::PreconditionError;

    fn ids() -> (SessionId, UserId) {
        (SessionId::from("s1"), UserId::from("u1"))
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);

        let conn = db.conn().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert!(tables.contains(&"report_sessions".to_string()));
    }

    #[test]
    fn test_transaction_panic_safety() {
        let db = Database::open_in_memory().expect("Failed to open database");

        let result: Result<()> = db.transaction(|_tx| {
            panic!("Intentional panic for testing");
        });
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("panicked"));

        assert!(db.conn().is_ok(), "pool should survive a panicking transaction");
    }

    #[test]
    fn test_record_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reports.db");
        let (session, user) = ids();

        {
            let db = Database::open(&path).unwrap();
            db.put_analysis(&session, &user, AnalysisSnapshot::new("graphene"))
                .unwrap();
            update_with(&db, &session, &user, |record| {
                record.report = Some(ReportState::planned(vec![], 3, "hash".into()));
                Ok(())
            })
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let record = db.load(&session, &user).unwrap().unwrap();
        assert_eq!(record.analysis.topic, "graphene");
        let report = record.report.unwrap();
        assert_eq!(report.status, ReportStatus::Planned);
        assert_eq!(report.order_hash, "hash");
        assert_eq!(db.list_sessions(&user).unwrap(), vec![session]);
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let (session, user) = ids();
        db.put_analysis(&session, &user, AnalysisSnapshot::new("topic"))
            .unwrap();

        let result: Result<()> = update_with(&db, &session, &user, |record| {
            record.analysis.topic = "mutated".into();
            Err(PreconditionError::locked("busy").into())
        });
        assert!(result.is_err());
        assert_eq!(db.load(&session, &user).unwrap().unwrap().analysis.topic, "topic");
    }

    #[test]
    fn test_update_missing_session() {
        let db = Database::open_in_memory().unwrap();
        let (session, user) = ids();
        let err = update_with(&db, &session, &user, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err.precondition(),
            Some(PreconditionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(dir.path().join("reports.db")).unwrap());
        let (session, user) = ids();
        db.put_analysis(&session, &user, AnalysisSnapshot::new("0"))
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                let (session, user) = ids();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        update_with(db.as_ref(), &session, &user, |record| {
                            let n: u32 = record.analysis.topic.parse().unwrap_or(0);
                            record.analysis.topic = (n + 1).to_string();
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = db.load(&session, &user).unwrap().unwrap();
        assert_eq!(record.analysis.topic, "40");
    }
}
