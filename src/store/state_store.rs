//! SQLite-backed phase ledger, fetch cursors and cached activity.
//!
//! Every mutation is committed before the call returns, so a crash at any
//! point leaves the ledger describing exactly the remote actions that were
//! confirmed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use sha2::{Digest, Sha256};

use crate::domain::EntityActivity;
use crate::error::{Result, WallError};
use crate::store::records::{FetchCursor, PhaseOutcome, PhaseRecord, PipelinePhase};

const DB_FILE: &str = "state.db";

/// Durable state shared by every worker in a run.
pub struct StateStore {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl StateStore {
    /// Open or create the store under `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).map_err(|e| {
            WallError::Storage(format!("Failed to create state directory {}: {}", state_dir.display(), e))
        })?;

        let path = state_dir.join(DB_FILE);
        let db = Connection::open(&path)
            .map_err(|e| WallError::Storage(format!("Failed to open SQLite database {}: {}", path.display(), e)))?;

        Self::init_schema(&db)?;
        log::debug!("Opened state store at {}", path.display());

        Ok(Self {
            path,
            db: Mutex::new(db),
        })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;

            CREATE TABLE IF NOT EXISTS phase_records (
                entity_id TEXT PRIMARY KEY,
                next_phase TEXT,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fetch_cursors (
                entity_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL,
                PRIMARY KEY (entity_id, collection)
            );

            CREATE TABLE IF NOT EXISTS activities (
                entity_id TEXT PRIMARY KEY,
                fetched_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| WallError::Storage(format!("Failed to initialize database schema: {}", e)))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| WallError::Storage("state store lock poisoned".to_string()))
    }

    /// Load an entity's phase record; unseen entities get an all-pending record.
    pub fn load(&self, entity_id: &str) -> Result<PhaseRecord> {
        let db = self.lock()?;
        Ok(Self::read_record(&db, entity_id)?.unwrap_or_else(|| PhaseRecord::new(entity_id)))
    }

    fn read_record(db: &Connection, entity_id: &str) -> Result<Option<PhaseRecord>> {
        let json: Option<String> = db
            .query_row(
                "SELECT json_data FROM phase_records WHERE entity_id = ?1",
                [entity_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Record the outcome of a phase attempt.
    ///
    /// The read, validation and write happen inside one immediate transaction,
    /// so two writers for the same entity cannot interleave.
    pub fn transition(&self, entity_id: &str, phase: PipelinePhase, outcome: PhaseOutcome) -> Result<PhaseRecord> {
        let mut db = self.lock()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut record = Self::read_record(&tx, entity_id)?.unwrap_or_else(|| PhaseRecord::new(entity_id));
        record.apply(phase, outcome, Utc::now())?;

        let json_data = serde_json::to_string(&record)?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO phase_records (entity_id, next_phase, updated_at, json_data)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                record.entity_id,
                record.next_phase().map(|p| p.as_str()),
                record.updated_at.timestamp_millis(),
                json_data,
            ],
        )?;
        tx.commit()?;

        log::debug!("Recorded {} for {}: {:?}", phase, entity_id, record.status(phase));
        Ok(record)
    }

    pub fn list_phase_records(&self) -> Result<Vec<PhaseRecord>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT json_data FROM phase_records ORDER BY entity_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for json in rows {
            records.push(serde_json::from_str(&json?)?);
        }
        Ok(records)
    }

    pub fn load_cursor(&self, entity_id: &str, collection: &str) -> Result<Option<FetchCursor>> {
        let db = self.lock()?;
        let json: Option<String> = db
            .query_row(
                "SELECT json_data FROM fetch_cursors WHERE entity_id = ?1 AND collection = ?2",
                params![entity_id, collection],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_cursor(&self, cursor: &FetchCursor) -> Result<()> {
        let json_data = serde_json::to_string(cursor)?;
        let status = serde_json::to_value(cursor.status)?;
        let db = self.lock()?;
        db.execute(
            r#"
            INSERT OR REPLACE INTO fetch_cursors (entity_id, collection, status, updated_at, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                cursor.entity_id,
                cursor.collection,
                status.as_str().unwrap_or_default(),
                cursor.updated_at.timestamp_millis(),
                json_data,
            ],
        )?;
        Ok(())
    }

    pub fn load_activity(&self, entity_id: &str) -> Result<Option<EntityActivity>> {
        let db = self.lock()?;
        let json: Option<String> = db
            .query_row(
                "SELECT json_data FROM activities WHERE entity_id = ?1",
                [entity_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save_activity(&self, activity: &EntityActivity) -> Result<()> {
        let json_data = serde_json::to_string(activity)?;
        let db = self.lock()?;
        db.execute(
            "INSERT OR REPLACE INTO activities (entity_id, fetched_at, json_data) VALUES (?1, ?2, ?3)",
            params![activity.login.to_lowercase(), activity.fetched_at.timestamp_millis(), json_data],
        )?;
        Ok(())
    }

    pub fn list_activities(&self) -> Result<Vec<EntityActivity>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT json_data FROM activities ORDER BY entity_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut activities = Vec::new();
        for json in rows {
            activities.push(serde_json::from_str(&json?)?);
        }
        Ok(activities)
    }
}

/// Short stable key for a roster file's location, naming its default state
/// directory. Editing the roster keeps the key; moving the file changes it.
pub fn compute_roster_key(roster: &Path) -> String {
    let resolved = fs::canonicalize(roster)
        .or_else(|_| std::path::absolute(roster))
        .unwrap_or_else(|_| roster.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(resolved.to_string_lossy().as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
