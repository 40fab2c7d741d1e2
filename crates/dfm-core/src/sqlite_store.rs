//! SQLite-based persistent storage for the fleet.
//!
//! Writes go through one connection and run inside a transaction per call.
//! File-backed stores open a second, read-only connection so readers such as
//! the battery audit never queue behind the writer (the database runs in WAL
//! mode).

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension};
use tokio::sync::Mutex;

use crate::store::{FleetStore, StoreError};
use crate::types::{Drone, DroneState, Medication};

// ============================================================================
// Schema Version
// ============================================================================

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

const DRONE_COLUMNS: &str = "serial_number, model, weight_limit, battery_capacity, state";
const MEDICATION_COLUMNS: &str = "name, weight, code, image";

// ============================================================================
// SQLite Store Implementation
// ============================================================================

/// SQLite-based persistent fleet store.
pub struct SqliteStore {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(failed("failed to open database"))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(failed("failed to set pragmas"))?;

        Self::run_migrations(&conn)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(failed("failed to open read connection"))?;

        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    /// Create a new in-memory SQLite store. Reads and writes share one
    /// connection.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(failed("failed to open in-memory database"))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(failed("failed to set pragmas"))?;

        Self::run_migrations(&conn)?;

        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: conn.clone(),
            reader: conn,
        })
    }

    /// Run database migrations to ensure schema is up to date.
    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .map_err(failed("failed to create schema_version"))?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(failed("failed to read schema_version"))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::DataCorruption(format!(
                "database schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            )));
        }

        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }

        Ok(())
    }

    /// Migration to schema version 1 - initial schema.
    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            BEGIN;

            CREATE TABLE IF NOT EXISTS drones (
                serial_number TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                weight_limit REAL NOT NULL,
                battery_capacity REAL NOT NULL,
                state TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_drones_state ON drones(state);

            CREATE TABLE IF NOT EXISTS medications (
                code TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                weight REAL NOT NULL,
                image TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS drone_medications (
                serial_number TEXT NOT NULL REFERENCES drones(serial_number),
                code TEXT NOT NULL REFERENCES medications(code),
                PRIMARY KEY (serial_number, code)
            );
            CREATE INDEX IF NOT EXISTS idx_drone_medications_code ON drone_medications(code);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            "#,
        )
        .map_err(failed("failed to apply migration v1"))?;
        Ok(())
    }

    fn row_to_drone(row: &rusqlite::Row) -> rusqlite::Result<Drone> {
        Ok(Drone {
            serial_number: row.get(0)?,
            model: parse_column(1, row.get(1)?)?,
            weight_limit: row.get(2)?,
            battery_capacity: row.get(3)?,
            state: parse_column(4, row.get(4)?)?,
        })
    }

    fn row_to_medication(row: &rusqlite::Row) -> rusqlite::Result<Medication> {
        Ok(Medication {
            name: row.get(0)?,
            weight: row.get(1)?,
            code: row.get(2)?,
            image: row.get(3)?,
        })
    }
}

// ============================================================================
// Store Trait Implementation
// ============================================================================

#[async_trait]
impl FleetStore for SqliteStore {
    // -------------------------------------------------------------------------
    // Drone Operations
    // -------------------------------------------------------------------------

    async fn get_drone(&self, serial_number: &str) -> Result<Option<Drone>, StoreError> {
        let conn = self.reader.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM drones WHERE serial_number = ?1", DRONE_COLUMNS),
            params![serial_number],
            Self::row_to_drone,
        )
        .optional()
        .map_err(failed("failed to load drone"))
    }

    async fn list_drones(&self) -> Result<Vec<Drone>, StoreError> {
        let conn = self.reader.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM drones ORDER BY serial_number",
                DRONE_COLUMNS
            ))
            .map_err(failed("failed to prepare drone listing"))?;
        let rows = stmt
            .query_map([], Self::row_to_drone)
            .map_err(failed("failed to list drones"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed("failed to read drone row"))
    }

    async fn list_drones_in_state(&self, state: DroneState) -> Result<Vec<Drone>, StoreError> {
        let conn = self.reader.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM drones WHERE state = ?1 ORDER BY serial_number",
                DRONE_COLUMNS
            ))
            .map_err(failed("failed to prepare drone query"))?;
        let rows = stmt
            .query_map(params![state.as_str()], Self::row_to_drone)
            .map_err(failed("failed to query drones by state"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed("failed to read drone row"))
    }

    async fn insert_drone(&self, drone: Drone) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        conn.execute(
            &format!("INSERT INTO drones ({}) VALUES (?1, ?2, ?3, ?4, ?5)", DRONE_COLUMNS),
            params![
                drone.serial_number,
                drone.model.as_str(),
                drone.weight_limit,
                drone.battery_capacity,
                drone.state.as_str(),
            ],
        )
        .map_err(|e| duplicate_or(e, &drone.serial_number, "failed to insert drone"))?;
        Ok(())
    }

    async fn update_drone(&self, drone: Drone) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE drones
                 SET model = ?2, weight_limit = ?3, battery_capacity = ?4, state = ?5
                 WHERE serial_number = ?1",
                params![
                    drone.serial_number,
                    drone.model.as_str(),
                    drone.weight_limit,
                    drone.battery_capacity,
                    drone.state.as_str(),
                ],
            )
            .map_err(failed("failed to update drone"))?;
        if changed == 0 {
            return Err(StoreError::NotFound(drone.serial_number));
        }
        Ok(())
    }

    async fn delete_drone(&self, serial_number: &str) -> Result<bool, StoreError> {
        let mut conn = self.writer.lock().await;
        let tx = conn.transaction().map_err(failed("failed to begin transaction"))?;
        tx.execute(
            "DELETE FROM drone_medications WHERE serial_number = ?1",
            params![serial_number],
        )
        .map_err(failed("failed to delete drone associations"))?;
        let removed = tx
            .execute("DELETE FROM drones WHERE serial_number = ?1", params![serial_number])
            .map_err(failed("failed to delete drone"))?;
        tx.commit().map_err(failed("failed to commit drone deletion"))?;
        Ok(removed > 0)
    }

    // -------------------------------------------------------------------------
    // Medication Operations
    // -------------------------------------------------------------------------

    async fn get_medication(&self, code: &str) -> Result<Option<Medication>, StoreError> {
        let conn = self.reader.lock().await;
        conn.query_row(
            &format!("SELECT {} FROM medications WHERE code = ?1", MEDICATION_COLUMNS),
            params![code],
            Self::row_to_medication,
        )
        .optional()
        .map_err(failed("failed to load medication"))
    }

    async fn get_medications(&self, codes: &[String]) -> Result<Vec<Medication>, StoreError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; codes.len()].join(", ");
        let conn = self.reader.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM medications WHERE code IN ({})",
                MEDICATION_COLUMNS, placeholders
            ))
            .map_err(failed("failed to prepare medication lookup"))?;
        let rows = stmt
            .query_map(params_from_iter(codes.iter()), Self::row_to_medication)
            .map_err(failed("failed to look up medications"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed("failed to read medication row"))
    }

    async fn list_medications(&self) -> Result<Vec<Medication>, StoreError> {
        let conn = self.reader.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM medications ORDER BY code",
                MEDICATION_COLUMNS
            ))
            .map_err(failed("failed to prepare medication listing"))?;
        let rows = stmt
            .query_map([], Self::row_to_medication)
            .map_err(failed("failed to list medications"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed("failed to read medication row"))
    }

    async fn insert_medication(&self, medication: Medication) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        conn.execute(
            &format!("INSERT INTO medications ({}) VALUES (?1, ?2, ?3, ?4)", MEDICATION_COLUMNS),
            params![medication.name, medication.weight, medication.code, medication.image],
        )
        .map_err(|e| duplicate_or(e, &medication.code, "failed to insert medication"))?;
        Ok(())
    }

    async fn update_medication(&self, medication: Medication) -> Result<(), StoreError> {
        let conn = self.writer.lock().await;
        let changed = conn
            .execute(
                "UPDATE medications SET name = ?2, weight = ?3, image = ?4 WHERE code = ?1",
                params![medication.code, medication.name, medication.weight, medication.image],
            )
            .map_err(failed("failed to update medication"))?;
        if changed == 0 {
            return Err(StoreError::NotFound(medication.code));
        }
        Ok(())
    }

    async fn delete_medication(&self, code: &str) -> Result<bool, StoreError> {
        let mut conn = self.writer.lock().await;
        let tx = conn.transaction().map_err(failed("failed to begin transaction"))?;
        tx.execute("DELETE FROM drone_medications WHERE code = ?1", params![code])
            .map_err(failed("failed to delete medication associations"))?;
        let removed = tx
            .execute("DELETE FROM medications WHERE code = ?1", params![code])
            .map_err(failed("failed to delete medication"))?;
        tx.commit().map_err(failed("failed to commit medication deletion"))?;
        Ok(removed > 0)
    }

    // -------------------------------------------------------------------------
    // Association Operations
    // -------------------------------------------------------------------------

    async fn is_associated(&self, serial_number: &str, code: &str) -> Result<bool, StoreError> {
        let conn = self.reader.lock().await;
        let found = conn
            .query_row(
                "SELECT 1 FROM drone_medications WHERE serial_number = ?1 AND code = ?2",
                params![serial_number, code],
                |_| Ok(()),
            )
            .optional()
            .map_err(failed("failed to check association"))?;
        Ok(found.is_some())
    }

    async fn loaded_medications(&self, serial_number: &str) -> Result<Vec<Medication>, StoreError> {
        let conn = self.reader.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT m.name, m.weight, m.code, m.image
                 FROM medications m
                 JOIN drone_medications dm ON dm.code = m.code
                 WHERE dm.serial_number = ?1
                 ORDER BY m.code",
            )
            .map_err(failed("failed to prepare loaded medication query"))?;
        let rows = stmt
            .query_map(params![serial_number], Self::row_to_medication)
            .map_err(failed("failed to query loaded medications"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed("failed to read medication row"))
    }

    async fn drones_carrying(&self, code: &str) -> Result<Vec<Drone>, StoreError> {
        let conn = self.reader.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT d.serial_number, d.model, d.weight_limit, d.battery_capacity, d.state
                 FROM drones d
                 JOIN drone_medications dm ON dm.serial_number = d.serial_number
                 WHERE dm.code = ?1
                 ORDER BY d.serial_number",
            )
            .map_err(failed("failed to prepare carrying drone query"))?;
        let rows = stmt
            .query_map(params![code], Self::row_to_drone)
            .map_err(failed("failed to query carrying drones"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed("failed to read drone row"))
    }

    async fn associate(&self, serial_number: &str, codes: &[String]) -> Result<(), StoreError> {
        let mut conn = self.writer.lock().await;
        let tx = conn.transaction().map_err(failed("failed to begin transaction"))?;
        {
            let mut insert = tx
                .prepare("INSERT INTO drone_medications (serial_number, code) VALUES (?1, ?2)")
                .map_err(failed("failed to prepare association insert"))?;
            for code in codes {
                insert.execute(params![serial_number, code]).map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(ref err, _)
                        if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
                    {
                        StoreError::NotFound(format!("{}/{}", serial_number, code))
                    }
                    other => duplicate_or(
                        other,
                        &format!("{}/{}", serial_number, code),
                        "failed to insert association",
                    ),
                })?;
            }
        }
        // Dropping `tx` on any error above rolls the batch back.
        tx.commit().map_err(failed("failed to commit associations"))?;
        Ok(())
    }

    async fn list_associations(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.reader.lock().await;
        let mut stmt = conn
            .prepare("SELECT serial_number, code FROM drone_medications ORDER BY serial_number, code")
            .map_err(failed("failed to prepare association listing"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(failed("failed to list associations"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(failed("failed to read association row"))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn failed(context: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::OperationFailed(format!("{}: {}", context, e))
}

fn duplicate_or(e: rusqlite::Error, key: &str, context: &'static str) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(key.to_string())
        }
        other => failed(context)(other),
    }
}

fn parse_column<T: FromStr>(idx: usize, raw: String) -> rusqlite::Result<T> {
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value {:?}", raw).into(),
        )
    })
}

// ============================================================================
// Unit Tests
// ============================================================================
