use crate::error::{Error, Result};
use crate::types::{FieldConfiguration, FieldDefinition};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const API_KEY_SETTING: &str = "api_key";
const CONFIG_COLUMNS: &str = "id, name, fields, created_at, updated_at, last_used_at";

/// Local store for named field configurations and the API key.
pub struct Db {
    conn: Mutex<Connection>,
    last_stamp: AtomicI64,
}

fn config_from_row(row: &Row<'_>) -> rusqlite::Result<FieldConfiguration> {
    let fields_json: String = row.get(2)?;
    let fields: Vec<FieldDefinition> = serde_json::from_str(&fields_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    Ok(FieldConfiguration {
        id: row.get(0)?,
        name: row.get(1)?,
        fields,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        last_used_at: row.get(5)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Db {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        debug!(path = %db_path.display(), "opened database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS configurations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                fields TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        // Migration 002: last-used stamp so the most recent configuration can be restored on start.
        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
            .unwrap_or(1);
        if current_version < 2 {
            if let Err(e) = conn.execute("ALTER TABLE configurations ADD COLUMN last_used_at INTEGER", []) {
                if !e.to_string().contains("duplicate column") {
                    return Err(e.into());
                }
            }
            conn.execute("UPDATE schema_version SET version = 2", [])?;
        }

        Ok(Db {
            conn: Mutex::new(conn),
            last_stamp: AtomicI64::new(0),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Configuration(format!("database lock poisoned: {}", e)))
    }

    /// Current time in Unix millis, strictly increasing across calls on this handle.
    fn stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut prev = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_stamp
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Create a configuration, or replace the fields of the one with the same name. Returns its id.
    pub fn save_configuration(&self, name: &str, fields: &[FieldDefinition]) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Configuration("Configuration name is required.".to_string()));
        }
        let fields_json = serde_json::to_string(fields)?;
        let now = self.stamp();
        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM configurations WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE configurations SET fields = ?1, updated_at = ?2 WHERE id = ?3",
                    params![fields_json, now, id],
                )?;
                debug!(id, name, "configuration updated");
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO configurations (name, fields, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                    params![name, fields_json, now],
                )?;
                let id = conn.last_insert_rowid();
                debug!(id, name, "configuration created");
                Ok(id)
            }
        }
    }

    pub fn get_configuration(&self, id: i64) -> Result<Option<FieldConfiguration>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM configurations WHERE id = ?1", CONFIG_COLUMNS);
        Ok(conn.query_row(&sql, params![id], config_from_row).optional()?)
    }

    pub fn get_configuration_by_name(&self, name: &str) -> Result<Option<FieldConfiguration>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM configurations WHERE name = ?1", CONFIG_COLUMNS);
        Ok(conn
            .query_row(&sql, params![name.trim()], config_from_row)
            .optional()?)
    }

    pub fn get_all_configurations(&self) -> Result<Vec<FieldConfiguration>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM configurations ORDER BY name", CONFIG_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], config_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Write back an edited configuration (name, fields, last use). Bumps `updated_at`.
    pub fn update_configuration(&self, config: &FieldConfiguration) -> Result<()> {
        let fields_json = serde_json::to_string(&config.fields)?;
        let now = self.stamp();
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE configurations SET name = ?1, fields = ?2, updated_at = ?3, last_used_at = ?4 WHERE id = ?5",
                params![config.name.trim(), fields_json, now, config.last_used_at, config.id],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::Configuration(format!(
                        "A configuration named '{}' already exists.",
                        config.name.trim()
                    ))
                } else {
                    e.into()
                }
            })?;
        if changed == 0 {
            return Err(Error::Configuration(format!("Configuration {} not found.", config.id)));
        }
        Ok(())
    }

    pub fn delete_configuration(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM configurations WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Stamp `last_used_at`. Unknown ids are ignored.
    pub fn mark_configuration_as_used(&self, id: i64) -> Result<()> {
        let now = self.stamp();
        let conn = self.conn()?;
        conn.execute(
            "UPDATE configurations SET last_used_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    /// The configuration used last; never-used ones rank by their last update.
    pub fn most_recently_used(&self) -> Result<Option<FieldConfiguration>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM configurations ORDER BY COALESCE(last_used_at, updated_at) DESC, id DESC LIMIT 1",
            CONFIG_COLUMNS
        );
        Ok(conn.query_row(&sql, [], config_from_row).optional()?)
    }

    pub fn get_api_key(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        let key: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![API_KEY_SETTING],
                |r| r.get(0),
            )
            .optional()?;
        Ok(key.filter(|k| !k.trim().is_empty()))
    }

    pub fn set_api_key(&self, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return self.clear_api_key();
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![API_KEY_SETTING, value],
        )?;
        Ok(())
    }

    pub fn clear_api_key(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![API_KEY_SETTING])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn fields(names: &[&str]) -> Vec<FieldDefinition> {
        names
            .iter()
            .map(|n| FieldDefinition::new(*n, format!("{} volume", n), FieldType::Number))
            .collect()
    }

    #[test]
    fn save_then_load_by_name_and_id() {
        let db = Db::open_in_memory().unwrap();
        let id = db.save_configuration("Waste", &fields(&["recycle", "trash"])).unwrap();
        let by_name = db.get_configuration_by_name("Waste").unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_name.fields, fields(&["recycle", "trash"]));
        assert_eq!(by_name.created_at, by_name.updated_at);
        assert!(by_name.last_used_at.is_none());
        assert_eq!(db.get_configuration(id).unwrap(), Some(by_name));
        assert!(db.get_configuration(id + 100).unwrap().is_none());
    }

    #[test]
    fn saving_same_name_updates_in_place() {
        let db = Db::open_in_memory().unwrap();
        let first = db.save_configuration("Waste", &fields(&["recycle"])).unwrap();
        let second = db.save_configuration(" Waste ", &fields(&["compost"])).unwrap();
        assert_eq!(first, second);
        let all = db.get_all_configurations().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fields, fields(&["compost"]));
        assert!(all[0].updated_at > all[0].created_at);
    }

    #[test]
    fn blank_name_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        let err = db.save_configuration("  ", &fields(&["x"])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rename_onto_existing_name_fails() {
        let db = Db::open_in_memory().unwrap();
        db.save_configuration("A", &fields(&["x"])).unwrap();
        let b = db.save_configuration("B", &fields(&["y"])).unwrap();
        let mut cfg = db.get_configuration(b).unwrap().unwrap();
        cfg.name = "A".into();
        let err = db.update_configuration(&cfg).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        cfg.id = 999;
        cfg.name = "C".into();
        assert!(db.update_configuration(&cfg).is_err());
    }

    #[test]
    fn most_recently_used_follows_marks() {
        let db = Db::open_in_memory().unwrap();
        let a = db.save_configuration("A", &fields(&["x"])).unwrap();
        let b = db.save_configuration("B", &fields(&["y"])).unwrap();
        assert_eq!(db.most_recently_used().unwrap().unwrap().id, b);

        db.mark_configuration_as_used(a).unwrap();
        assert_eq!(db.most_recently_used().unwrap().unwrap().id, a);
        db.mark_configuration_as_used(b).unwrap();
        assert_eq!(db.most_recently_used().unwrap().unwrap().id, b);
        db.mark_configuration_as_used(a).unwrap();
        let mru = db.most_recently_used().unwrap().unwrap();
        assert_eq!(mru.id, a);
        assert!(mru.last_used_at.is_some());
    }

    #[test]
    fn delete_removes_configuration() {
        let db = Db::open_in_memory().unwrap();
        let id = db.save_configuration("A", &fields(&["x"])).unwrap();
        db.delete_configuration(id).unwrap();
        assert!(db.get_all_configurations().unwrap().is_empty());
        assert!(db.most_recently_used().unwrap().is_none());
    }

    #[test]
    fn api_key_roundtrip_and_clear() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.get_api_key().unwrap().is_none());
        db.set_api_key(" secret ").unwrap();
        assert_eq!(db.get_api_key().unwrap().as_deref(), Some("secret"));
        db.set_api_key("other").unwrap();
        assert_eq!(db.get_api_key().unwrap().as_deref(), Some("other"));
        db.clear_api_key().unwrap();
        assert!(db.get_api_key().unwrap().is_none());
    }

    #[test]
    fn reopening_file_keeps_data_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        {
            let db = Db::new(&path).unwrap();
            db.save_configuration("Waste", &fields(&["trash"])).unwrap();
        }
        let db = Db::new(&path).unwrap();
        let cfg = db.get_configuration_by_name("Waste").unwrap().unwrap();
        assert_eq!(cfg.fields, fields(&["trash"]));
        let id = cfg.id;
        db.mark_configuration_as_used(id).unwrap();
        assert!(db.get_configuration(id).unwrap().unwrap().last_used_at.is_some());
    }
}
