use chrono::{DateTime, Local};
use rusqlite::{params, Connection, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;

/// One finished infusion, as kept in the history database
#[derive(Debug, Clone, Serialize)]
pub struct InfusionRecord {
    pub started_at: DateTime<Local>,
    pub completed_at: DateTime<Local>,
    pub volume_ml: f64,
    pub drop_factor: u32,
    pub speed_level: String,
    pub measured_drops_per_minute: u32,
    pub estimated_minutes: f64,
    pub actual_minutes: f64,
}

/// Database manager for completed-infusion records
#[derive(Debug)]
pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    /// Open the database at the default state path, creating tables if needed
    pub fn new() -> Result<Self> {
        let db_path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("dripwatch_history.db"));
        Self::open(&db_path)
    }

    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }

        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS infusion_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                volume_ml REAL NOT NULL,
                drop_factor INTEGER NOT NULL,
                speed_level TEXT NOT NULL,
                measured_drops_per_minute INTEGER NOT NULL,
                estimated_minutes REAL NOT NULL,
                actual_minutes REAL NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_infusion_records_completed ON infusion_records(completed_at)",
            [],
        )?;

        Ok(HistoryDb { conn })
    }

    pub fn record(&self, record: &InfusionRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO infusion_records
            (started_at, completed_at, volume_ml, drop_factor, speed_level,
             measured_drops_per_minute, estimated_minutes, actual_minutes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.started_at.to_rfc3339(),
                record.completed_at.to_rfc3339(),
                record.volume_ml,
                record.drop_factor,
                record.speed_level,
                record.measured_drops_per_minute,
                record.estimated_minutes,
                record.actual_minutes,
            ],
        )?;

        Ok(())
    }

    /// Most recently completed infusions, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<InfusionRecord>> {
        self.fetch(limit.min(i64::MAX as usize) as i64)
    }

    /// Every record, newest first
    pub fn all(&self) -> Result<Vec<InfusionRecord>> {
        // SQLite treats a negative LIMIT as "no limit"
        self.fetch(-1)
    }

    fn fetch(&self, limit: i64) -> Result<Vec<InfusionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT started_at, completed_at, volume_ml, drop_factor, speed_level,
                   measured_drops_per_minute, estimated_minutes, actual_minutes
            FROM infusion_records
            ORDER BY completed_at DESC
            LIMIT ?1
            "#,
        )?;

        let record_iter = stmt.query_map([limit], |row| {
            let parse_time = |idx: usize, s: String| {
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|_| {
                        rusqlite::Error::InvalidColumnType(
                            idx,
                            "timestamp".to_string(),
                            rusqlite::types::Type::Text,
                        )
                    })
                    .map(|t| t.with_timezone(&Local))
            };

            Ok(InfusionRecord {
                started_at: parse_time(0, row.get::<_, String>(0)?)?,
                completed_at: parse_time(1, row.get::<_, String>(1)?)?,
                volume_ml: row.get(2)?,
                drop_factor: row.get(3)?,
                speed_level: row.get(4)?,
                measured_drops_per_minute: row.get(5)?,
                estimated_minutes: row.get(6)?,
                actual_minutes: row.get(7)?,
            })
        })?;

        let mut records = Vec::new();
        for record in record_iter {
            records.push(record?);
        }

        Ok(records)
    }

    pub fn count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM infusion_records", [], |row| {
                row.get(0)
            })
    }

    /// Export the full history as CSV, newest first
    pub fn export_csv(&self, path: &Path) -> std::io::Result<()> {
        let records = self
            .all()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(&record)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Clear all records (for testing or reset purposes)
    pub fn clear_all(&self) -> Result<()> {
        self.conn.execute("DELETE FROM infusion_records", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_record(offset_minutes: i64) -> InfusionRecord {
        let started = Local.timestamp_millis_opt(1_700_000_000_000).unwrap();
        InfusionRecord {
            started_at: started,
            completed_at: started + chrono::Duration::minutes(90 + offset_minutes),
            volume_ml: 200.0,
            drop_factor: 20,
            speed_level: "medium".to_string(),
            measured_drops_per_minute: 0,
            estimated_minutes: 88.0,
            actual_minutes: 90.0,
        }
    }

    #[test]
    fn record_and_read_back() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).unwrap();

        db.record(&sample_record(0)).unwrap();

        let records = db.recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].volume_ml, 200.0);
        assert_eq!(records[0].speed_level, "medium");
        assert_eq!(records[0].actual_minutes, 90.0);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn recent_orders_newest_first_and_limits() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).unwrap();

        for i in 0..5 {
            db.record(&sample_record(i)).unwrap();
        }

        let records = db.recent(3).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].completed_at > records[1].completed_at);
        assert!(records[1].completed_at > records[2].completed_at);
    }

    #[test]
    fn export_writes_csv_rows() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).unwrap();
        db.record(&sample_record(0)).unwrap();
        db.record(&sample_record(1)).unwrap();

        let csv_path = dir.path().join("history.csv");
        db.export_csv(&csv_path).unwrap();

        let contents = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        // header plus two rows
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("volume_ml"));
    }

    #[test]
    fn clear_all_empties_the_table() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).unwrap();
        db.record(&sample_record(0)).unwrap();
        db.clear_all().unwrap();
        assert_eq!(db.count().unwrap(), 0);
    }
}
