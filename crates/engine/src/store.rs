use anyhow::Context;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::geometry::Footprint;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

/// Where the previous build landed, so the next one can clean it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastBuild {
    pub shift_x: i64,
    pub shift_z: i64,
    pub layout_y: i64,
    pub layout_name: String,
    /// World-space frame of that build. Rows written before the frame was
    /// stored read back as `None`.
    pub frame: Option<Footprint>,
    pub built_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub seq: i64,
    pub ts_ms: i64,
    pub kind: String,
    pub payload_json: String,
}

#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> anyhow::Result<Connection> {
        let path = self.db_path.clone();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create db dir: {}", dir.display()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open sqlite db: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrate(&conn)?;
        Ok(conn)
    }

    /// `None` when nothing has been built yet.
    pub fn last_build(&self) -> anyhow::Result<Option<LastBuild>> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT shift_x, shift_z, layout_y, layout_name, built_at_ms,
                        frame_x1, frame_z1, frame_x2, frame_z2
                 FROM last_build WHERE id = 1",
                [],
                |row| {
                    let frame = match (
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, Option<i64>>(8)?,
                    ) {
                        (Some(x1), Some(z1), Some(x2), Some(z2)) => Some(Footprint { x1, z1, x2, z2 }),
                        _ => None,
                    };
                    Ok(LastBuild {
                        shift_x: row.get(0)?,
                        shift_z: row.get(1)?,
                        layout_y: row.get(2)?,
                        layout_name: row.get(3)?,
                        frame,
                        built_at_ms: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn record_build(&self, build: &LastBuild) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO last_build
               (id, shift_x, shift_z, layout_y, layout_name, built_at_ms,
                frame_x1, frame_z1, frame_x2, frame_z2)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               shift_x = excluded.shift_x,
               shift_z = excluded.shift_z,
               layout_y = excluded.layout_y,
               layout_name = excluded.layout_name,
               built_at_ms = excluded.built_at_ms,
               frame_x1 = excluded.frame_x1,
               frame_z1 = excluded.frame_z1,
               frame_x2 = excluded.frame_x2,
               frame_z2 = excluded.frame_z2",
            rusqlite::params![
                build.shift_x,
                build.shift_z,
                build.layout_y,
                &build.layout_name,
                build.built_at_ms,
                build.frame.map(|f| f.x1),
                build.frame.map(|f| f.z1),
                build.frame.map(|f| f.x2),
                build.frame.map(|f| f.z2),
            ],
        )?;
        append_event_tx(&tx, "build.recorded", serde_json::to_value(build)?)?;
        tx.commit()?;
        Ok(())
    }

    pub fn append_event(&self, kind: &str, payload: serde_json::Value) -> anyhow::Result<i64> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let seq = append_event_tx(&tx, kind, payload)?;
        tx.commit()?;
        Ok(seq)
    }

    pub fn recent_events(&self, limit: usize) -> anyhow::Result<Vec<EventRow>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT seq, ts_ms, kind, payload_json FROM event_log ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(EventRow {
                seq: row.get(0)?,
                ts_ms: row.get(1)?,
                kind: row.get(2)?,
                payload_json: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if v < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS event_log (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  kind TEXT NOT NULL,
  payload_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_event_log_kind ON event_log(kind);

-- Single row (id = 1): where the previous build was placed.
CREATE TABLE IF NOT EXISTS last_build (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  shift_x INTEGER NOT NULL,
  shift_z INTEGER NOT NULL,
  layout_y INTEGER NOT NULL,
  built_at_ms INTEGER NOT NULL
);
"#,
        )?;

        conn.pragma_update(None, "user_version", 1_i64)?;
    }

    ensure_column(conn, "last_build", "layout_name", "TEXT NOT NULL DEFAULT ''")?;
    for col in ["frame_x1", "frame_z1", "frame_x2", "frame_z2"] {
        ensure_column(conn, "last_build", col, "INTEGER")?;
    }

    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, col: &str, decl: &str) -> anyhow::Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {col} {decl}");
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) => {
            if e.to_string().to_lowercase().contains("duplicate column") {
                return Ok(());
            }
            Err(e).with_context(|| format!("ensure column {table}.{col}"))
        }
    }
}

/// Appends an event if a store is configured. Failures are logged, never
/// returned.
pub fn note(store: Option<&Store>, kind: &str, payload: serde_json::Value) {
    let Some(store) = store else {
        return;
    };
    if let Err(err) = store.append_event(kind, payload) {
        warn!(target: "sweeper::store", kind, "event not recorded: {err:#}");
    }
}

fn append_event_tx(
    tx: &rusqlite::Transaction<'_>,
    kind: &str,
    payload: serde_json::Value,
) -> anyhow::Result<i64> {
    let ts = now_ms();
    let payload_json = payload.to_string();
    tx.execute(
        "INSERT INTO event_log (ts_ms, kind, payload_json) VALUES (?1, ?2, ?3)",
        (ts, kind, payload_json),
    )?;
    Ok(tx.last_insert_rowid())
}
