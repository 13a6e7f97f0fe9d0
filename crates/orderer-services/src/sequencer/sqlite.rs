//! SQLite-backed block log.
//!
//! One row per block; `seq` is the append order. rusqlite is synchronous,
//! so every call runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::task;

use super::{Sequencer, SequencerError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        seq  INTEGER PRIMARY KEY AUTOINCREMENT,
        data BLOB NOT NULL
    );
";

pub struct SqliteSequencer {
    conn: Option<Arc<Mutex<Connection>>>,
}

impl SqliteSequencer {
    pub fn open(path: &Path) -> Result<Self, SequencerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| SequencerError::Io {
                    path: PathBuf::from(parent),
                    source,
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SequencerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SequencerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Some(Arc::new(Mutex::new(conn))),
        })
    }

    fn conn(&self) -> Result<Arc<Mutex<Connection>>, SequencerError> {
        self.conn.clone().ok_or(SequencerError::Closed)
    }

    /// Every stored block, in append order.
    pub async fn read_all(&self) -> Result<Vec<Bytes>, SequencerError> {
        let conn = self.conn()?;
        blocking(move || {
            let conn = lock(&conn)?;
            select_all(&conn)
        })
        .await
    }
}

/// Every block in the database at `path`, opened read-only. Nothing is
/// created or migrated, so a file without a block table is an error.
pub fn read_blocks(path: &Path) -> Result<Vec<Bytes>, SequencerError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    select_all(&conn)
}

fn select_all(conn: &Connection) -> Result<Vec<Bytes>, SequencerError> {
    let mut stmt = conn.prepare("SELECT data FROM blocks ORDER BY seq")?;
    let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
    let mut blocks = Vec::new();
    for row in rows {
        blocks.push(Bytes::from(row?));
    }
    Ok(blocks)
}

impl Sequencer for SqliteSequencer {
    async fn send(&mut self, block: Bytes) -> Result<(), SequencerError> {
        let conn = self.conn()?;
        blocking(move || {
            lock(&conn)?.execute("INSERT INTO blocks (data) VALUES (?1)", params![&block[..]])?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<(), SequencerError> {
        // Dropping the last handle closes the connection.
        self.conn.take();
        Ok(())
    }

    async fn tip(&mut self) -> Result<Option<Bytes>, SequencerError> {
        let conn = self.conn()?;
        blocking(move || {
            let tip = lock(&conn)?
                .query_row(
                    "SELECT data FROM blocks ORDER BY seq DESC LIMIT 1",
                    [],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(tip.map(Bytes::from))
        })
        .await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SequencerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SequencerError> + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| SequencerError::Task(e.to_string()))?
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, SequencerError> {
    conn.lock()
        .map_err(|_| SequencerError::Task("sqlite connection lock poisoned".into()))
}
