use log::{debug, error, info};
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::error::PersistenceError;
use super::sample::Sample;

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

enum WriteCommand {
    Insert(Sample),
    DeleteAll(mpsc::SyncSender<Result<u64, PersistenceError>>),
    Flush(mpsc::SyncSender<()>),
    Shutdown,
}

/// Append-only table of samples backed by SQLite.
///
/// All writes go through a single background thread that owns the write
/// connection; queries open their own read connection.
pub struct SampleStore {
    db_path: PathBuf,
    sender: mpsc::Sender<WriteCommand>,
    writer_thread: Option<thread::JoinHandle<()>>,
}

impl SampleStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, PersistenceError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        init_db(&conn)?;

        let (sender, receiver) = mpsc::channel();
        let writer_thread = thread::Builder::new()
            .name("sample-writer".into())
            .spawn(move || background_writer(conn, receiver))?;

        info!("Sample store opened at {}", db_path.display());

        Ok(Self {
            db_path,
            sender,
            writer_thread: Some(writer_thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Queues a sample for writing and returns without waiting for disk.
    pub fn insert(&self, sample: Sample) -> Result<(), PersistenceError> {
        self.sender
            .send(WriteCommand::Insert(sample))
            .map_err(|_| PersistenceError::WriterClosed)
    }

    /// Blocks until every write queued before this call is committed.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.sender
            .send(WriteCommand::Flush(tx))
            .map_err(|_| PersistenceError::WriterClosed)?;
        rx.recv().map_err(|_| PersistenceError::WriterClosed)
    }

    pub fn list_all(&self) -> Result<Vec<Sample>, PersistenceError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT latitude, longitude, timestamp, accuracy
             FROM locations
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map([], sample_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Samples with `start <= timestamp <= end`, most recent first.
    pub fn list_by_range(&self, start: i64, end: i64) -> Result<Vec<Sample>, PersistenceError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT latitude, longitude, timestamp, accuracy
             FROM locations
             WHERE timestamp BETWEEN ?1 AND ?2
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![start, end], sample_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<u64, PersistenceError> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Removes every stored sample. Ordered after all previously queued inserts.
    pub fn delete_all(&self) -> Result<u64, PersistenceError> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.sender
            .send(WriteCommand::DeleteAll(tx))
            .map_err(|_| PersistenceError::WriterClosed)?;
        rx.recv().map_err(|_| PersistenceError::WriterClosed)?
    }

    fn reader(&self) -> Result<Connection, PersistenceError> {
        let conn = Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl Drop for SampleStore {
    fn drop(&mut self) {
        let _ = self.sender.send(WriteCommand::Shutdown);
        if let Some(handle) = self.writer_thread.take() {
            if handle.join().is_err() {
                error!("Sample writer thread panicked");
            }
        }
    }
}

fn init_db(conn: &Connection) -> Result<(), PersistenceError> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!("SQLite journal mode: {}", mode);
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS locations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            timestamp INTEGER NOT NULL,
            accuracy REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_locations_timestamp ON locations(timestamp);",
    )?;
    Ok(())
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<Sample> {
    let accuracy: f64 = row.get(3)?;
    Ok(Sample {
        latitude: row.get(0)?,
        longitude: row.get(1)?,
        timestamp: row.get(2)?,
        accuracy: accuracy as f32,
    })
}

fn background_writer(conn: Connection, receiver: mpsc::Receiver<WriteCommand>) {
    for command in receiver.iter() {
        match command {
            WriteCommand::Insert(sample) => {
                let result = conn.execute(
                    "INSERT INTO locations (latitude, longitude, timestamp, accuracy)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        sample.latitude,
                        sample.longitude,
                        sample.timestamp,
                        f64::from(sample.accuracy)
                    ],
                );
                match result {
                    Ok(_) => debug!(
                        "Stored sample {:.6}, {:.6} @ {}",
                        sample.latitude, sample.longitude, sample.timestamp
                    ),
                    Err(e) => error!("Failed to store sample: {}", e),
                }
            }
            WriteCommand::DeleteAll(reply) => {
                let result = conn
                    .execute("DELETE FROM locations", [])
                    .map(|n| n as u64)
                    .map_err(PersistenceError::from);
                if let Ok(n) = &result {
                    info!("Deleted {} samples", n);
                }
                let _ = reply.send(result);
            }
            WriteCommand::Flush(reply) => {
                let _ = reply.send(());
            }
            WriteCommand::Shutdown => break,
        }
    }
    debug!("Sample writer stopped");
}
