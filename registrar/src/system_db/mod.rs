use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

/// The system database: document index, sequence counters and directory hashes.
///
/// All writers are expected to hold an immediate transaction (see
/// [`SystemDb::begin_immediate`]) so that several handles on the same file
/// serialize instead of deadlocking on lock upgrades.
pub struct SystemDb {
    conn: Connection,
}

impl SystemDb {
    /// Open or create the system database at the given path.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let db = SystemDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory system database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = SystemDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.begin_immediate()?;
        let created = self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                business_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                data_json TEXT NOT NULL,
                PRIMARY KEY (collection, key),
                UNIQUE (collection, business_id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

            CREATE TABLE IF NOT EXISTS counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS directory_hashes (
                collection TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        );
        match created {
            Ok(()) => self.commit(),
            Err(e) => {
                let _ = self.rollback();
                Err(e.into())
            }
        }
    }

    // ── Document Index ───────────────────────────────────────────────

    /// Upsert a document into the index.
    pub fn upsert_document(
        &self,
        collection: &str,
        key: &str,
        business_id: i64,
        path: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let data_json = serde_json::to_string(data)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO documents (collection, key, business_id, path, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection, key, business_id, path, data_json],
        )?;
        Ok(())
    }

    /// Get a document from the index by collection and business id.
    pub fn get_document(&self, collection: &str, business_id: i64) -> Result<Option<DocumentRecord>> {
        let result = self
            .conn
            .query_row(
                "SELECT collection, key, business_id, path, data_json FROM documents
                 WHERE collection = ?1 AND business_id = ?2",
                params![collection, business_id],
                DocumentRecord::from_row,
            )
            .optional()?;
        Ok(result)
    }

    /// List all documents in a collection, ordered by business id.
    pub fn list_documents(&self, collection: &str) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, key, business_id, path, data_json FROM documents
             WHERE collection = ?1 ORDER BY business_id",
        )?;
        let rows = stmt.query_map(params![collection], DocumentRecord::from_row)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    /// Find documents whose integer field equals `value`.
    pub fn find_by_field(&self, collection: &str, field: &str, value: i64) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT collection, key, business_id, path, data_json FROM documents
             WHERE collection = ?1 AND json_extract(data_json, ?2) = ?3
             ORDER BY business_id",
        )?;
        let rows = stmt.query_map(
            params![collection, json_path(field), value],
            DocumentRecord::from_row,
        )?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    /// Count documents whose integer field equals `value`.
    pub fn count_by_field(&self, collection: &str, field: &str, value: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents
             WHERE collection = ?1 AND json_extract(data_json, ?2) = ?3",
            params![collection, json_path(field), value],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Find documents whose integer-array field contains `value`.
    pub fn find_containing(&self, collection: &str, field: &str, value: i64) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.collection, d.key, d.business_id, d.path, d.data_json FROM documents d
             WHERE d.collection = ?1
               AND EXISTS (SELECT 1 FROM json_each(d.data_json, ?2) j WHERE j.value = ?3)
             ORDER BY d.business_id",
        )?;
        let rows = stmt.query_map(
            params![collection, json_path(field), value],
            DocumentRecord::from_row,
        )?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    /// Delete a document from the index.
    pub fn delete_document(&self, collection: &str, business_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND business_id = ?2",
            params![collection, business_id],
        )?;
        Ok(())
    }

    /// Delete all documents in a collection from the index.
    pub fn delete_collection_documents(&self, collection: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1",
            params![collection],
        )?;
        Ok(())
    }

    /// Number of indexed documents in a collection.
    pub fn count_documents(&self, collection: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Counters ─────────────────────────────────────────────────────

    /// Increment the named counter and return the new value. An unseen name
    /// is created holding `base + 1`. One statement, one row.
    pub fn next_counter_value(&self, name: &str, base: i64) -> Result<i64> {
        let value = self.conn.query_row(
            "INSERT INTO counters (name, value) VALUES (?1, ?2 + 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
            params![name, base],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    /// Last value issued for a counter, if it has ever been used.
    pub fn get_counter(&self, name: &str) -> Result<Option<i64>> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM counters WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    /// All counters, ordered by name.
    pub fn list_counters(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM counters ORDER BY name")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut counters = Vec::new();
        for row in rows {
            counters.push(row?);
        }
        Ok(counters)
    }

    // ── Directory Hashes ─────────────────────────────────────────────

    /// Get the stored directory hash for a collection.
    pub fn get_directory_hash(&self, collection: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT hash FROM directory_hashes WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    /// Update the directory hash for a collection.
    pub fn set_directory_hash(&self, collection: &str, hash: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO directory_hashes (collection, hash) VALUES (?1, ?2)",
            params![collection, hash],
        )?;
        Ok(())
    }

    // ── Transaction Support ──────────────────────────────────────────

    /// Begin a write transaction, taking the write lock up front.
    pub fn begin_immediate(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Rollback the current transaction.
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

/// A record from the documents table
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub collection: String,
    pub key: String,
    pub business_id: i64,
    pub path: String,
    pub data_json: String,
}

impl DocumentRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DocumentRecord {
            collection: row.get(0)?,
            key: row.get(1)?,
            business_id: row.get(2)?,
            path: row.get(3)?,
            data_json: row.get(4)?,
        })
    }

    /// Parse the indexed JSON data.
    pub fn parse_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.data_json)?)
    }
}

/// Compute a directory hash from a list of (filename, mtime) pairs.
/// Used for change detection during boot.
pub fn compute_directory_hash(entries: &[(String, u64)]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = DefaultHasher::new();
    for (name, mtime) in &sorted {
        name.hash(&mut hasher);
        mtime.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}
