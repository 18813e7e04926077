//! SQLite-backed chunk store with `sqlite-vec` similarity search.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::warn;
use uuid::Uuid;

use super::{ChunkFilter, ScoredChunk, VectorStore};
use crate::chunking::DocumentChunk;
use crate::types::ChunkError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    hierarchy_level INTEGER NOT NULL,
    position INTEGER NOT NULL,
    heading_path TEXT NOT NULL,
    data TEXT NOT NULL,
    embedding TEXT
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
";

/// Persistent [`VectorStore`] over SQLite with the `sqlite-vec` extension.
///
/// Chunk rows keep the filterable columns denormalized next to the full
/// chunk JSON; embeddings are stored as JSON vectors and compared with
/// `vec_distance_cosine`. Malformed rows are skipped with a warning rather
/// than failing the whole read.
#[derive(Clone)]
pub struct SqliteChunkStore {
    conn: Connection,
}

impl SqliteChunkStore {
    /// Opens (or creates) a store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ChunkError> {
        register_sqlite_vec()?;
        let conn = Connection::open(path).await.map_err(storage_err)?;
        Self::initialize(conn).await
    }

    /// Opens an ephemeral in-memory store.
    pub async fn open_in_memory() -> Result<Self, ChunkError> {
        register_sqlite_vec()?;
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, ChunkError> {
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, tokio_rusqlite::rusqlite::Error>(())
        })
        .await
        .map_err(storage_err)?;
        Ok(Self { conn })
    }
}

fn storage_err(err: impl std::fmt::Display) -> ChunkError {
    ChunkError::Storage(err.to_string())
}

/// Registers the `sqlite-vec` extension for every new connection, once per
/// process.
fn register_sqlite_vec() -> Result<(), ChunkError> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(ChunkError::Storage)
}

/// Compiles a filter into SQL clauses plus their bound values.
///
/// All values bind as text; SQLite's column affinity converts the level back
/// to an integer for comparison.
fn filter_sql(filter: &ChunkFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(document_id) = &filter.document_id {
        clauses.push("document_id = ?".to_string());
        params.push(document_id.clone());
    }
    if let Some(chunk_type) = filter.chunk_type {
        clauses.push("chunk_type = ?".to_string());
        params.push(chunk_type.to_string());
    }
    if let Some(level) = filter.hierarchy_level {
        clauses.push("hierarchy_level = ?".to_string());
        params.push(level.to_string());
    }
    if let Some(needle) = &filter.heading_path_contains {
        clauses.push("lower(heading_path) LIKE ?".to_string());
        params.push(format!("%{}%", needle.to_lowercase()));
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clauses.join(" AND "))
    };
    (sql, params)
}

fn decode_row(data: &str) -> Option<DocumentChunk> {
    match serde_json::from_str::<DocumentChunk>(data) {
        Ok(chunk) => Some(chunk),
        Err(err) => {
            warn!(error = %err, "skipping malformed chunk row");
            None
        }
    }
}

#[async_trait]
impl VectorStore for SqliteChunkStore {
    async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<(), ChunkError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let data = serde_json::to_string(chunk)?;
            let embedding = chunk
                .embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            rows.push((
                chunk.id.to_string(),
                chunk.document_id.clone(),
                chunk.chunk_type.to_string(),
                chunk.hierarchy_level as i64,
                chunk.position as i64,
                chunk.heading_path.join(" > "),
                data,
                embedding,
            ));
        }

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT OR REPLACE INTO chunks \
                             (id, document_id, chunk_type, hierarchy_level, position, \
                              heading_path, data, embedding) \
                             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                        )?;
                    for row in rows {
                        stmt.execute(tokio_rusqlite::rusqlite::params![
                            row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7
                        ])?;
                    }
                }
                tx.commit()?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(())
            })
            .await
            .map_err(storage_err)
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>, ChunkError> {
        let query_json = serde_json::to_string(embedding)?;
        let (clauses, mut params) = filter_sql(filter);
        params.insert(0, query_json);
        let sql = format!(
            "SELECT data, vec_distance_cosine(vec_f32(embedding), vec_f32(?)) AS distance \
             FROM chunks WHERE embedding IS NOT NULL{clauses} \
             ORDER BY distance ASC LIMIT {top_k}"
        );

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        tokio_rusqlite::rusqlite::params_from_iter(params.iter()),
                        |row| {
                            let data: String = row.get(0)?;
                            let distance: f32 = row.get(1)?;
                            Ok((data, distance))
                        },
                    )?;

                let mut results = Vec::new();
                for row in rows {
                    let (data, distance) = row?;
                    if let Some(chunk) = decode_row(&data) {
                        results.push(ScoredChunk {
                            chunk,
                            similarity: (1.0 - distance).clamp(0.0, 1.0),
                        });
                    }
                }
                Ok::<_, tokio_rusqlite::rusqlite::Error>(results)
            })
            .await
            .map_err(storage_err)
    }

    async fn get_by_filter(&self, filter: &ChunkFilter) -> Result<Vec<DocumentChunk>, ChunkError> {
        let (clauses, params) = filter_sql(filter);
        let sql = format!(
            "SELECT data FROM chunks WHERE 1 = 1{clauses} ORDER BY document_id, position"
        );

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        tokio_rusqlite::rusqlite::params_from_iter(params.iter()),
                        |row| row.get::<_, String>(0),
                    )?;

                let mut results = Vec::new();
                for row in rows {
                    let data = row?;
                    if let Some(chunk) = decode_row(&data) {
                        results.push(chunk);
                    }
                }
                Ok::<_, tokio_rusqlite::rusqlite::Error>(results)
            })
            .await
            .map_err(storage_err)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<DocumentChunk>, ChunkError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let data: Option<String> = conn
                    .query_row("SELECT data FROM chunks WHERE id = ?", [&id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(data)
            })
            .await
            .map_err(storage_err)
            .map(|data| data.as_deref().and_then(decode_row))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize, ChunkError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                let deleted = conn
                    .execute("DELETE FROM chunks WHERE document_id = ?", [&document_id])?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(deleted)
            })
            .await
            .map_err(storage_err)
    }

    async fn count(&self) -> Result<usize, ChunkError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok::<_, tokio_rusqlite::rusqlite::Error>(count as usize)
            })
            .await
            .map_err(storage_err)
    }
}
