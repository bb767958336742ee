use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    Apply, Committed, DocumentStore, StoreError, Transition, document_id, expire_at,
    stamp_created_at,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// Durable store on a single SQLite file. `transact` opens a BEGIN IMMEDIATE
// transaction so the write lock is held from the read through the write, which
// also serializes other connections and processes sharing the same file.
// Every call runs on the blocking pool, a locked database never stalls the runtime.
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path, flags)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(connection)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(connection: Connection) -> Result<Self, StoreError> {
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                expire_at INTEGER,
                PRIMARY KEY (collection, id)
            );
            CREATE INDEX IF NOT EXISTS idx_documents_expire_at
                ON documents (collection, expire_at);",
        )?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_string()))?;
            op(&mut guard)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("sqlite task join failed: {err}")))?
    }
}

fn select_body(
    connection: &Connection,
    collection: &str,
    id: &str,
) -> Result<Option<Value>, StoreError> {
    let body: Option<String> = connection
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(body.map(|b| serde_json::from_str::<Value>(&b)).transpose()?)
}

fn upsert(
    connection: &Connection,
    collection: &str,
    id: &str,
    document: &Value,
) -> Result<(), StoreError> {
    connection.execute(
        "INSERT INTO documents (collection, id, body, expire_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body, expire_at = excluded.expire_at",
        params![collection, id, serde_json::to_string(document)?, expire_at(document)],
    )?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn transact(
        &self,
        collection: &str,
        id: &str,
        apply: Apply,
    ) -> Result<Committed, StoreError> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.blocking(move |connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = select_body(&tx, &collection, &id)?;

            match apply(current.as_ref()) {
                Transition::Put(document) => {
                    upsert(&tx, &collection, &id, &document)?;
                    tx.commit()?;
                    Ok(Committed::Written(document))
                }
                // dropping the transaction rolls it back
                Transition::Abort => Ok(Committed::Aborted),
            }
        })
        .await
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<String, StoreError> {
        let document = stamp_created_at(document, Utc::now().timestamp_millis())?;
        let collection = collection.to_string();
        let id = document_id(&collection);
        self.blocking(move |connection| {
            upsert(connection, &collection, &id, &document)?;
            Ok(id)
        })
        .await
    }

    #[cfg(test)]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.blocking(move |connection| select_body(connection, &collection, &id))
            .await
    }

    async fn purge_expired(&self, collection: &str, now_ms: i64) -> Result<u64, StoreError> {
        let collection = collection.to_string();
        self.blocking(move |connection| {
            let removed = connection.execute(
                "DELETE FROM documents WHERE collection = ?1 AND expire_at IS NOT NULL AND expire_at < ?2",
                params![collection, now_ms],
            )?;
            Ok(removed as u64)
        })
        .await
    }
}
