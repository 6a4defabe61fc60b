use async_trait::async_trait;
use ng_edge_error::{storage::StorageError, StorageResult};
use ng_edge_models::IdentityStore;
use redb::{Database, ReadableTable, TableDefinition};
use std::{path::Path, sync::Arc};
use tokio::task;

const IDENTITIES: TableDefinition<&str, &str> = TableDefinition::new("identities");

/// Embedded identity store backed by a single-table redb database.
///
/// All operations run on the blocking pool; the database handle is shared
/// across tasks. Writes are committed per operation, which is cheap at the
/// cache's mutation rate and keeps the mirror crash-consistent.
pub struct RedbIdentityStore {
    db: Arc<Database>,
}

impl RedbIdentityStore {
    /// Open (or create) the store at `path` and ensure the table exists.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        txn.open_table(IDENTITIES)?;
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn run_blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Database>) -> StorageResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || op(db))
            .await
            .map_err(|e| StorageError::TaskAborted(e.to_string()))?
    }
}

#[async_trait]
impl IdentityStore for RedbIdentityStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(IDENTITIES)?;
            Ok(table.get(key.as_str())?.map(|v| v.value().to_string()))
        })
        .await
    }

    async fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(IDENTITIES)?;
                table.insert(key.as_str(), value.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.run_blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(IDENTITIES)?;
                table.remove(key.as_str())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn entries(&self) -> StorageResult<Vec<(String, String)>> {
        self.run_blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(IDENTITIES)?;
            let mut out = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                out.push((k.value().to_string(), v.value().to_string()));
            }
            Ok(out)
        })
        .await
    }
}
