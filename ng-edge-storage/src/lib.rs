mod memory;
mod redb_store;

pub use memory::MemoryIdentityStore;
pub use redb_store::RedbIdentityStore;

use ng_edge_models::IdentityStore;
use std::{path::Path, sync::Arc};
use tracing::warn;

/// Open the identity store at `path`, falling back to an in-memory store
/// when the database cannot be opened.
///
/// A hub running on the memory fallback still works; it just loses the
/// warm-start mirror across restarts.
pub fn open_identity_store(path: &Path) -> Arc<dyn IdentityStore> {
    match RedbIdentityStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to open identity store, using in-memory");
            Arc::new(MemoryIdentityStore::new())
        }
    }
}
