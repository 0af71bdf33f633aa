//! Persistence gateway
//!
//! Trait-based abstraction over the durable store. The engine owns all live
//! state in memory; the gateway is written through and read at startup.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with additive migrations
//! - **In-Memory**: No durability, for tests and `"backend": "none"`
//!
//! ## Failure policy
//!
//! Writes on the monitoring path go through [`persist_with_retry`]: one retry,
//! then an error log. In-memory state stays authoritative until the next
//! successful write.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, warn};

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, PersistenceGateway};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryGateway;
pub use schema::{HistoryQuery, PurgeStats, StatusSnapshot};

use crate::config::StorageConfig;

/// Shared gateway handle
pub type SharedGateway = Arc<dyn PersistenceGateway>;

/// Open the gateway selected by the configuration
pub async fn open_gateway(config: &StorageConfig) -> StorageResult<SharedGateway> {
    match config {
        StorageConfig::None => Ok(Arc::new(MemoryGateway::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteGateway::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}

/// Run a write, retry it once on failure, then give up with an error log
///
/// Returns whether the write eventually succeeded.
pub async fn persist_with_retry<F, Fut>(what: &str, op: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = StorageResult<()>>,
{
    match op().await {
        Ok(()) => true,
        Err(first) => {
            warn!(error = %first, "{what} failed, retrying once");
            match op().await {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "{what} failed after retry");
                    false
                }
            }
        }
    }
}
