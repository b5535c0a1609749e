//! Deletion tombstones.
//!
//! A tombstone records that a row was hard-deleted so the deletion can be
//! replayed in the other silo. Recording is idempotent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use terrain_core::{TerrainResult, Tombstone, TombstoneScope, ValidationError};
use terrain_storage::TombstoneStore;

/// Records hard deletions for one store.
pub struct TombstoneRecorder {
    store: Arc<dyn TombstoneStore>,
    duplicates: AtomicU64,
}

impl TombstoneRecorder {
    pub fn new(store: Arc<dyn TombstoneStore>) -> Self {
        Self {
            store,
            duplicates: AtomicU64::new(0),
        }
    }

    /// Record that `identifier` was deleted from `table_name`.
    ///
    /// Recording the same deletion twice is not an error.
    ///
    /// # Errors
    ///
    /// `ValidationError` for an empty or over-long table name; store errors
    /// other than a uniqueness violation are propagated.
    #[tracing::instrument(skip(self), fields(scope = %scope))]
    pub async fn record_delete(
        &self,
        scope: TombstoneScope,
        table_name: &str,
        identifier: i64,
    ) -> TerrainResult<()> {
        if table_name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "table_name".to_string(),
            }
            .into());
        }
        let len = table_name.chars().count();
        if len > Tombstone::TABLE_NAME_MAX_LENGTH {
            return Err(ValidationError::TooLong {
                field: "table_name".to_string(),
                len,
                max: Tombstone::TABLE_NAME_MAX_LENGTH,
            }
            .into());
        }

        let tombstone = Tombstone::new(scope, table_name, identifier);
        match self.store.tombstone_insert(&tombstone).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_unique_violation() => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Tombstone already recorded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Number of `record_delete` calls that found the tombstone already present.
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }
}
