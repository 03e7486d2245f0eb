use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::note_repository::{ExternalIdField, NoteSyncRepository};
use crate::domain::services::external_ids;
use crate::infrastructure::persistence::Database;

/// Attempts before a contended external-id update gives up.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Writes note external-id bookkeeping one column at a time.
///
/// Each update is a compare-and-swap against the value just read, so a
/// concurrent edit of the same field is retried instead of overwritten and
/// the rest of the note row is never touched.
#[derive(Clone)]
pub struct SqlNoteSyncRepository {
    db: Database,
}

impl SqlNoteSyncRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Current field value, NULL read as empty.
    async fn read_field(&self, note_id: &str, field: ExternalIdField) -> DomainResult<String> {
        // Column names come from the ExternalIdField whitelist only
        let sql = format!("SELECT COALESCE({}, '') AS ids FROM notes WHERE id = ?", field.column());
        let row = sqlx::query(&sql)
            .bind(note_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("note {}", note_id)))?;
        let ids: String = row.try_get("ids")?;
        Ok(ids)
    }

    async fn compare_and_swap(
        &self,
        note_id: &str,
        field: ExternalIdField,
        expected: &str,
        next: &str,
    ) -> DomainResult<bool> {
        let sql = format!(
            "UPDATE notes SET {col} = ? WHERE id = ? AND COALESCE({col}, '') = ?",
            col = field.column()
        );
        let updated = sqlx::query(&sql)
            .bind(next)
            .bind(note_id)
            .bind(expected)
            .execute(self.db.pool())
            .await?
            .rows_affected();
        Ok(updated == 1)
    }

    async fn update_field<F>(&self, note_id: &str, field: ExternalIdField, edit: F) -> DomainResult<()>
    where
        F: Fn(Option<&str>) -> String + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.read_field(note_id, field).await?;
            let next = edit(Some(&current));
            if next == current {
                return Ok(());
            }
            if self.compare_and_swap(note_id, field, &current, &next).await? {
                debug!(note_id, column = field.column(), "Updated note external ids");
                return Ok(());
            }
        }
        Err(DomainError::Conflict(format!(
            "{} of note {} kept changing during update",
            field.column(),
            note_id
        )))
    }
}

#[async_trait]
impl NoteSyncRepository for SqlNoteSyncRepository {
    async fn external_ids(&self, note_id: &str, field: ExternalIdField) -> DomainResult<Vec<String>> {
        let current = self.read_field(note_id, field).await?;
        Ok(external_ids::parse(Some(&current)))
    }

    async fn append_external_id(&self, note_id: &str, field: ExternalIdField, entry: &str) -> DomainResult<()> {
        self.update_field(note_id, field, |current| external_ids::append(current, entry))
            .await
    }

    async fn remove_external_id(&self, note_id: &str, field: ExternalIdField, entry: &str) -> DomainResult<()> {
        self.update_field(note_id, field, |current| external_ids::remove(current, entry))
            .await
    }
}
