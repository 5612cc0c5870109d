use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::tables_model::{validate_table_name, NewTableRow, MAX_SNAPSHOT_ROWS};
use super::tables_traits::{TableRepositoryTrait, TableServiceTrait};
use crate::errors::{Result, SnapshotFetchError, ValidationError};
use crate::events::{DomainEvent, DomainEventSink};
use crate::live::{Payload, SnapshotQuery, SnapshotSource};

/// Row writes and snapshot reads over a table repository.
///
/// Every successful insert emits [`DomainEvent::RowInserted`], which the
/// host turns into a realtime publish.
pub struct TableService {
    repository: Arc<dyn TableRepositoryTrait>,
    event_sink: Arc<dyn DomainEventSink>,
}

impl TableService {
    pub fn new(
        repository: Arc<dyn TableRepositoryTrait>,
        event_sink: Arc<dyn DomainEventSink>,
    ) -> Self {
        TableService {
            repository,
            event_sink,
        }
    }

    /// Takes the payload's own id, or assigns a UUID when it has none.
    fn resolve_id(payload: &mut Value) -> Result<String> {
        let has_id = payload.get("id").is_some_and(|v| !v.is_null());
        if has_id {
            return Payload::new(payload)
                .and_then(|fields| fields.id("id"))
                .map_err(|e| ValidationError::InvalidInput(e.to_string()).into());
        }
        match payload.as_object_mut() {
            Some(fields) => {
                let id = Uuid::new_v4().to_string();
                fields.insert("id".to_string(), Value::String(id.clone()));
                Ok(id)
            }
            None => Err(ValidationError::InvalidInput(
                "row payload must be a JSON object".to_string(),
            )
            .into()),
        }
    }

    fn bounded(query: &SnapshotQuery) -> SnapshotQuery {
        let mut query = query.clone();
        query.limit = Some(query.limit.unwrap_or(MAX_SNAPSHOT_ROWS).min(MAX_SNAPSHOT_ROWS));
        query
    }
}

#[async_trait]
impl TableServiceTrait for TableService {
    fn list_rows(&self, query: &SnapshotQuery) -> Result<Vec<Value>> {
        validate_table_name(&query.table)?;
        let rows = self.repository.list_rows(&Self::bounded(query))?;
        Ok(rows.into_iter().map(|row| row.payload).collect())
    }

    async fn insert_row(&self, table: &str, mut payload: Value) -> Result<Value> {
        validate_table_name(table)?;
        let id = Self::resolve_id(&mut payload)?;

        let row = self
            .repository
            .insert_row(NewTableRow {
                table: table.to_string(),
                id,
                payload,
            })
            .await?;
        log::debug!("Inserted row '{}' into '{}'", row.id, row.table);

        self.event_sink
            .emit(DomainEvent::row_inserted(row.table.clone(), row.payload.clone()));
        Ok(row.payload)
    }
}

#[async_trait]
impl SnapshotSource for TableService {
    async fn fetch(
        &self,
        query: &SnapshotQuery,
    ) -> std::result::Result<Vec<Value>, SnapshotFetchError> {
        self.list_rows(query)
            .map_err(|e| SnapshotFetchError::new(query.table.clone(), e.to_string()))
    }
}
