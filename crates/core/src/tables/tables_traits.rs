use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;
use crate::live::SnapshotQuery;
use crate::tables::tables_model::{NewTableRow, TableRow};

/// Trait for table row repository operations
#[async_trait]
pub trait TableRepositoryTrait: Send + Sync {
    /// Rows newest-first, filtered and limited per `query`.
    fn list_rows(&self, query: &SnapshotQuery) -> Result<Vec<TableRow>>;
    async fn insert_row(&self, new_row: NewTableRow) -> Result<TableRow>;
}

/// Trait for table service operations
#[async_trait]
pub trait TableServiceTrait: Send + Sync {
    fn list_rows(&self, query: &SnapshotQuery) -> Result<Vec<Value>>;
    async fn insert_row(&self, table: &str, payload: Value) -> Result<Value>;
}
