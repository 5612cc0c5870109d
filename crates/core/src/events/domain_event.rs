//! Domain event types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Domain events emitted by core services after successful mutations.
///
/// Runtime adapters translate them into platform-specific actions, such as
/// publishing the change on the realtime hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A row was inserted into a backend table.
    RowInserted { table: String, row: Value },
}

impl DomainEvent {
    /// Creates a RowInserted event.
    pub fn row_inserted(table: impl Into<String>, row: Value) -> Self {
        Self::RowInserted {
            table: table.into(),
            row,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            DomainEvent::RowInserted { table, .. } => table,
        }
    }
}
