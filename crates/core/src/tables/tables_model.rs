//! Table row domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, ValidationError};

/// Upper bound on rows returned by one snapshot read.
pub const MAX_SNAPSHOT_ROWS: usize = 1000;

/// A stored row. `payload` always carries the row's `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub table: String,
    pub id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Input model for inserting a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTableRow {
    pub table: String,
    pub id: String,
    pub payload: Value,
}

/// Lowercase ASCII letters, digits and underscores; must start with a letter.
pub fn validate_table_name(table: &str) -> Result<()> {
    let valid = table.len() <= 64
        && table.starts_with(|c: char| c.is_ascii_lowercase())
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidTableName(table.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("geo_threats").is_ok());
        assert!(validate_table_name("sales2").is_ok());
        for bad in ["", "Sales", "2sales", "sales; drop", "../etc"] {
            assert!(validate_table_name(bad).is_err(), "{bad} should be rejected");
        }
    }
}
