//! Database models for table rows.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use bizdesk_core::errors::{Error, Result};
use bizdesk_core::tables::{NewTableRow, TableRow};

/// Database model for a stored row. `payload` holds the JSON document.
#[derive(Queryable, Identifiable, Selectable, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::table_rows)]
#[diesel(primary_key(seq))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TableRowDB {
    pub seq: i32,
    pub table_name: String,
    pub row_id: String,
    pub payload: String,
    pub created_at: String,
}

/// Database model for inserting a row.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::table_rows)]
pub struct NewTableRowDB {
    pub table_name: String,
    pub row_id: String,
    pub payload: String,
    pub created_at: String,
}

impl NewTableRowDB {
    pub fn from_domain(row: NewTableRow, created_at: DateTime<Utc>) -> Result<Self> {
        Ok(NewTableRowDB {
            table_name: row.table,
            row_id: row.id,
            payload: serde_json::to_string(&row.payload)?,
            created_at: created_at.to_rfc3339(),
        })
    }
}

impl TryFrom<TableRowDB> for TableRow {
    type Error = Error;

    fn try_from(db: TableRowDB) -> Result<Self> {
        Ok(TableRow {
            payload: serde_json::from_str(&db.payload)?,
            created_at: DateTime::parse_from_rfc3339(&db.created_at)?.with_timezone(&Utc),
            table: db.table_name,
            id: db.row_id,
        })
    }
}
