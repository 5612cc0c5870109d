use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::SqliteConnection;
use std::sync::Arc;

use bizdesk_core::live::SnapshotQuery;
use bizdesk_core::tables::{NewTableRow, TableRepositoryTrait, TableRow};
use bizdesk_core::Result;

use super::model::{NewTableRowDB, TableRowDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::table_rows;

/// Rows scanned per round trip when field filters are applied in memory.
const FILTER_SCAN_BATCH: i64 = 500;

pub struct TableRowRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl TableRowRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        TableRowRepository { pool, writer }
    }

    fn load_page(
        conn: &mut SqliteConnection,
        table: &str,
        before_seq: Option<i32>,
        limit: i64,
    ) -> Result<Vec<TableRowDB>> {
        let mut query = table_rows::table
            .filter(table_rows::table_name.eq(table))
            .into_boxed();
        if let Some(seq) = before_seq {
            query = query.filter(table_rows::seq.lt(seq));
        }
        query
            .order(table_rows::seq.desc())
            .limit(limit)
            .select(TableRowDB::as_select())
            .load::<TableRowDB>(conn)
            .into_core()
    }
}

#[async_trait]
impl TableRepositoryTrait for TableRowRepository {
    fn list_rows(&self, query: &SnapshotQuery) -> Result<Vec<TableRow>> {
        let mut conn = get_connection(&self.pool)?;
        let limit = query.limit.unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }

        if query.filters.is_empty() {
            let page_size = i64::try_from(limit).unwrap_or(i64::MAX);
            return Self::load_page(&mut conn, &query.table, None, page_size)?
                .into_iter()
                .map(TableRow::try_from)
                .collect();
        }

        // Filters match JSON fields, so walk the table newest-first in pages.
        let mut rows = Vec::new();
        let mut cursor = None;
        loop {
            let page = Self::load_page(&mut conn, &query.table, cursor, FILTER_SCAN_BATCH)?;
            let exhausted = (page.len() as i64) < FILTER_SCAN_BATCH;
            cursor = page.last().map(|r| r.seq);

            for db_row in page {
                let row = TableRow::try_from(db_row)?;
                if query.matches(&row.payload) {
                    rows.push(row);
                    if rows.len() == limit {
                        return Ok(rows);
                    }
                }
            }
            if exhausted {
                return Ok(rows);
            }
        }
    }

    async fn insert_row(&self, new_row: NewTableRow) -> Result<TableRow> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<TableRow> {
                let row_db = NewTableRowDB::from_domain(new_row, Utc::now())?;
                let inserted = diesel::insert_into(table_rows::table)
                    .values(&row_db)
                    .returning(TableRowDB::as_returning())
                    .get_result(conn)
                    .map_err(StorageError::from)?;
                TableRow::try_from(inserted)
            })
            .await
    }
}
