//! Tables module - backend rows feeding snapshots and realtime events.

mod tables_model;
mod tables_service;
mod tables_traits;

pub use tables_model::{validate_table_name, NewTableRow, TableRow, MAX_SNAPSHOT_ROWS};
pub use tables_service::TableService;
pub use tables_traits::{TableRepositoryTrait, TableServiceTrait};
