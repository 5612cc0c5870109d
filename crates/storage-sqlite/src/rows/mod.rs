//! SQLite storage implementation for table rows.

mod model;
mod repository;

pub use model::{NewTableRowDB, TableRowDB};
pub use repository::TableRowRepository;
