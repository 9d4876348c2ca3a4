mod catalog;
mod database;
mod log;

pub mod btree;
pub mod concurrent_status;
pub mod error;
pub mod io;
pub mod predicate;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod utils;

pub use btree::table::{BTreeTable, BTreeTableIterator, BTreeTableSearchIterator};
pub use catalog::Catalog;
pub use database::Database;
pub use error::OakError;
pub use predicate::{Op, Predicate};
pub use storage::schema::{small_int_schema, Schema};
