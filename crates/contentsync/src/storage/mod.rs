mod sql_utils;
mod sqlite;
mod storage_trait;

pub use sqlite::{DbPool, SqliteRecordStore};
pub use storage_trait::{EntityQuery, RecordStore};
