//! Database module - SQLite with sqlx

mod pool;
mod sessions;

pub use pool::*;
pub use sessions::*;
