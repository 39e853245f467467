mod entries;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::{sha256_hex, DatabaseError, Entry, Feed, NewEntry};
