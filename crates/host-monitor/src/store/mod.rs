//! SQLite-backed measurement store implementing the query and write clients.

mod connection;
pub mod ingest;
pub mod query;
pub mod readonly;
pub mod schema;

pub use connection::Store;
