//! PostgreSQL driver.
//!
//! Parameterized statements go through the extended protocol; statements
//! without parameters use the simple protocol so multi-statement bodies
//! (procedure definitions) are accepted. Bulk appends stream text-format
//! `COPY ... FROM STDIN`.

mod connection;

pub use connection::PostgresConnection;
pub(crate) use connection::{acquire, connect_pool};
