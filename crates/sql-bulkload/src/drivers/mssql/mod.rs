//! SQL Server driver.

mod connection;

pub use connection::MssqlConnection;
pub(crate) use connection::{acquire, connect_pool, MssqlPool};
