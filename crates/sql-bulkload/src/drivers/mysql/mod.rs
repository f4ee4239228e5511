//! MySQL/MariaDB driver.

mod connection;

pub use connection::MysqlConnection;
pub(crate) use connection::{acquire, connect_pool};
