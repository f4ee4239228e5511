//! Pieces shared by more than one driver.
//!
//! - [`tls`]: libpq-style `ssl_mode` parsing (PostgreSQL and MySQL, plus
//!   config validation) and the rustls connector for PostgreSQL

pub mod tls;

pub use tls::SslMode;
