//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server, used for both sides of the copy

pub mod mssql;

pub use mssql::MssqlBackend;
