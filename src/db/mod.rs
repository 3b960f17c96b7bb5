pub mod connection;
pub mod legacy;
pub mod migration_runner;
pub mod row;

pub use connection::Database;
pub use legacy::ReconcileReport;
