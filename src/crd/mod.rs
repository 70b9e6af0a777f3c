mod dormant_database;
mod mysql;
mod mysql_version;
mod snapshot;

pub use dormant_database::*;
pub use mysql::*;
pub use mysql_version::*;
pub use snapshot::*;
