pub mod connection;
pub mod error;
pub mod query;
pub mod script_file;

pub use connection::*;
pub use error::*;
pub use query::*;
pub use script_file::*;
