mod executor;
mod script;
mod types;

pub use executor::*;
pub use types::*;
