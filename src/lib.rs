mod attribute_value;
mod bucketing;
mod condition;
mod config;
pub mod dto;
mod error;
mod eval;
mod flag;
mod key;
mod matcher;
mod segment;
mod store;
mod test_common;

pub use attribute_value::*;
pub use bucketing::*;
pub use condition::*;
pub use config::*;
pub use error::*;
pub use eval::*;
pub use flag::*;
pub use key::*;
pub use matcher::*;
pub use segment::*;
pub use store::*;
