pub mod error;
pub mod record;
pub mod types;
pub mod value;

pub use error::{RepoError, Result};
pub use record::{Key, from_record, to_record};
pub use types::{Column, DataType, Record, TableSchema};
pub use value::Value;
