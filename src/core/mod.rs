pub mod error;
pub mod value;

pub use error::{Result, WorkloadError};
pub use value::Value;
