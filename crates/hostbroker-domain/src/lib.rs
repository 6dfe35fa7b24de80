pub mod error;
pub mod types;


pub use error::{from_aws_code, DomainError};
pub use types::*;
