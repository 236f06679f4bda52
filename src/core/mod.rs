pub mod types;
pub mod validation;

pub use types::*;
pub use validation::{detect_duplicate_ids, validate_string_id};
