#[allow(non_snake_case)]
pub mod status_code;

#[macro_use]
pub mod strong_type;

pub mod address;
pub mod ids;

// Re-export commonly used items at the crate root.
pub use address::{Address, AddressParseError, AddressType};
pub use ids::*;
pub use status_code::*;
