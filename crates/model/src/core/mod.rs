pub mod identifiers;
pub mod utils;
pub mod value;
