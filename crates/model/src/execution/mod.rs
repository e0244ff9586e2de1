pub mod context;
pub mod timestamp;
