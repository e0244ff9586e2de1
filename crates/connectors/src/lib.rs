pub mod broker;
pub mod error;
pub mod secrets;
pub mod sql;
