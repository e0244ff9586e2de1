pub mod error;
pub mod loader;
pub mod render;
pub mod retry;
pub mod sink;
pub mod tasks;
