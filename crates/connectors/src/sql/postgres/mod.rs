pub mod connection;
pub mod decode;
pub mod params;
pub mod utils;
