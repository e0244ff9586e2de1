pub mod extract;
pub mod listing;
pub mod load;
pub mod remote;
