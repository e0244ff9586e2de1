pub mod columnar;
pub mod row;
