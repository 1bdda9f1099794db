pub mod dataset;
pub mod field;
pub mod grid;
pub mod table;
pub mod time;
pub mod variables;
