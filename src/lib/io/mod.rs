pub mod helpers;
pub mod readers;
pub mod statics;
pub mod tables;
