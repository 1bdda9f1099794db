pub mod constants;
pub mod error;
pub mod io;
pub mod models;
pub mod modules;
pub mod version;

pub use error::{ErrorReport, RosError, RosResult};
