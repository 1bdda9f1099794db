pub mod cache;
pub mod derive;
pub mod fetch;
pub mod harmonize;
pub mod mask;
pub mod pipeline;
pub mod predict;
pub mod temporal;
