pub mod config;
pub mod error;
pub mod extraction;
pub mod model;
pub mod retrieval;
pub mod runtime;
pub mod tasks;
pub mod util;
