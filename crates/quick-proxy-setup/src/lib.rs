pub mod address;
pub mod config;
pub mod error;
pub mod executor;
pub mod mutator;
pub mod planner;
pub mod region;
pub mod targets;

pub use error::{Error, ErrorKind, Result};
