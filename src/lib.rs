//! Two small compute demos over a pluggable compute backend: `hello` writes
//! a string into a device buffer, `vecadd` adds two integer vectors.

pub mod backend;
pub mod config;
pub mod discovery;
mod error;
pub mod hello;
pub mod resource;
pub mod vecadd;

pub use error::{Error, OptionExt, Result, EXIT_COMPUTE, EXIT_CONFIG};
