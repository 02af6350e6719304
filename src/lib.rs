//! Tree views of container checkpoint archives

mod helpers;
mod prelude;

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod local_logger;
pub mod render;
pub mod tree;
