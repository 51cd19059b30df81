#![recursion_limit = "256"]

pub mod args_file;
pub mod checkpoint;
pub mod compare;
pub mod config;
pub mod message;
pub mod train_stream;

#[cfg(test)]
mod integration_tests;
