#![recursion_limit = "256"]

pub mod aggregate;
pub mod config;
pub mod discriminator;
pub mod gan;
pub mod generator;
pub mod loss;
pub mod msg;
pub mod projection;
pub mod train;

mod grads;
