pub mod classifier;
pub mod config;
pub mod fid;
pub mod inception;
pub mod samples;
pub mod stats;

mod error;

pub use error::EvalError;
pub use fid::{compute_fid, frechet_distance};
pub use inception::{inception_score, score_generator};
pub use stats::GaussianStats;
