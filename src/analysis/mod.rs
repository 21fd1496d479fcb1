pub mod failure;

pub use failure::{FailureAnalyzer, FailureExtract};
