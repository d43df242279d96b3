//! Command implementations for the `sift` CLI.

pub mod checkpoints;
pub mod params;
pub mod run;
pub mod selection;
pub mod validate;
