//! Command-line surface.

pub mod cli;
