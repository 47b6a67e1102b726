//! CLI subcommand implementations.

pub mod check;
pub mod clusters;
pub mod up;
