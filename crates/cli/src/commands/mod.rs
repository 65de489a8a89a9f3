//! CLI subcommand implementations

pub mod monitors;
pub mod status;
