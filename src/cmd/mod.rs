//! CLI-mode subcommands

pub mod progress;
pub mod update;
pub mod version;
