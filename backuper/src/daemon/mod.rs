//! Process lifecycle for the CLI.

pub mod shutdown;
