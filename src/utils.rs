//! Utilities that are used across the `runqc` subcommands.

pub mod display;
pub mod globs;
pub mod num;
pub mod text;
