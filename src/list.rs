//! The `runqc list` area: tables of the auto-QC checks and pipeline dialects
//! the tracker supports.

pub mod command;
