//! Command implementations for the binforge CLI.

pub mod build;
pub mod cache;
pub mod download;
pub mod list;
