//! CLI command implementations.
//!
//! Each submodule implements an autojudge subcommand, keeping formatting
//! pure and doing IO only at the top level.

pub mod clean;
pub mod image;
pub mod languages;
pub mod run;
