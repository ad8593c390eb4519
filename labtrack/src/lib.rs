//! labtrack
//!
//! Command line front end of the provenance store: one subcommand per lab
//! step, plus the exports instruments consume.

// Warning groups
#![deny(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]

pub mod cli;
mod exports;
mod labware;
pub mod mylog;
mod steps;
pub mod utils;

pub use cli::{Cli, SubCommand};
