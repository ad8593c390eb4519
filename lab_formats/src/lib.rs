//! lab_formats
//!
//! Files exchanged with instruments: Echo pick lists, Illumina sample sheets,
//! and the CSV plate layouts and readings typed in at the bench.

// Warning groups
#![deny(future_incompatible, nonstandard_style, rust_2018_idioms)]

pub mod echo;
pub mod layout;
pub mod sample_sheet;
