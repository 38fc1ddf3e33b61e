#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # regop
//!
//! Command-line front end for the registry finalizer.

pub use regop_finalizer;

pub mod cli;
pub mod simulate;
