//! Command Line Interface (CLI) layer for canopyjoin.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the dispatch of each subcommand (`runner`) onto the library.
//!
//! If you are embedding canopyjoin into another application, prefer using
//! the high-level `canopyjoin::api` module instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
