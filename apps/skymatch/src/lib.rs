//! # skymatch
//!
//! Library surface of the skymatch binary, exposed for integration tests.
//!
//! - [`cli`]: argument parsing and command implementations

pub mod cli;
