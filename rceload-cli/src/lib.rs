//! rceload CLI library
//!
//! Profile configuration, the experiment runner and results output, exposed
//! for the `rceload` binary and the integration tests.

pub mod config;
pub mod output;
pub mod runner;
