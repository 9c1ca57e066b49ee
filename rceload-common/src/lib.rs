//! Common types for rceload
//!
//! This crate provides the pieces shared by the generator, the codec and the
//! dispatchers:
//! - `event`: the synthetic event model
//! - `distributions`: seeded statistical distributions used to shape events

pub mod distributions;
pub mod event;

pub use distributions::{
    Distribution, MixtureDistribution, SkewedClassDistribution, UniformDistribution,
};

pub use event::{ClassLabel, SyntheticEvent};
