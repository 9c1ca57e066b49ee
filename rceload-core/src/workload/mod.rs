//! Workload generation

pub mod generator;

// Re-export distributions from rceload-common
pub use rceload_common::distributions;
pub use rceload_common::{
    Distribution, MixtureDistribution, SkewedClassDistribution, UniformDistribution,
};

pub use generator::{
    generate, DistributionSpec, EventCount, EventGenerator, SyntheticDataset, CLASS_SPACING,
    FEATURE_SIGMA,
};
