//! Synthetic event generation
//!
//! A `SyntheticDataset` fixes the per-class feature centroids once per run.
//! Each logical client then draws its own forward-only `EventGenerator` from
//! the dataset: a class from the skewed class distribution, then one reading
//! per feature around that class's centroid.
//!
//! Centroids sit `CLASS_SPACING` apart per class index with a per-feature
//! offset in `[-50, 50)`, and readings scatter around them with spread
//! `FEATURE_SIGMA`, so events of one class cluster tightly while different
//! classes stay well separated.

use crate::seed::{components, derive_seed};
use crate::{Error, Result};
use rceload_common::{
    ClassLabel, Distribution, MixtureDistribution, SkewedClassDistribution, SyntheticEvent,
    UniformDistribution,
};
use rceload_protocols::wire::MAX_FEATURES;
use serde::Serialize;
use std::iter::FusedIterator;
use std::sync::Arc;

/// Distance between the centroids of consecutive classes
pub const CLASS_SPACING: f64 = 100.0;

/// Spread of feature readings around their centroid
pub const FEATURE_SIGMA: f64 = 10.0;

/// Half-width of the per-feature centroid offset
const OFFSET_RANGE: f64 = 50.0;

/// Share of readings drawn from the uniform noise component
const NOISE_WEIGHT: f64 = 0.5;

/// Validated generation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistributionSpec {
    class_count: u32,
    feature_count: u32,
    skew: f64,
    discrete: bool,
}

impl DistributionSpec {
    /// Validate and build a spec
    ///
    /// Fails with `Error::InvalidSpec` when either count is zero, the feature
    /// count exceeds what the wire format carries, or `skew` is outside
    /// `[0, 1]`.
    pub fn new(class_count: u32, feature_count: u32, skew: f64) -> Result<Self> {
        if class_count < 1 {
            return Err(Error::InvalidSpec("class count must be at least 1".to_string()));
        }
        if feature_count < 1 {
            return Err(Error::InvalidSpec("feature count must be at least 1".to_string()));
        }
        if feature_count > MAX_FEATURES {
            return Err(Error::InvalidSpec(format!(
                "feature count {feature_count} exceeds the wire limit of {MAX_FEATURES}"
            )));
        }
        if !(0.0..=1.0).contains(&skew) {
            return Err(Error::InvalidSpec(format!("skew must be in [0.0, 1.0], got {skew}")));
        }

        Ok(Self { class_count, feature_count, skew, discrete: false })
    }

    /// Round every feature reading to the nearest integer
    pub fn with_discrete(mut self, discrete: bool) -> Self {
        self.discrete = discrete;
        self
    }

    pub fn class_count(&self) -> u32 {
        self.class_count
    }

    pub fn feature_count(&self) -> u32 {
        self.feature_count
    }

    pub fn skew(&self) -> f64 {
        self.skew
    }

    pub fn discrete(&self) -> bool {
        self.discrete
    }
}

/// Number of events a generator yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCount {
    Finite(u64),
    Unbounded,
}

impl From<Option<u64>> for EventCount {
    fn from(count: Option<u64>) -> Self {
        match count {
            Some(n) => EventCount::Finite(n),
            None => EventCount::Unbounded,
        }
    }
}

/// Immutable per-run dataset shared by all clients
///
/// Cloning is cheap; the centroid table is reference counted.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    spec: DistributionSpec,
    /// `centroids[class][feature]`
    centroids: Arc<[Vec<f64>]>,
}

impl SyntheticDataset {
    /// Fix the class centroids for `spec`
    ///
    /// The same seed yields the same centroids; `None` draws them from OS
    /// entropy.
    pub fn new(spec: DistributionSpec, seed: Option<u64>) -> Result<Self> {
        let mut offsets = UniformDistribution::with_seed(-OFFSET_RANGE, OFFSET_RANGE, seed)?;
        let offsets: Vec<f64> = (0..spec.feature_count).map(|_| offsets.sample()).collect();

        let centroids: Arc<[Vec<f64>]> = (0..spec.class_count)
            .map(|class| {
                let base = f64::from(class) * CLASS_SPACING;
                offsets.iter().map(|offset| base + offset).collect::<Vec<f64>>()
            })
            .collect();

        Ok(Self { spec, centroids })
    }

    pub fn spec(&self) -> &DistributionSpec {
        &self.spec
    }

    /// Centroid of `class`, one value per feature
    pub fn centroid(&self, class: ClassLabel) -> Option<&[f64]> {
        self.centroids.get(class as usize).map(Vec::as_slice)
    }

    /// Start an independent event stream over this dataset
    pub fn events(&self, count: impl Into<EventCount>, seed: Option<u64>) -> Result<EventGenerator> {
        EventGenerator::new(self.clone(), count.into(), seed)
    }
}

/// Forward-only stream of synthetic events
///
/// Restarting a stream means building a new generator; with the same dataset
/// and seed it reproduces the same events.
pub struct EventGenerator {
    dataset: SyntheticDataset,
    classes: SkewedClassDistribution,
    noise: MixtureDistribution,
    remaining: Option<u64>,
    produced: u64,
}

impl EventGenerator {
    fn new(dataset: SyntheticDataset, count: EventCount, seed: Option<u64>) -> Result<Self> {
        let spec = dataset.spec;
        let classes = SkewedClassDistribution::with_seed(
            spec.class_count,
            spec.skew,
            seed.map(|s| derive_seed(s, components::CLASS_SELECTION)),
        )?;
        // Centred on zero; each reading is shifted onto its centroid
        let noise = MixtureDistribution::with_seed(
            0.0,
            FEATURE_SIGMA,
            NOISE_WEIGHT,
            seed.map(|s| derive_seed(s, components::FEATURE_NOISE)),
        )?;

        let remaining = match count {
            EventCount::Finite(n) => Some(n),
            EventCount::Unbounded => None,
        };

        Ok(Self { dataset, classes, noise, remaining, produced: 0 })
    }

    /// Number of events yielded so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn spec(&self) -> &DistributionSpec {
        &self.dataset.spec
    }

    fn draw(&mut self) -> SyntheticEvent {
        let class = self.classes.sample_class();
        let discrete = self.dataset.spec.discrete;
        let centroid = &self.dataset.centroids[class as usize];

        let features = centroid
            .iter()
            .map(|mu| {
                let value = mu + self.noise.sample();
                if discrete {
                    value.round()
                } else {
                    value
                }
            })
            .collect();

        SyntheticEvent::new(class, features)
    }
}

impl Iterator for EventGenerator {
    type Item = SyntheticEvent;

    fn next(&mut self) -> Option<SyntheticEvent> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        self.produced += 1;
        Some(self.draw())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining {
            Some(n) => {
                let n = usize::try_from(n).unwrap_or(usize::MAX);
                (n, Some(n))
            }
            None => (usize::MAX, None),
        }
    }
}

impl FusedIterator for EventGenerator {}

/// Generate `count` events for `spec`
///
/// One-shot form of `SyntheticDataset::new` followed by `events`: the
/// dataset and the stream both derive their seeds from `seed`.
pub fn generate(
    spec: DistributionSpec,
    count: impl Into<EventCount>,
    seed: Option<u64>,
) -> Result<EventGenerator> {
    let dataset = SyntheticDataset::new(spec, seed.map(|s| derive_seed(s, components::DATASET)))?;
    dataset.events(count, seed.map(|s| crate::seed::client_seed(s, 0)))
}
