//! Statistical distributions for event generation
//!
//! Provides the seeded distributions the generator composes:
//! - Class selection (skewed, Zipf-like over a small set of classes)
//! - Class-conditional feature readings (Normal with uniform noise)
//!
//! Every distribution owns its random number generator. Passing the same
//! seed reproduces the same sample sequence; passing `None` seeds from OS
//! entropy.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as RandDistribution, Normal, Uniform};

/// Trait for all distributions
pub trait Distribution: Send {
    /// Sample a value from this distribution
    fn sample(&mut self) -> f64;

    /// Get distribution name
    fn name(&self) -> &'static str;
}

fn make_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(s) => SmallRng::seed_from_u64(s),
        None => SmallRng::from_os_rng(),
    }
}

/// Skewed class selection over `[0, n)`
///
/// Weights follow a truncated Zipf law `w_k = (k + 1)^(-theta)` with
/// `theta = skew / (1 - skew)`:
/// - skew = 0.0: uniform over all classes
/// - skew = 0.5: classic Zipf (theta = 1)
/// - skew = 1.0: every draw selects class 0
///
/// A uniform draw is mapped to the first class whose cumulative weight
/// exceeds it, so the mapping is monotone in the draw.
#[derive(Debug, Clone)]
pub struct SkewedClassDistribution {
    skew: f64,
    /// Cumulative probabilities, last entry is exactly 1.0
    cdf: Vec<f64>,
    rng: SmallRng,
}

impl SkewedClassDistribution {
    /// Create a new skewed class distribution with entropy-based seed
    pub fn new(n: u32, skew: f64) -> anyhow::Result<Self> {
        Self::with_seed(n, skew, None)
    }

    /// Create a new skewed class distribution with explicit seed
    pub fn with_seed(n: u32, skew: f64, seed: Option<u64>) -> anyhow::Result<Self> {
        let probabilities = Self::class_probabilities(n, skew)?;

        let mut cdf = Vec::with_capacity(probabilities.len());
        let mut acc = 0.0;
        for p in probabilities {
            acc += p;
            cdf.push(acc);
        }
        if let Some(last) = cdf.last_mut() {
            *last = 1.0;
        }

        Ok(Self { skew, cdf, rng: make_rng(seed) })
    }

    /// Exact selection probability of every class for the given skew
    pub fn class_probabilities(n: u32, skew: f64) -> anyhow::Result<Vec<f64>> {
        if n == 0 {
            anyhow::bail!("Class count must be > 0");
        }
        if !(0.0..=1.0).contains(&skew) {
            anyhow::bail!("Skew must be in [0.0, 1.0], got {skew}");
        }

        let weights: Vec<f64> = if skew >= 1.0 {
            (0..n).map(|k| if k == 0 { 1.0 } else { 0.0 }).collect()
        } else {
            let theta = skew / (1.0 - skew);
            (0..n).map(|k| (f64::from(k) + 1.0).powf(-theta)).collect()
        };

        let total: f64 = weights.iter().sum();
        Ok(weights.into_iter().map(|w| w / total).collect())
    }

    /// Map a uniform draw in `[0, 1)` to a class index
    pub fn class_for(&self, u: f64) -> u32 {
        let idx = self.cdf.partition_point(|&c| c <= u);
        idx.min(self.cdf.len() - 1) as u32
    }

    /// Draw a class index in `[0, n)`
    pub fn sample_class(&mut self) -> u32 {
        let u: f64 = self.rng.random();
        self.class_for(u)
    }

    pub fn skew(&self) -> f64 {
        self.skew
    }
}

impl Distribution for SkewedClassDistribution {
    fn sample(&mut self) -> f64 {
        f64::from(self.sample_class())
    }

    fn name(&self) -> &'static str {
        "SkewedClass"
    }
}

/// Uniform distribution
pub struct UniformDistribution {
    min: f64,
    max: f64,
    rng: SmallRng,
    dist: Uniform<f64>,
}

impl UniformDistribution {
    pub fn new(min: f64, max: f64) -> anyhow::Result<Self> {
        Self::with_seed(min, max, None)
    }

    pub fn with_seed(min: f64, max: f64, seed: Option<u64>) -> anyhow::Result<Self> {
        if min >= max {
            anyhow::bail!("Uniform min must be < max");
        }

        let dist = Uniform::new(min, max)?;

        Ok(Self { min, max, rng: make_rng(seed), dist })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

impl Distribution for UniformDistribution {
    fn sample(&mut self) -> f64 {
        self.dist.sample(&mut self.rng)
    }

    fn name(&self) -> &'static str {
        "Uniform"
    }
}

/// Normal distribution blended with uniform noise
///
/// With probability `noise_weight` a sample is drawn uniformly from
/// `[mean - std_dev, mean + std_dev)`, otherwise from `Normal(mean, std_dev)`.
/// Both components share the same location, so the mixture stays centred on
/// `mean` while flattening its shape.
pub struct MixtureDistribution {
    noise_weight: f64,
    normal: Normal<f64>,
    noise: Uniform<f64>,
    mean: f64,
    rng: SmallRng,
}

impl MixtureDistribution {
    pub fn new(mean: f64, std_dev: f64, noise_weight: f64) -> anyhow::Result<Self> {
        Self::with_seed(mean, std_dev, noise_weight, None)
    }

    pub fn with_seed(
        mean: f64,
        std_dev: f64,
        noise_weight: f64,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        if std_dev <= 0.0 {
            anyhow::bail!("Mixture std_dev must be > 0");
        }
        if !(0.0..=1.0).contains(&noise_weight) {
            anyhow::bail!("Mixture noise_weight must be in [0.0, 1.0]");
        }

        let normal = Normal::new(mean, std_dev)?;
        let noise = Uniform::new(mean - std_dev, mean + std_dev)?;

        Ok(Self { noise_weight, normal, noise, mean, rng: make_rng(seed) })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl Distribution for MixtureDistribution {
    fn sample(&mut self) -> f64 {
        let u: f64 = self.rng.random();
        if u < self.noise_weight {
            self.noise.sample(&mut self.rng)
        } else {
            self.normal.sample(&mut self.rng)
        }
    }

    fn name(&self) -> &'static str {
        "Mixture"
    }
}
