//! Synthetic event model

use serde::{Deserialize, Serialize};

/// Class label carried by every event, in `[0, class_count)`
pub type ClassLabel = u32;

/// One synthetic classified event
///
/// Produced fresh per draw and owned by whoever requested it. Events never
/// share mutable state with each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticEvent {
    /// Expected class of this event
    pub class_label: ClassLabel,
    /// Feature readings, one per feature slot
    pub features: Vec<f64>,
}

impl SyntheticEvent {
    pub fn new(class_label: ClassLabel, features: Vec<f64>) -> Self {
        Self { class_label, features }
    }

    /// Number of feature readings in this event
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Squared euclidean distance between the feature vectors of two events
    ///
    /// Only the overlapping prefix is compared when the lengths differ.
    pub fn distance_sq(&self, other: &SyntheticEvent) -> f64 {
        self.features
            .iter()
            .zip(other.features.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}
