//! Seed derivation for reproducible randomness
//!
//! A run is configured with one master seed. Every component that samples
//! gets its own seed derived from the master with SHA-256, so components
//! never share a random stream and adding a component does not shift the
//! streams of the others.
//!
//! # Example
//!
//! ```
//! use rceload_core::seed::{client_seed, derive_seed};
//!
//! assert_eq!(derive_seed(42, "test"), derive_seed(42, "test"));
//! assert_ne!(derive_seed(42, "comp1"), derive_seed(42, "comp2"));
//! assert_ne!(client_seed(42, 0), client_seed(42, 1));
//! ```

use sha2::{Digest, Sha256};

/// Derive a component-specific seed from a master seed using SHA-256
///
/// The master seed is hashed big-endian followed by the component name; the
/// first 8 bytes of the digest form the derived seed.
pub fn derive_seed(master_seed: u64, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(master_seed.to_be_bytes());
    hasher.update(component.as_bytes());
    let result = hasher.finalize();

    u64::from_be_bytes([
        result[0], result[1], result[2], result[3], result[4], result[5], result[6], result[7],
    ])
}

/// Seed of one logical client's event stream
pub fn client_seed(master_seed: u64, client_id: usize) -> u64 {
    derive_seed(master_seed, &format!("{}_{client_id}", components::CLIENT))
}

/// Standard component names for seed derivation
pub mod components {
    /// Per-class feature centroids of a dataset
    pub const DATASET: &str = "dataset_centroids";
    /// Prefix of per-client stream seeds
    pub const CLIENT: &str = "client";
    pub const CLASS_SELECTION: &str = "class_selection";
    pub const FEATURE_NOISE: &str = "feature_noise";
}
