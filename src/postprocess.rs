//! Fitness post-processing, applied after evaluation and before ranking.

use serde::{Deserialize, Serialize};

use crate::monitor::ScoredGenome;

/// Exponent shared with the efficiency selector.
pub const SIZE_PENALTY_EXPONENT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FitnessPostprocessor {
    /// Identity.
    #[default]
    None,
    /// Divides each fitness by `complexity^0.05`,
    /// complexity = max(1, |neurons| + |synapses|).
    SizeProportional,
    /// Reserved for a topology-novelty boost; intentionally a no-op today.
    NoveltyProportional,
}

impl FitnessPostprocessor {
    /// Transforms a scored vector. Always clones: downstream consumers
    /// assume the input stays isolated.
    pub fn apply(&self, scored: &[ScoredGenome]) -> Vec<ScoredGenome> {
        let mut out: Vec<ScoredGenome> = scored.to_vec();
        match self {
            FitnessPostprocessor::None => {}
            FitnessPostprocessor::SizeProportional => {
                for entry in &mut out {
                    let complexity = entry.genome.complexity() as f64;
                    entry.fitness /= complexity.powf(SIZE_PENALTY_EXPONENT);
                }
            }
            FitnessPostprocessor::NoveltyProportional => {
                // Reserved name; the transform is still the identity.
            }
        }
        out
    }
}
