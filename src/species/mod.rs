//! Speciation with stable cross-generation keys.
//!
//! Adaptive mode clusters by compatibility distance against per-species
//! representatives and steers the threshold towards a target species count.
//! Fingerprint mode groups genomes whose evolutionary-history sequences
//! agree. Both modes keep a species' key alive as long as any member
//! survives into the next generation.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::monitor::ScoredGenome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeciationMode {
    #[default]
    Adaptive,
    Fingerprint,
}

/// Threshold control knobs for adaptive mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSpeciation {
    pub threshold: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub adjust_step: f64,
    pub target_species_count: usize,
}

impl Default for AdaptiveSpeciation {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            min_threshold: 0.1,
            max_threshold: 50.0,
            adjust_step: 0.3,
            target_species_count: 4,
        }
    }
}

/// Per-generation speciation summary embedded in diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciationStats {
    pub species_count: usize,
    pub target_species_count: usize,
    pub threshold: f64,
    pub mean_species_size: f64,
    pub largest_species_size: usize,
}

/// Fitness summary of one species in one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesMetrics {
    pub key: String,
    pub size: usize,
    pub mean_fitness: f64,
    pub best_fitness: f64,
}

/// Species history entry: metrics sorted by key plus churn versus the
/// previous generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesGeneration {
    pub generation: u64,
    pub species: Vec<SpeciesMetrics>,
    pub new_keys: Vec<String>,
    pub extinct_keys: Vec<String>,
}

/// Symmetric non-negative structural distance: symmetric-difference counts
/// over the neuron and synapse id sets plus absolute weight deltas over
/// common synapse ids. Zero for identical genomes.
pub fn compatibility_distance(a: &Genome, b: &Genome) -> f64 {
    const NEURON_COEFF: f64 = 1.0;
    const SYNAPSE_COEFF: f64 = 1.0;
    const WEIGHT_COEFF: f64 = 0.4;

    let a_neurons: BTreeSet<&str> = a.neurons.iter().map(|n| n.id.as_str()).collect();
    let b_neurons: BTreeSet<&str> = b.neurons.iter().map(|n| n.id.as_str()).collect();
    let neuron_mismatch = a_neurons.symmetric_difference(&b_neurons).count();

    let a_synapses: BTreeMap<&str, f64> =
        a.synapses.iter().map(|s| (s.id.as_str(), s.weight)).collect();
    let b_synapses: BTreeMap<&str, f64> =
        b.synapses.iter().map(|s| (s.id.as_str(), s.weight)).collect();
    let a_ids: BTreeSet<&str> = a_synapses.keys().copied().collect();
    let b_ids: BTreeSet<&str> = b_synapses.keys().copied().collect();
    let synapse_mismatch = a_ids.symmetric_difference(&b_ids).count();
    let weight_delta: f64 = a_ids
        .intersection(&b_ids)
        .map(|id| (a_synapses[id] - b_synapses[id]).abs())
        .sum();

    NEURON_COEFF * neuron_mismatch as f64
        + SYNAPSE_COEFF * synapse_mismatch as f64
        + WEIGHT_COEFF * weight_delta
}

struct Representative {
    key: String,
    genome: Genome,
}

/// Cross-generation speciation state. Owned by the monitor; mutated only on
/// the main thread.
pub struct Speciation {
    mode: SpeciationMode,
    adaptive: AdaptiveSpeciation,
    threshold: f64,
    next_species_id: u64,
    /// Creation order; scanning this deterministically keeps assignment
    /// stable for a given run.
    representatives: Vec<Representative>,
}

impl Speciation {
    pub fn new(mode: SpeciationMode, adaptive: AdaptiveSpeciation) -> Self {
        let threshold = adaptive.threshold;
        Self {
            mode,
            adaptive,
            threshold,
            next_species_id: 0,
            representatives: Vec::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Assigns every genome to a species and returns the genome-id ->
    /// species-key mapping plus the generation stats. `histories` is the
    /// monitor-maintained evolutionary-history map (fingerprint mode).
    pub fn assign(
        &mut self,
        ranked: &[ScoredGenome],
        histories: &BTreeMap<String, Vec<String>>,
    ) -> (BTreeMap<String, String>, SpeciationStats) {
        let assignment = match self.mode {
            SpeciationMode::Adaptive => self.assign_adaptive(ranked),
            SpeciationMode::Fingerprint => self.assign_fingerprint(ranked, histories),
        };

        let mut sizes: BTreeMap<&String, usize> = BTreeMap::new();
        for key in assignment.values() {
            *sizes.entry(key).or_insert(0) += 1;
        }
        let species_count = sizes.len();
        let largest = sizes.values().copied().max().unwrap_or(0);
        let mean = if species_count == 0 {
            0.0
        } else {
            assignment.len() as f64 / species_count as f64
        };

        if self.mode == SpeciationMode::Adaptive {
            if species_count > self.adaptive.target_species_count {
                self.threshold += self.adaptive.adjust_step;
            } else if species_count < self.adaptive.target_species_count {
                self.threshold -= self.adaptive.adjust_step;
            }
            self.threshold = self
                .threshold
                .clamp(self.adaptive.min_threshold, self.adaptive.max_threshold);
        }

        let stats = SpeciationStats {
            species_count,
            target_species_count: self.adaptive.target_species_count,
            threshold: self.threshold,
            mean_species_size: mean,
            largest_species_size: largest,
        };
        (assignment, stats)
    }

    fn assign_adaptive(&mut self, ranked: &[ScoredGenome]) -> BTreeMap<String, String> {
        let mut assignment = BTreeMap::new();
        let mut members: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (index, scored) in ranked.iter().enumerate() {
            let mut assigned_key = None;
            for representative in &self.representatives {
                if compatibility_distance(&representative.genome, &scored.genome) < self.threshold {
                    assigned_key = Some(representative.key.clone());
                    break;
                }
            }
            let key = match assigned_key {
                Some(key) => key,
                None => {
                    let key = format!("s{}", self.next_species_id);
                    self.next_species_id += 1;
                    self.representatives.push(Representative {
                        key: key.clone(),
                        genome: scored.genome.clone(),
                    });
                    key
                }
            };
            members.entry(key.clone()).or_default().push(index);
            assignment.insert(scored.genome.id.clone(), key);
        }

        // Extinct species drop out; survivors get their best-ranked member
        // as next generation's representative, which preserves the key.
        self.representatives.retain_mut(|representative| {
            match members.get(&representative.key) {
                Some(indices) => {
                    let best = indices[0];
                    representative.genome = ranked[best].genome.clone();
                    true
                }
                None => false,
            }
        });

        assignment
    }

    fn assign_fingerprint(
        &mut self,
        ranked: &[ScoredGenome],
        histories: &BTreeMap<String, Vec<String>>,
    ) -> BTreeMap<String, String> {
        let mut assignment = BTreeMap::new();
        for scored in ranked {
            let key = match histories.get(&scored.genome.id) {
                Some(history) if !history.is_empty() => {
                    let mut state = DefaultHasher::new();
                    history.hash(&mut state);
                    format!("f{:016x}", state.finish())
                }
                _ => "s-seed".to_string(),
            };
            assignment.insert(scored.genome.id.clone(), key);
        }
        assignment
    }
}
