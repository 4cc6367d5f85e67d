//! Deterministic genome fingerprint and topology summary.
//!
//! Identical structure and identical labelled weights hash to the same
//! fingerprint; any topology change or any numeric change produces a
//! different one. Numeric fields are hashed through their IEEE bit
//! patterns so -0.0 and 0.0 stay distinguishable and no rounding sneaks in.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::genome::Genome;

/// Compact structural description of a genome, carried on lineage records
/// and used by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySummary {
    pub neuron_count: usize,
    pub synapse_count: usize,
    pub recurrent_count: usize,
    pub sensor_count: usize,
    pub actuator_count: usize,
    pub activations: Vec<String>,
    pub aggregators: Vec<String>,
}

pub fn summarize(genome: &Genome) -> TopologySummary {
    let activations: BTreeSet<String> =
        genome.neurons.iter().map(|n| n.activation.clone()).collect();
    let aggregators: BTreeSet<String> =
        genome.neurons.iter().map(|n| n.aggregator.clone()).collect();
    TopologySummary {
        neuron_count: genome.neurons.len(),
        synapse_count: genome.synapses.len(),
        recurrent_count: genome.synapses.iter().filter(|s| s.recurrent).count(),
        sensor_count: genome.sensor_ids.len(),
        actuator_count: genome.actuator_ids.len(),
        activations: activations.into_iter().collect(),
        aggregators: aggregators.into_iter().collect(),
    }
}

fn hash_f64<H: Hasher>(state: &mut H, value: f64) {
    state.write_u64(value.to_bits());
}

/// 64-bit fingerprint rendered as a fixed-width hex string.
///
/// The hash walks a canonical ordering (neurons then synapses sorted by id,
/// boundary lists, substrate/strategy/plasticity blocks) so the result is
/// independent of the in-memory order of the sequences.
pub fn fingerprint(genome: &Genome) -> String {
    let mut state = std::collections::hash_map::DefaultHasher::new();

    let mut neuron_ids: Vec<&str> = genome.neurons.iter().map(|n| n.id.as_str()).collect();
    neuron_ids.sort_unstable();
    for id in neuron_ids {
        let neuron = genome.neuron(id).expect("sorted id came from the genome");
        neuron.id.hash(&mut state);
        neuron.activation.hash(&mut state);
        neuron.aggregator.hash(&mut state);
        hash_f64(&mut state, neuron.bias);
        neuron.plasticity_rule.hash(&mut state);
        hash_f64(&mut state, neuron.plasticity_rate);
        hash_f64(&mut state, neuron.plasticity_a);
        hash_f64(&mut state, neuron.plasticity_b);
        hash_f64(&mut state, neuron.plasticity_c);
        hash_f64(&mut state, neuron.plasticity_d);
        state.write_usize(neuron.plasticity_bias_params.len());
        for p in &neuron.plasticity_bias_params {
            hash_f64(&mut state, *p);
        }
    }

    let mut synapse_ids: Vec<&str> = genome.synapses.iter().map(|s| s.id.as_str()).collect();
    synapse_ids.sort_unstable();
    for id in synapse_ids {
        let synapse = genome.synapse(id).expect("sorted id came from the genome");
        synapse.id.hash(&mut state);
        synapse.from.hash(&mut state);
        synapse.to.hash(&mut state);
        hash_f64(&mut state, synapse.weight);
        synapse.enabled.hash(&mut state);
        synapse.recurrent.hash(&mut state);
        state.write_usize(synapse.plasticity_params.len());
        for p in &synapse.plasticity_params {
            hash_f64(&mut state, *p);
        }
    }

    genome.sensor_ids.hash(&mut state);
    genome.actuator_ids.hash(&mut state);
    for link in &genome.sensor_neuron_links {
        link.sensor.hash(&mut state);
        link.neuron.hash(&mut state);
    }
    for link in &genome.neuron_actuator_links {
        link.neuron.hash(&mut state);
        link.actuator.hash(&mut state);
    }
    for (actuator, generation) in &genome.actuator_generations {
        actuator.hash(&mut state);
        state.write_u64(*generation);
    }
    for (actuator, tunable) in &genome.actuator_tunables {
        actuator.hash(&mut state);
        hash_f64(&mut state, *tunable);
    }

    if let Some(plasticity) = &genome.plasticity {
        plasticity.rule.hash(&mut state);
        hash_f64(&mut state, plasticity.rate);
        hash_f64(&mut state, plasticity.saturation_limit);
    }
    if let Some(substrate) = &genome.substrate {
        substrate.cpp_name.hash(&mut state);
        substrate.cep_name.hash(&mut state);
        substrate.cpp_ids.hash(&mut state);
        substrate.cep_ids.hash(&mut state);
        substrate.dimensions.hash(&mut state);
        for (key, value) in &substrate.parameters {
            key.hash(&mut state);
            hash_f64(&mut state, *value);
        }
        state.write_usize(substrate.weight_count);
    }
    if let Some(strategy) = &genome.strategy {
        strategy.tuning_selection.hash(&mut state);
        hash_f64(&mut state, strategy.annealing_factor);
        strategy.topological_mode.hash(&mut state);
        hash_f64(&mut state, strategy.topological_param);
        strategy.heredity_type.hash(&mut state);
    }

    format!("{:016x}", state.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{Genome, Synapse};

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fingerprint_is_stable_for_equal_genomes() {
        let a = Genome::linear("a", &ids(&["i1"]), &ids(&["o1"]), 0.5);
        let b = Genome::linear("b", &ids(&["i1"]), &ids(&["o1"]), 0.5);
        // Genome ids are not part of the structure.
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let mut a = Genome::linear("a", &ids(&["i1", "i2"]), &ids(&["o1"]), 0.5);
        let mut b = a.clone();
        a.neurons.reverse();
        b.synapses.reverse();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn numeric_change_changes_fingerprint() {
        let a = Genome::linear("a", &ids(&["i1"]), &ids(&["o1"]), 0.5);
        let mut b = a.clone();
        b.synapses[0].weight += 1e-12;
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn topology_change_changes_fingerprint() {
        let a = Genome::linear("a", &ids(&["i1"]), &ids(&["o1"]), 0.5);
        let mut b = a.clone();
        b.add_synapse(Synapse::connect("o1", "o1", 0.1)).unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&b));
        let summary = summarize(&b);
        assert_eq!(summary.recurrent_count, 1);
        assert_eq!(summary.synapse_count, 2);
    }
}
