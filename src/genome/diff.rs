//! Structural before/after differ.
//!
//! Mutation operators report the ids they touched directly; this differ
//! derives the same typed change set from a parent/child pair, which keeps
//! the reported sets honest (tests and debug assertions compare the two).
//!
//! Typed aliases: `neuron:{id}`, `synapse:{id}` (plus both endpoint neurons
//! for added/removed synapses), `sensor:{id}`, `actuator:{id}`,
//! `link:{from}->{to}` for boundary edges, and the bare markers
//! `substrate`, `strategy`, `plasticity` for config-block changes.

use std::collections::{BTreeMap, BTreeSet};

use crate::genome::Genome;

/// Set of typed ids affected between `before` and `after`.
pub fn changed_ids(before: &Genome, after: &Genome) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();

    let before_neurons: BTreeMap<&str, &crate::genome::Neuron> =
        before.neurons.iter().map(|n| (n.id.as_str(), n)).collect();
    let after_neurons: BTreeMap<&str, &crate::genome::Neuron> =
        after.neurons.iter().map(|n| (n.id.as_str(), n)).collect();
    for (id, neuron) in &after_neurons {
        match before_neurons.get(id) {
            None => {
                changed.insert(format!("neuron:{id}"));
            }
            Some(old) if old != neuron => {
                changed.insert(format!("neuron:{id}"));
            }
            _ => {}
        }
    }
    for id in before_neurons.keys() {
        if !after_neurons.contains_key(id) {
            changed.insert(format!("neuron:{id}"));
        }
    }

    let before_synapses: BTreeMap<&str, &crate::genome::Synapse> =
        before.synapses.iter().map(|s| (s.id.as_str(), s)).collect();
    let after_synapses: BTreeMap<&str, &crate::genome::Synapse> =
        after.synapses.iter().map(|s| (s.id.as_str(), s)).collect();
    for (id, synapse) in &after_synapses {
        match before_synapses.get(id) {
            None => {
                changed.insert(format!("synapse:{id}"));
                changed.insert(format!("neuron:{}", synapse.from));
                changed.insert(format!("neuron:{}", synapse.to));
            }
            Some(old) if old != synapse => {
                changed.insert(format!("synapse:{id}"));
            }
            _ => {}
        }
    }
    for (id, synapse) in &before_synapses {
        if !after_synapses.contains_key(id) {
            changed.insert(format!("synapse:{id}"));
            changed.insert(format!("neuron:{}", synapse.from));
            changed.insert(format!("neuron:{}", synapse.to));
        }
    }

    let before_sensors: BTreeSet<&String> = before.sensor_ids.iter().collect();
    let after_sensors: BTreeSet<&String> = after.sensor_ids.iter().collect();
    for id in before_sensors.symmetric_difference(&after_sensors) {
        changed.insert(format!("sensor:{id}"));
    }
    let before_actuators: BTreeSet<&String> = before.actuator_ids.iter().collect();
    let after_actuators: BTreeSet<&String> = after.actuator_ids.iter().collect();
    for id in before_actuators.symmetric_difference(&after_actuators) {
        changed.insert(format!("actuator:{id}"));
    }

    let before_slinks: BTreeSet<String> = before
        .sensor_neuron_links
        .iter()
        .map(|l| format!("link:{}->{}", l.sensor, l.neuron))
        .collect();
    let after_slinks: BTreeSet<String> = after
        .sensor_neuron_links
        .iter()
        .map(|l| format!("link:{}->{}", l.sensor, l.neuron))
        .collect();
    for link in before_slinks.symmetric_difference(&after_slinks) {
        changed.insert(link.clone());
    }
    let before_alinks: BTreeSet<String> = before
        .neuron_actuator_links
        .iter()
        .map(|l| format!("link:{}->{}", l.neuron, l.actuator))
        .collect();
    let after_alinks: BTreeSet<String> = after
        .neuron_actuator_links
        .iter()
        .map(|l| format!("link:{}->{}", l.neuron, l.actuator))
        .collect();
    for link in before_alinks.symmetric_difference(&after_alinks) {
        changed.insert(link.clone());
    }

    for (id, generation) in &after.actuator_generations {
        if before.actuator_generations.get(id) != Some(generation) {
            changed.insert(format!("actuator:{id}"));
        }
    }
    for (id, tunable) in &after.actuator_tunables {
        if before.actuator_tunables.get(id) != Some(tunable) {
            changed.insert(format!("actuator:{id}"));
        }
    }
    for id in before.actuator_generations.keys() {
        if !after.actuator_generations.contains_key(id) {
            changed.insert(format!("actuator:{id}"));
        }
    }
    for id in before.actuator_tunables.keys() {
        if !after.actuator_tunables.contains_key(id) {
            changed.insert(format!("actuator:{id}"));
        }
    }

    if before.substrate != after.substrate {
        changed.insert("substrate".to_string());
    }
    if before.strategy != after.strategy {
        changed.insert("strategy".to_string());
    }
    if before.plasticity != after.plasticity {
        changed.insert("plasticity".to_string());
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{Genome, StrategyConfig, Synapse};

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_genomes_produce_empty_diff() {
        let genome = Genome::linear("g", &ids(&["i1"]), &ids(&["o1"]), 1.0);
        assert!(changed_ids(&genome, &genome.clone()).is_empty());
    }

    #[test]
    fn weight_change_reports_only_the_synapse() {
        let genome = Genome::linear("g", &ids(&["i1"]), &ids(&["o1"]), 1.0);
        let mut child = genome.clone();
        child.synapses[0].weight = 2.0;
        let changed = changed_ids(&genome, &child);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains("synapse:i1->o1"));
    }

    #[test]
    fn added_synapse_reports_endpoints() {
        let genome = Genome::linear("g", &ids(&["i1", "i2"]), &ids(&["o1"]), 1.0);
        let mut child = genome.clone();
        child.remove_synapse("i2->o1").unwrap();
        child.add_synapse(Synapse::connect("o1", "o1", 0.1)).unwrap();
        let changed = changed_ids(&genome, &child);
        assert!(changed.contains("synapse:i2->o1"));
        assert!(changed.contains("synapse:o1->o1"));
        assert!(changed.contains("neuron:i2"));
        assert!(changed.contains("neuron:o1"));
    }

    #[test]
    fn strategy_change_reports_marker() {
        let genome = Genome::linear("g", &ids(&["i1"]), &ids(&["o1"]), 1.0);
        let mut child = genome.clone();
        child.strategy = Some(StrategyConfig::default());
        let changed = changed_ids(&genome, &child);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains("strategy"));
    }
}
