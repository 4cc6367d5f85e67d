//! Labelled-graph genome model.
//!
//! A genome is immutable by convention: every mutation operator works on a
//! fresh clone and returns it, so helpers here that edit in place are only
//! ever called on clones owned by the caller.

pub mod diff;
pub mod signature;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::{MutationError, MutationResult};

pub const SCHEMA_VERSION: u32 = 3;
pub const CODEC_VERSION: u32 = 1;

/// A single neuron. `plasticity_a..d` are the neural coefficients used by
/// the self-modulation and neuromodulation rule families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub id: String,
    pub activation: String,
    pub aggregator: String,
    pub bias: f64,
    pub generation: u64,
    pub plasticity_rule: String,
    pub plasticity_rate: f64,
    pub plasticity_a: f64,
    pub plasticity_b: f64,
    pub plasticity_c: f64,
    pub plasticity_d: f64,
    pub plasticity_bias_params: Vec<f64>,
}

impl Neuron {
    pub fn new(id: impl Into<String>, activation: impl Into<String>, generation: u64) -> Self {
        Self {
            id: id.into(),
            activation: activation.into(),
            aggregator: "dot_product".to_string(),
            bias: 0.0,
            generation,
            plasticity_rule: "none".to_string(),
            plasticity_rate: 0.0,
            plasticity_a: 0.0,
            plasticity_b: 0.0,
            plasticity_c: 0.0,
            plasticity_d: 0.0,
            plasticity_bias_params: Vec::new(),
        }
    }
}

/// Directed weighted edge between two neurons. `recurrent` is not a free
/// field: it must equal `from == to`, which `connect` enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub id: String,
    pub from: String,
    pub to: String,
    pub weight: f64,
    pub enabled: bool,
    pub recurrent: bool,
    pub plasticity_params: Vec<f64>,
}

impl Synapse {
    /// Builds a synapse with the canonical `"{from}->{to}"` id and the
    /// `recurrent == (from == to)` equivalence enforced.
    pub fn connect(from: impl Into<String>, to: impl Into<String>, weight: f64) -> Self {
        let from = from.into();
        let to = to.into();
        let recurrent = from == to;
        Self {
            id: format!("{from}->{to}"),
            from,
            to,
            weight,
            enabled: true,
            recurrent,
            plasticity_params: Vec::new(),
        }
    }
}

/// Explicit sensor-to-neuron boundary edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorLink {
    pub sensor: String,
    pub neuron: String,
}

/// Explicit neuron-to-actuator boundary edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorLink {
    pub neuron: String,
    pub actuator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlasticityConfig {
    pub rule: String,
    pub rate: f64,
    pub saturation_limit: f64,
}

/// Hypercube substrate configuration. `dimensions` holds the node count per
/// circuit layer; `parameters` are named tunables over the substrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstrateConfig {
    pub cpp_name: String,
    pub cep_name: String,
    pub cpp_ids: Vec<String>,
    pub cep_ids: Vec<String>,
    pub dimensions: Vec<usize>,
    pub parameters: BTreeMap<String, f64>,
    pub weight_count: usize,
}

/// Evolution-strategy knobs carried on the genome itself and mutated by the
/// search-parameter operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub tuning_selection: String,
    pub annealing_factor: f64,
    pub topological_mode: String,
    pub topological_param: f64,
    pub heredity_type: String,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            tuning_selection: "dynamic".to_string(),
            annealing_factor: 1.0,
            topological_mode: "const".to_string(),
            topological_param: 1.0,
            heredity_type: "darwinian".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub id: String,
    pub schema_version: u32,
    pub codec_version: u32,
    pub neurons: Vec<Neuron>,
    pub synapses: Vec<Synapse>,
    pub sensor_ids: Vec<String>,
    pub actuator_ids: Vec<String>,
    pub sensor_neuron_links: Vec<SensorLink>,
    pub neuron_actuator_links: Vec<ActuatorLink>,
    pub sensor_links: usize,
    pub actuator_links: usize,
    pub actuator_generations: BTreeMap<String, u64>,
    pub actuator_tunables: BTreeMap<String, f64>,
    pub plasticity: Option<PlasticityConfig>,
    pub substrate: Option<SubstrateConfig>,
    pub strategy: Option<StrategyConfig>,
}

impl Genome {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema_version: SCHEMA_VERSION,
            codec_version: CODEC_VERSION,
            neurons: Vec::new(),
            synapses: Vec::new(),
            sensor_ids: Vec::new(),
            actuator_ids: Vec::new(),
            sensor_neuron_links: Vec::new(),
            neuron_actuator_links: Vec::new(),
            sensor_links: 0,
            actuator_links: 0,
            actuator_generations: BTreeMap::new(),
            actuator_tunables: BTreeMap::new(),
            plasticity: None,
            substrate: None,
            strategy: None,
        }
    }

    /// Minimal fully-linked feed-forward genome: one identity neuron per
    /// input and output id, every input wired to every output with the
    /// given weight. The usual seed shape for fixtures and demo scapes.
    pub fn linear(
        id: impl Into<String>,
        input_ids: &[String],
        output_ids: &[String],
        weight: f64,
    ) -> Self {
        let mut genome = Genome::empty(id);
        for input in input_ids {
            genome.neurons.push(Neuron::new(input.clone(), "identity", 0));
        }
        for output in output_ids {
            genome.neurons.push(Neuron::new(output.clone(), "identity", 0));
        }
        for input in input_ids {
            for output in output_ids {
                genome.synapses.push(Synapse::connect(input.clone(), output.clone(), weight));
            }
        }
        genome
    }

    /// Clone under a new id; the standard first step of every offspring.
    pub fn clone_as(&self, id: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.id = id.into();
        child
    }

    pub fn neuron(&self, id: &str) -> Option<&Neuron> {
        self.neurons.iter().find(|n| n.id == id)
    }

    pub fn neuron_mut(&mut self, id: &str) -> Option<&mut Neuron> {
        self.neurons.iter_mut().find(|n| n.id == id)
    }

    pub fn has_neuron(&self, id: &str) -> bool {
        self.neuron(id).is_some()
    }

    pub fn synapse(&self, id: &str) -> Option<&Synapse> {
        self.synapses.iter().find(|s| s.id == id)
    }

    pub fn synapse_between(&self, from: &str, to: &str) -> Option<&Synapse> {
        self.synapses.iter().find(|s| s.from == from && s.to == to)
    }

    /// `max(1, |neurons| + |synapses|)`, the complexity measure shared by
    /// the size post-processor and the efficiency selector.
    pub fn complexity(&self) -> usize {
        (self.neurons.len() + self.synapses.len()).max(1)
    }

    pub fn add_neuron(&mut self, neuron: Neuron) -> MutationResult<()> {
        if self.has_neuron(&neuron.id) {
            return Err(MutationError::NeuronExists(neuron.id));
        }
        self.neurons.push(neuron);
        Ok(())
    }

    /// Removes a neuron together with every incident synapse. Returns the
    /// ids of the removed synapses (for change-set reporting).
    pub fn remove_neuron(&mut self, id: &str) -> MutationResult<Vec<String>> {
        let index = self
            .neurons
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| MutationError::NeuronNotFound(id.to_string()))?;
        self.neurons.remove(index);
        let mut removed = Vec::new();
        self.synapses.retain(|s| {
            if s.from == id || s.to == id {
                removed.push(s.id.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    /// Adds a synapse, rejecting dangling endpoints, duplicate ids, and
    /// duplicate directed edges.
    pub fn add_synapse(&mut self, synapse: Synapse) -> MutationResult<()> {
        if !self.has_neuron(&synapse.from) {
            return Err(MutationError::InvalidEndpoint(synapse.from));
        }
        if !self.has_neuron(&synapse.to) {
            return Err(MutationError::InvalidEndpoint(synapse.to));
        }
        if self.synapse(&synapse.id).is_some()
            || self.synapse_between(&synapse.from, &synapse.to).is_some()
        {
            return Err(MutationError::SynapseExists(synapse.id));
        }
        debug_assert_eq!(synapse.recurrent, synapse.from == synapse.to);
        self.synapses.push(synapse);
        Ok(())
    }

    pub fn remove_synapse(&mut self, id: &str) -> MutationResult<Synapse> {
        let index = self
            .synapses
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| MutationError::SynapseNotFound(id.to_string()))?;
        Ok(self.synapses.remove(index))
    }

    pub fn add_sensor_link(&mut self, sensor: &str, neuron: &str) {
        self.sensor_neuron_links.push(SensorLink {
            sensor: sensor.to_string(),
            neuron: neuron.to_string(),
        });
        self.sensor_links = self.sensor_neuron_links.len();
    }

    pub fn add_actuator_link(&mut self, neuron: &str, actuator: &str) {
        self.neuron_actuator_links.push(ActuatorLink {
            neuron: neuron.to_string(),
            actuator: actuator.to_string(),
        });
        self.actuator_links = self.neuron_actuator_links.len();
    }

    /// Drops every boundary link touching the sensor and resynchronises the
    /// counter.
    pub fn drop_sensor_links(&mut self, sensor: &str) -> usize {
        let before = self.sensor_neuron_links.len();
        self.sensor_neuron_links.retain(|l| l.sensor != sensor);
        self.sensor_links = self.sensor_neuron_links.len();
        before - self.sensor_links
    }

    pub fn drop_actuator_links(&mut self, actuator: &str) -> usize {
        let before = self.neuron_actuator_links.len();
        self.neuron_actuator_links.retain(|l| l.actuator != actuator);
        self.actuator_links = self.neuron_actuator_links.len();
        before - self.actuator_links
    }

    /// Feed-forward layer index per neuron: inputs sit at layer 0 and every
    /// non-recurrent synapse pushes its target below its source. Neurons
    /// unreachable from the inputs stay at layer 0. Relaxation is capped at
    /// |neurons| rounds so cyclic genomes terminate.
    pub fn infer_layers(&self, input_ids: &[String]) -> BTreeMap<String, usize> {
        let inputs: BTreeSet<&str> = input_ids.iter().map(|s| s.as_str()).collect();
        let mut layers: BTreeMap<String, usize> =
            self.neurons.iter().map(|n| (n.id.clone(), 0)).collect();
        for _ in 0..self.neurons.len() {
            let mut changed = false;
            for synapse in &self.synapses {
                if synapse.recurrent || inputs.contains(synapse.to.as_str()) {
                    continue;
                }
                let from_layer = match layers.get(&synapse.from) {
                    Some(l) => *l,
                    None => continue,
                };
                let target = layers.get(&synapse.to).copied().unwrap_or(0);
                if from_layer + 1 > target {
                    layers.insert(synapse.to.clone(), from_layer + 1);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        layers
    }

    /// Fresh neuron id of the form `"{base}-n{k}"`, unique within the genome.
    pub fn fresh_neuron_id(&self, base: &str) -> String {
        let mut k = self.neurons.len();
        loop {
            let candidate = format!("{base}-n{k}");
            if !self.has_neuron(&candidate) {
                return candidate;
            }
            k += 1;
        }
    }
}

/// Validates every structural invariant of the genome model and returns the
/// first violation. Mutated candidates are checked in debug builds; tests
/// run it on everything they touch.
pub fn check_integrity(genome: &Genome) -> MutationResult<()> {
    let mut neuron_ids = BTreeSet::new();
    for neuron in &genome.neurons {
        if !neuron_ids.insert(neuron.id.as_str()) {
            return Err(MutationError::NeuronExists(neuron.id.clone()));
        }
    }

    let mut synapse_ids = BTreeSet::new();
    for synapse in &genome.synapses {
        if !synapse_ids.insert(synapse.id.as_str()) {
            return Err(MutationError::SynapseExists(synapse.id.clone()));
        }
        if !neuron_ids.contains(synapse.from.as_str()) {
            return Err(MutationError::InvalidEndpoint(synapse.from.clone()));
        }
        if !neuron_ids.contains(synapse.to.as_str()) {
            return Err(MutationError::InvalidEndpoint(synapse.to.clone()));
        }
        if synapse.recurrent != (synapse.from == synapse.to) {
            return Err(MutationError::InvalidEndpoint(synapse.id.clone()));
        }
    }

    if genome.sensor_links != genome.sensor_neuron_links.len() {
        return Err(MutationError::InvalidEndpoint("sensor_links".to_string()));
    }
    if genome.actuator_links != genome.neuron_actuator_links.len() {
        return Err(MutationError::InvalidEndpoint("actuator_links".to_string()));
    }
    for link in &genome.sensor_neuron_links {
        if !genome.sensor_ids.contains(&link.sensor) {
            return Err(MutationError::InvalidEndpoint(link.sensor.clone()));
        }
        if !neuron_ids.contains(link.neuron.as_str()) {
            return Err(MutationError::InvalidEndpoint(link.neuron.clone()));
        }
    }
    for link in &genome.neuron_actuator_links {
        if !genome.actuator_ids.contains(&link.actuator) {
            return Err(MutationError::InvalidEndpoint(link.actuator.clone()));
        }
        if !neuron_ids.contains(link.neuron.as_str()) {
            return Err(MutationError::InvalidEndpoint(link.neuron.clone()));
        }
    }

    if let Some(substrate) = &genome.substrate {
        if substrate.cpp_name.is_empty() || substrate.cep_name.is_empty() {
            return Err(MutationError::InvalidEndpoint("substrate".to_string()));
        }
        if substrate.dimensions.iter().any(|&d| d == 0) {
            return Err(MutationError::InvalidEndpoint("substrate.dimensions".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn connect_enforces_recurrent_equivalence() {
        let forward = Synapse::connect("a", "b", 0.5);
        assert!(!forward.recurrent);
        let self_loop = Synapse::connect("a", "a", 0.5);
        assert!(self_loop.recurrent);
    }

    #[test]
    fn linear_genome_is_fully_linked_and_sound() {
        let genome = Genome::linear("g0", &ids(&["i1", "i2"]), &ids(&["o1"]), 0.3);
        assert_eq!(genome.neurons.len(), 3);
        assert_eq!(genome.synapses.len(), 2);
        assert!(genome.synapse_between("i1", "o1").is_some());
        check_integrity(&genome).unwrap();
    }

    #[test]
    fn add_synapse_rejects_dangling_and_duplicate_edges() {
        let mut genome = Genome::linear("g0", &ids(&["i1"]), &ids(&["o1"]), 1.0);
        let dangling = Synapse::connect("i1", "ghost", 1.0);
        assert_eq!(
            genome.add_synapse(dangling),
            Err(MutationError::InvalidEndpoint("ghost".to_string()))
        );
        let duplicate = Synapse::connect("i1", "o1", 2.0);
        assert!(matches!(
            genome.add_synapse(duplicate),
            Err(MutationError::SynapseExists(_))
        ));
    }

    #[test]
    fn remove_neuron_cascades_to_incident_synapses() {
        let mut genome = Genome::linear("g0", &ids(&["i1", "i2"]), &ids(&["o1"]), 1.0);
        let removed = genome.remove_neuron("o1").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(genome.synapses.is_empty());
        check_integrity(&genome).unwrap();
    }

    #[test]
    fn infer_layers_orders_feed_forward_chain() {
        let mut genome = Genome::linear("g0", &ids(&["i1"]), &ids(&["o1"]), 1.0);
        let hidden = Neuron::new("h1", "tanh", 0);
        genome.add_neuron(hidden).unwrap();
        genome.remove_synapse("i1->o1").unwrap();
        genome.add_synapse(Synapse::connect("i1", "h1", 1.0)).unwrap();
        genome.add_synapse(Synapse::connect("h1", "o1", 1.0)).unwrap();
        let layers = genome.infer_layers(&ids(&["i1"]));
        assert_eq!(layers["i1"], 0);
        assert_eq!(layers["h1"], 1);
        assert_eq!(layers["o1"], 2);
    }

    #[test]
    fn counters_track_boundary_links() {
        let mut genome = Genome::linear("g0", &ids(&["i1"]), &ids(&["o1"]), 1.0);
        genome.sensor_ids.push("s_left".to_string());
        genome.add_sensor_link("s_left", "i1");
        assert_eq!(genome.sensor_links, 1);
        assert_eq!(genome.drop_sensor_links("s_left"), 1);
        assert_eq!(genome.sensor_links, 0);
        check_integrity(&genome).unwrap();
    }
}
