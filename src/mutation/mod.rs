//! Mutation operator library.
//!
//! Operators form a closed set addressed by stable wire names
//! (`mutate_weights`, `add_inlink`, `outsplice`, ...). Each one takes a
//! parent genome and returns a fresh clone plus the typed ids it touched;
//! the parent is never modified. Soft errors (`NoSynapses`, `NoNeurons`,
//! `NoMutationChoice`) mean "retry with another operator"; everything else
//! is a hard operator error.

pub mod policy;

mod io_ports;
mod plasticity;
mod strategy;
mod structure;
mod substrate;
mod weights;

use std::collections::BTreeSet;

use rand::rngs::StdRng;

use crate::errors::MutationResult;
use crate::genome::Genome;
use crate::scape::Morphology;

pub use plasticity::{rule_widths, PlasticityWidths, DEFAULT_PLASTICITY_RULES};

/// Weight perturbations default to uniform draws in [-pi, pi].
pub const DEFAULT_MAX_WEIGHT_DELTA: f64 = std::f64::consts::PI;

pub const DEFAULT_ACTIVATIONS: [&str; 4] = ["identity", "relu", "tanh", "sigmoid"];
pub const DEFAULT_AGGREGATORS: [&str; 3] = ["dot_product", "mult_product", "diff_product"];
pub const DEFAULT_TUNING_SELECTIONS: [&str; 4] = ["dynamic", "dynamic_random", "active", "all"];
pub const DEFAULT_ANNEALING_FACTORS: [f64; 4] = [1.0, 0.9, 0.5, 0.25];
pub const DEFAULT_TOPOLOGICAL_MODES: [&str; 3] = ["const", "ncount_linear", "ncount_exponential"];
pub const DEFAULT_HEREDITY_TYPES: [&str; 2] = ["darwinian", "lamarckian"];

/// Everything an operator may consult besides the genome and the rng.
/// Built once per reproduction phase by the monitor.
pub struct MutationContext<'a> {
    pub scape_name: &'a str,
    pub generation: u64,
    pub input_neuron_ids: &'a [String],
    pub output_neuron_ids: &'a [String],
    pub feedforward_only: bool,
    pub max_weight_delta: f64,
    pub activations: &'a [String],
    pub aggregators: &'a [String],
    pub plasticity_rules: &'a [String],
    pub tuning_selections: &'a [String],
    pub annealing_factors: &'a [f64],
    pub topological_modes: &'a [String],
    pub heredity_types: &'a [String],
    pub cpp_names: &'a [String],
    pub cep_names: &'a [String],
    pub morphology: &'a dyn Morphology,
}

/// A mutated clone plus the typed ids the operator touched
/// (`neuron:...`, `synapse:...`, `sensor:...`, `link:...`, `substrate`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub genome: Genome,
    pub touched: BTreeSet<String>,
}

/// Which edge subset a directional operator draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// Every ordered neuron pair / every synapse.
    Any,
    /// Edges leaving the input set.
    In,
    /// Edges entering the output set.
    Out,
}

#[derive(Debug, Clone, PartialEq)]
enum OpKind {
    PerturbWeightAt { index: usize, delta: Option<f64> },
    PerturbRandomWeight,
    PerturbWeightsProportional,
    PerturbRandomBias,
    AddBias,
    RemoveBias,
    ChangeActivation,
    ChangeAggregator,
    AddSynapse(EdgeDirection),
    RemoveSynapse(EdgeDirection),
    Splice(EdgeDirection),
    RemoveNeuron,
    PerturbPlasticityRate,
    ChangePlasticityRule,
    AddCpp,
    AddCep,
    RemoveCpp,
    RemoveCep,
    AddCircuitNode,
    AddCircuitLayer,
    DeleteCircuitNode,
    PerturbSubstrateParameter,
    AddSensor,
    AddActuator,
    AddSensorLink,
    AddActuatorLink,
    RemoveSensor,
    RemoveActuator,
    CutSensorLink,
    CutActuatorLink,
    MutateTuningSelection,
    MutateTuningAnnealing,
    MutateTopologicalMutations,
    MutateHeredityType,
}

/// A named mutation operator. Aliases (`mutate_weights` vs
/// `perturb_weights_proportional`) share semantics but keep their own wire
/// name, which is what ends up in lineage operations.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOp {
    name: &'static str,
    kind: OpKind,
}

/// Wire name table. Order is the registry order used by `all_names`.
const NAME_TABLE: [(&str, fn() -> OpKind); 48] = [
    ("perturb_weight_at", || OpKind::PerturbWeightAt { index: 0, delta: None }),
    ("perturb_random_weight", || OpKind::PerturbRandomWeight),
    ("perturb_weights_proportional", || OpKind::PerturbWeightsProportional),
    ("mutate_weights", || OpKind::PerturbWeightsProportional),
    ("perturb_random_bias", || OpKind::PerturbRandomBias),
    ("add_bias", || OpKind::AddBias),
    ("remove_random_bias", || OpKind::RemoveBias),
    ("remove_bias", || OpKind::RemoveBias),
    ("change_random_activation", || OpKind::ChangeActivation),
    ("mutate_af", || OpKind::ChangeActivation),
    ("change_random_aggregator", || OpKind::ChangeAggregator),
    ("mutate_aggrf", || OpKind::ChangeAggregator),
    ("add_random_synapse", || OpKind::AddSynapse(EdgeDirection::Any)),
    ("add_inlink", || OpKind::AddSynapse(EdgeDirection::In)),
    ("add_outlink", || OpKind::AddSynapse(EdgeDirection::Out)),
    ("remove_random_synapse", || OpKind::RemoveSynapse(EdgeDirection::Any)),
    ("remove_inlink", || OpKind::RemoveSynapse(EdgeDirection::In)),
    ("remove_outlink", || OpKind::RemoveSynapse(EdgeDirection::Out)),
    ("add_random_neuron", || OpKind::Splice(EdgeDirection::Any)),
    ("add_neuron", || OpKind::Splice(EdgeDirection::Any)),
    ("outsplice", || OpKind::Splice(EdgeDirection::Out)),
    ("insplice", || OpKind::Splice(EdgeDirection::In)),
    ("remove_random_neuron", || OpKind::RemoveNeuron),
    ("remove_neuron", || OpKind::RemoveNeuron),
    ("perturb_plasticity_rate", || OpKind::PerturbPlasticityRate),
    ("mutate_plasticity_parameters", || OpKind::PerturbPlasticityRate),
    ("change_plasticity_rule", || OpKind::ChangePlasticityRule),
    ("mutate_pf", || OpKind::ChangePlasticityRule),
    ("add_cpp", || OpKind::AddCpp),
    ("add_cep", || OpKind::AddCep),
    ("remove_cpp", || OpKind::RemoveCpp),
    ("remove_cep", || OpKind::RemoveCep),
    ("add_circuit_node", || OpKind::AddCircuitNode),
    ("add_circuit_layer", || OpKind::AddCircuitLayer),
    ("delete_circuit_node", || OpKind::DeleteCircuitNode),
    ("perturb_substrate_parameter", || OpKind::PerturbSubstrateParameter),
    ("add_sensor", || OpKind::AddSensor),
    ("add_actuator", || OpKind::AddActuator),
    ("add_sensorlink", || OpKind::AddSensorLink),
    ("add_actuatorlink", || OpKind::AddActuatorLink),
    ("remove_sensor", || OpKind::RemoveSensor),
    ("remove_actuator", || OpKind::RemoveActuator),
    ("cutlink_FromSensorToNeuron", || OpKind::CutSensorLink),
    ("cutlink_FromNeuronToActuator", || OpKind::CutActuatorLink),
    ("mutate_tuning_selection", || OpKind::MutateTuningSelection),
    ("mutate_tuning_annealing", || OpKind::MutateTuningAnnealing),
    ("mutate_tot_topological_mutations", || OpKind::MutateTopologicalMutations),
    ("mutate_heredity_type", || OpKind::MutateHeredityType),
];

impl MutationOp {
    /// Looks up an operator by wire name.
    pub fn parse(name: &str) -> Option<MutationOp> {
        NAME_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(name, make)| MutationOp { name, kind: make() })
    }

    /// The full wire-name registry.
    pub fn all_names() -> Vec<&'static str> {
        NAME_TABLE.iter().map(|(n, _)| *n).collect()
    }

    /// Targeted weight perturbation at a synapse index. `delta` of `None`
    /// draws a random delta at apply time.
    pub fn perturb_weight_at(index: usize, delta: Option<f64>) -> MutationOp {
        MutationOp {
            name: "perturb_weight_at",
            kind: OpKind::PerturbWeightAt { index, delta },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when `apply` has at least one valid choice on this genome.
    /// Mirrors the candidate enumeration of the handlers exactly.
    pub fn applicable(&self, genome: &Genome, ctx: &MutationContext<'_>) -> bool {
        match &self.kind {
            OpKind::PerturbWeightAt { index, .. } => *index < genome.synapses.len(),
            OpKind::PerturbRandomWeight | OpKind::PerturbWeightsProportional => {
                !genome.synapses.is_empty()
            }
            OpKind::PerturbRandomBias => !genome.neurons.is_empty(),
            OpKind::AddBias => weights::bias_free_neurons(genome).next().is_some(),
            OpKind::RemoveBias => weights::biased_neurons(genome).next().is_some(),
            OpKind::ChangeActivation => {
                structure::function_swap_candidates(genome, ctx.activations, |n| &n.activation)
                    .next()
                    .is_some()
            }
            OpKind::ChangeAggregator => {
                structure::function_swap_candidates(genome, ctx.aggregators, |n| &n.aggregator)
                    .next()
                    .is_some()
            }
            OpKind::AddSynapse(direction) => {
                !structure::addable_edges(genome, ctx, *direction).is_empty()
            }
            OpKind::RemoveSynapse(direction) => {
                !structure::removable_edges(genome, ctx, *direction).is_empty()
            }
            OpKind::Splice(direction) => {
                !structure::spliceable_edges(genome, ctx, *direction).is_empty()
            }
            OpKind::RemoveNeuron => !structure::removable_neurons(genome, ctx).is_empty(),
            OpKind::PerturbPlasticityRate => !genome.neurons.is_empty(),
            OpKind::ChangePlasticityRule => {
                plasticity::rule_swap_candidates(genome, ctx.plasticity_rules)
                    .next()
                    .is_some()
            }
            OpKind::AddCpp => substrate::addable_names(genome, ctx.cpp_names, true).is_some(),
            OpKind::AddCep => substrate::addable_names(genome, ctx.cep_names, false).is_some(),
            OpKind::RemoveCpp => {
                genome.substrate.as_ref().is_some_and(|s| !s.cpp_ids.is_empty())
            }
            OpKind::RemoveCep => {
                genome.substrate.as_ref().is_some_and(|s| !s.cep_ids.is_empty())
            }
            OpKind::AddCircuitNode | OpKind::AddCircuitLayer => genome.substrate.is_some(),
            OpKind::DeleteCircuitNode => substrate::deletable_node(genome),
            OpKind::PerturbSubstrateParameter => {
                genome.substrate.as_ref().is_some_and(|s| !s.parameters.is_empty())
            }
            OpKind::AddSensor => {
                !genome.neurons.is_empty() && !io_ports::addable_sensors(genome, ctx).is_empty()
            }
            OpKind::AddActuator => {
                !genome.neurons.is_empty() && !io_ports::addable_actuators(genome, ctx).is_empty()
            }
            OpKind::AddSensorLink => !io_ports::addable_sensor_links(genome).is_empty(),
            OpKind::AddActuatorLink => !io_ports::addable_actuator_links(genome).is_empty(),
            OpKind::RemoveSensor => genome.sensor_ids.len() >= 2,
            OpKind::RemoveActuator => genome.actuator_ids.len() >= 2,
            OpKind::CutSensorLink => !io_ports::cuttable_sensor_links(genome).is_empty(),
            OpKind::CutActuatorLink => !io_ports::cuttable_actuator_links(genome).is_empty(),
            OpKind::MutateTuningSelection => {
                strategy::has_alternative(genome, ctx.tuning_selections, |s| &s.tuning_selection)
            }
            OpKind::MutateTuningAnnealing => {
                strategy::has_annealing_alternative(genome, ctx.annealing_factors)
            }
            OpKind::MutateTopologicalMutations => {
                strategy::has_alternative(genome, ctx.topological_modes, |s| &s.topological_mode)
            }
            OpKind::MutateHeredityType => {
                strategy::has_alternative(genome, ctx.heredity_types, |s| &s.heredity_type)
            }
        }
    }

    /// Applies the operator to a clone of `genome`. Deterministic given the
    /// genome and the rng state.
    pub fn apply(
        &self,
        genome: &Genome,
        ctx: &MutationContext<'_>,
        rng: &mut StdRng,
    ) -> MutationResult<MutationOutcome> {
        match &self.kind {
            OpKind::PerturbWeightAt { index, delta } => {
                weights::perturb_weight_at(genome, ctx, rng, *index, *delta)
            }
            OpKind::PerturbRandomWeight => weights::perturb_random_weight(genome, ctx, rng),
            OpKind::PerturbWeightsProportional => {
                weights::perturb_weights_proportional(genome, ctx, rng)
            }
            OpKind::PerturbRandomBias => weights::perturb_random_bias(genome, ctx, rng),
            OpKind::AddBias => weights::add_bias(genome, ctx, rng),
            OpKind::RemoveBias => weights::remove_bias(genome, rng),
            OpKind::ChangeActivation => structure::change_activation(genome, ctx, rng),
            OpKind::ChangeAggregator => structure::change_aggregator(genome, ctx, rng),
            OpKind::AddSynapse(direction) => structure::add_synapse(genome, ctx, rng, *direction),
            OpKind::RemoveSynapse(direction) => {
                structure::remove_synapse(genome, ctx, rng, *direction)
            }
            OpKind::Splice(direction) => structure::splice(genome, ctx, rng, *direction),
            OpKind::RemoveNeuron => structure::remove_neuron(genome, ctx, rng),
            OpKind::PerturbPlasticityRate => plasticity::perturb_rate(genome, ctx, rng),
            OpKind::ChangePlasticityRule => plasticity::change_rule(genome, ctx, rng),
            OpKind::AddCpp => substrate::add_name(genome, ctx.cpp_names, rng, true),
            OpKind::AddCep => substrate::add_name(genome, ctx.cep_names, rng, false),
            OpKind::RemoveCpp => substrate::remove_name(genome, rng, true),
            OpKind::RemoveCep => substrate::remove_name(genome, rng, false),
            OpKind::AddCircuitNode => substrate::add_circuit_node(genome, rng),
            OpKind::AddCircuitLayer => substrate::add_circuit_layer(genome, rng),
            OpKind::DeleteCircuitNode => substrate::delete_circuit_node(genome, rng),
            OpKind::PerturbSubstrateParameter => {
                substrate::perturb_parameter(genome, ctx, rng)
            }
            OpKind::AddSensor => io_ports::add_sensor(genome, ctx, rng),
            OpKind::AddActuator => io_ports::add_actuator(genome, ctx, rng),
            OpKind::AddSensorLink => io_ports::add_sensor_link(genome, rng),
            OpKind::AddActuatorLink => io_ports::add_actuator_link(genome, rng),
            OpKind::RemoveSensor => io_ports::remove_sensor(genome, rng),
            OpKind::RemoveActuator => io_ports::remove_actuator(genome, rng),
            OpKind::CutSensorLink => io_ports::cut_sensor_link(genome, rng),
            OpKind::CutActuatorLink => io_ports::cut_actuator_link(genome, rng),
            OpKind::MutateTuningSelection => {
                strategy::mutate_field(genome, ctx.tuning_selections, rng, strategy::Field::TuningSelection)
            }
            OpKind::MutateTuningAnnealing => {
                strategy::mutate_annealing(genome, ctx.annealing_factors, rng)
            }
            OpKind::MutateTopologicalMutations => {
                strategy::mutate_field(genome, ctx.topological_modes, rng, strategy::Field::TopologicalMode)
            }
            OpKind::MutateHeredityType => {
                strategy::mutate_field(genome, ctx.heredity_types, rng, strategy::Field::HeredityType)
            }
        }
    }
}

/// Draws a uniform non-zero delta in [-max, max].
pub(crate) fn nonzero_delta(rng: &mut StdRng, max: f64) -> f64 {
    use rand::Rng;
    loop {
        let delta = rng.gen_range(-max..=max);
        if delta != 0.0 {
            return delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_wire_name_round_trips() {
        let names = MutationOp::all_names();
        assert_eq!(names.len(), 48);
        for name in names {
            let op = MutationOp::parse(name).unwrap_or_else(|| panic!("unknown name {name}"));
            assert_eq!(op.name(), name);
        }
        assert!(MutationOp::parse("mutate_everything").is_none());
    }

    #[test]
    fn aliases_share_semantics_but_keep_names() {
        let a = MutationOp::parse("mutate_weights").unwrap();
        let b = MutationOp::parse("perturb_weights_proportional").unwrap();
        assert_eq!(a.kind, b.kind);
        assert_ne!(a.name(), b.name());
    }
}
