//! Plasticity operators: rate perturbation and rule swaps.
//!
//! Swapping a rule resets the parameter vectors to the widths of the new
//! rule family. The widths are a fixed table keyed by rule name; see
//! `rule_widths`.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{MutationError, MutationResult};
use crate::genome::{Genome, Neuron};
use crate::mutation::{nonzero_delta, MutationContext, MutationOutcome};

pub const DEFAULT_PLASTICITY_RULES: [&str; 12] = [
    "none",
    "hebbian",
    "hebbian_w",
    "oja",
    "oja_w",
    "self_modulationV1",
    "self_modulationV2",
    "self_modulationV3",
    "self_modulationV4",
    "self_modulationV5",
    "self_modulationV6",
    "neuromodulation",
];

/// Parameter-vector widths for one plasticity rule family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlasticityWidths {
    /// Per-synapse `plasticity_params` length (synapses entering the neuron).
    pub synapse_params: usize,
    /// Neuron `plasticity_bias_params` length.
    pub bias_params: usize,
    /// How many of the neural coefficients A..D are active.
    pub coefficients: usize,
}

/// Width table per rule family. Unknown rules fall back to rate-only.
pub fn rule_widths(rule: &str) -> PlasticityWidths {
    let (synapse_params, bias_params, coefficients) = match rule {
        "none" => (0, 0, 0),
        "hebbian" | "oja" => (0, 0, 0),
        "hebbian_w" | "oja_w" => (1, 1, 0),
        "self_modulationV1" => (1, 1, 0),
        "self_modulationV2" => (1, 2, 1),
        "self_modulationV3" => (2, 2, 2),
        "self_modulationV4" => (3, 3, 3),
        "self_modulationV5" => (4, 4, 4),
        "self_modulationV6" => (5, 5, 0),
        "neuromodulation" => (0, 0, 4),
        _ => (0, 0, 0),
    };
    PlasticityWidths { synapse_params, bias_params, coefficients }
}

/// Neurons whose rule has an alternative in the configured set.
pub(crate) fn rule_swap_candidates<'a>(
    genome: &'a Genome,
    rules: &'a [String],
) -> impl Iterator<Item = &'a Neuron> + 'a {
    genome
        .neurons
        .iter()
        .filter(move |n| rules.iter().any(|r| *r != n.plasticity_rule))
}

/// Perturbs a random neuron's plasticity rate, clamped to >= 0.
pub(crate) fn perturb_rate(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    if genome.neurons.is_empty() {
        return Err(MutationError::NoNeurons);
    }
    let mut child = genome.clone();
    let index = rng.gen_range(0..child.neurons.len());
    let neuron = &mut child.neurons[index];
    let delta = nonzero_delta(rng, ctx.max_weight_delta);
    let mut updated = (neuron.plasticity_rate + delta).max(0.0);
    if updated == neuron.plasticity_rate {
        // A negative delta clamped at zero must still move the rate.
        updated = neuron.plasticity_rate + delta.abs();
    }
    neuron.plasticity_rate = updated;
    let id = neuron.id.clone();
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([format!("neuron:{id}")]),
    })
}

fn small_params(rng: &mut StdRng, width: usize) -> Vec<f64> {
    (0..width).map(|_| rng.gen_range(-0.1..=0.1)).collect()
}

/// Swaps a random neuron's plasticity rule and resets the parameter vectors
/// of the neuron and its inbound synapses to the new family's widths.
pub(crate) fn change_rule(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    if genome.neurons.is_empty() {
        return Err(MutationError::NoNeurons);
    }
    let candidates: Vec<String> =
        rule_swap_candidates(genome, ctx.plasticity_rules).map(|n| n.id.clone()).collect();
    let id = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();

    let mut child = genome.clone();
    let current = child.neuron(&id).expect("candidate came from the genome").plasticity_rule.clone();
    let alternatives: Vec<&String> =
        ctx.plasticity_rules.iter().filter(|r| **r != current).collect();
    let rule = (*alternatives.choose(rng).expect("candidate had an alternative")).clone();
    let widths = rule_widths(&rule);

    let mut touched = BTreeSet::from([format!("neuron:{id}")]);
    {
        let neuron = child.neuron_mut(&id).expect("candidate came from the genome");
        neuron.plasticity_rule = rule.clone();
        if rule == "none" {
            neuron.plasticity_rate = 0.0;
        } else if neuron.plasticity_rate == 0.0 {
            neuron.plasticity_rate = rng.gen_range(0.0..=0.1);
        }
        neuron.plasticity_bias_params = small_params(rng, widths.bias_params);
        let coefficients = small_params(rng, 4);
        neuron.plasticity_a = if widths.coefficients > 0 { coefficients[0] } else { 0.0 };
        neuron.plasticity_b = if widths.coefficients > 1 { coefficients[1] } else { 0.0 };
        neuron.plasticity_c = if widths.coefficients > 2 { coefficients[2] } else { 0.0 };
        neuron.plasticity_d = if widths.coefficients > 3 { coefficients[3] } else { 0.0 };
    }
    for synapse in child.synapses.iter_mut().filter(|s| s.to == id) {
        let params = small_params(rng, widths.synapse_params);
        // Equal-width resets to an identical vector (e.g. [] -> []) are not
        // a change and must not be reported as one.
        if synapse.plasticity_params != params {
            synapse.plasticity_params = params;
            touched.insert(format!("synapse:{}", synapse.id));
        }
    }

    Ok(MutationOutcome { genome: child, touched })
}
