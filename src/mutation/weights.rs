//! Weight and bias perturbation operators.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{MutationError, MutationResult};
use crate::genome::{Genome, Neuron};
use crate::mutation::{nonzero_delta, MutationContext, MutationOutcome};

fn outcome(genome: Genome, touched: impl IntoIterator<Item = String>) -> MutationOutcome {
    MutationOutcome {
        genome,
        touched: touched.into_iter().collect::<BTreeSet<_>>(),
    }
}

pub(crate) fn bias_free_neurons(genome: &Genome) -> impl Iterator<Item = &Neuron> {
    genome.neurons.iter().filter(|n| n.bias == 0.0)
}

pub(crate) fn biased_neurons(genome: &Genome) -> impl Iterator<Item = &Neuron> {
    genome.neurons.iter().filter(|n| n.bias != 0.0)
}

pub(crate) fn perturb_weight_at(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
    index: usize,
    delta: Option<f64>,
) -> MutationResult<MutationOutcome> {
    if index >= genome.synapses.len() {
        return Err(MutationError::SynapseNotFound(format!("index {index}")));
    }
    let mut child = genome.clone();
    let delta = delta.unwrap_or_else(|| nonzero_delta(rng, ctx.max_weight_delta));
    let synapse = &mut child.synapses[index];
    synapse.weight += delta;
    let id = synapse.id.clone();
    Ok(outcome(child, [format!("synapse:{id}")]))
}

pub(crate) fn perturb_random_weight(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    if genome.synapses.is_empty() {
        return Err(MutationError::NoSynapses);
    }
    let index = rng.gen_range(0..genome.synapses.len());
    perturb_weight_at(genome, ctx, rng, index, None)
}

/// Mutates each synapse independently with probability 1/sqrt(N) and
/// guarantees at least one perturbation.
pub(crate) fn perturb_weights_proportional(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    let n = genome.synapses.len();
    if n == 0 {
        return Err(MutationError::NoSynapses);
    }
    let probability = 1.0 / (n as f64).sqrt();
    let mut child = genome.clone();
    let mut touched = BTreeSet::new();
    for synapse in &mut child.synapses {
        if rng.gen_bool(probability.min(1.0)) {
            synapse.weight += nonzero_delta(rng, ctx.max_weight_delta);
            touched.insert(format!("synapse:{}", synapse.id));
        }
    }
    if touched.is_empty() {
        let index = rng.gen_range(0..n);
        let synapse = &mut child.synapses[index];
        synapse.weight += nonzero_delta(rng, ctx.max_weight_delta);
        touched.insert(format!("synapse:{}", synapse.id));
    }
    Ok(MutationOutcome { genome: child, touched })
}

pub(crate) fn perturb_random_bias(
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
    neuron.bias += nonzero_delta(rng, ctx.max_weight_delta);
    let id = neuron.id.clone();
    Ok(outcome(child, [format!("neuron:{id}")]))
}

/// Gives a random zero-bias neuron a fresh bias.
pub(crate) fn add_bias(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    let candidates: Vec<String> = bias_free_neurons(genome).map(|n| n.id.clone()).collect();
    let id = candidates
        .choose(rng)
        .ok_or(MutationError::NoMutationChoice)?
        .clone();
    let mut child = genome.clone();
    let neuron = child.neuron_mut(&id).expect("candidate came from the genome");
    neuron.bias = nonzero_delta(rng, ctx.max_weight_delta);
    Ok(outcome(child, [format!("neuron:{id}")]))
}

/// Zeroes a random non-zero bias.
pub(crate) fn remove_bias(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    let candidates: Vec<String> = biased_neurons(genome).map(|n| n.id.clone()).collect();
    let id = candidates
        .choose(rng)
        .ok_or(MutationError::NoMutationChoice)?
        .clone();
    let mut child = genome.clone();
    let neuron = child.neuron_mut(&id).expect("candidate came from the genome");
    neuron.bias = 0.0;
    Ok(outcome(child, [format!("neuron:{id}")]))
}
