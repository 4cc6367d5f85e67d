//! Structural operators: edge add/remove, neuron splice/removal, and the
//! activation/aggregator swaps.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::errors::{MutationError, MutationResult};
use crate::genome::{Genome, Neuron, Synapse};
use crate::mutation::{nonzero_delta, EdgeDirection, MutationContext, MutationOutcome};

/// Neurons whose label set offers an alternative to the current value.
pub(crate) fn function_swap_candidates<'a>(
    genome: &'a Genome,
    set: &'a [String],
    current: impl Fn(&Neuron) -> &String + 'a,
) -> impl Iterator<Item = &'a Neuron> + 'a {
    genome
        .neurons
        .iter()
        .filter(move |n| set.iter().any(|candidate| candidate != current(n)))
}

fn swap_function(
    genome: &Genome,
    set: &[String],
    rng: &mut StdRng,
    read: impl Fn(&Neuron) -> &String,
    write: impl Fn(&mut Neuron, String),
) -> MutationResult<MutationOutcome> {
    if genome.neurons.is_empty() {
        return Err(MutationError::NoNeurons);
    }
    let candidates: Vec<String> =
        function_swap_candidates(genome, set, &read).map(|n| n.id.clone()).collect();
    let id = candidates
        .choose(rng)
        .ok_or(MutationError::NoMutationChoice)?
        .clone();
    let mut child = genome.clone();
    let neuron = child.neuron_mut(&id).expect("candidate came from the genome");
    let alternatives: Vec<&String> = set.iter().filter(|c| *c != read(neuron)).collect();
    let choice = (*alternatives.choose(rng).expect("candidate had an alternative")).clone();
    write(neuron, choice);
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([format!("neuron:{id}")]),
    })
}

pub(crate) fn change_activation(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    swap_function(genome, ctx.activations, rng, |n| &n.activation, |n, v| n.activation = v)
}

pub(crate) fn change_aggregator(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    swap_function(genome, ctx.aggregators, rng, |n| &n.aggregator, |n, v| n.aggregator = v)
}

fn is_input(ctx: &MutationContext<'_>, id: &str) -> bool {
    ctx.input_neuron_ids.iter().any(|i| i == id)
}

fn is_output(ctx: &MutationContext<'_>, id: &str) -> bool {
    ctx.output_neuron_ids.iter().any(|o| o == id)
}

/// Ordered neuron pairs a directional add may create, minus existing edges
/// and (under feed-forward layering) anything that would not descend the
/// layer order.
pub(crate) fn addable_edges(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    direction: EdgeDirection,
) -> Vec<(String, String)> {
    let layers = if ctx.feedforward_only {
        Some(genome.infer_layers(ctx.input_neuron_ids))
    } else {
        None
    };
    let mut candidates = Vec::new();
    for from in &genome.neurons {
        for to in &genome.neurons {
            let directional_fit = match direction {
                EdgeDirection::Any => true,
                EdgeDirection::In => is_input(ctx, &from.id) && !is_input(ctx, &to.id),
                EdgeDirection::Out => !is_output(ctx, &from.id) && is_output(ctx, &to.id),
            };
            if !directional_fit {
                continue;
            }
            if genome.synapse_between(&from.id, &to.id).is_some() {
                continue;
            }
            if let Some(layers) = &layers {
                let from_layer = layers.get(&from.id).copied().unwrap_or(0);
                let to_layer = layers.get(&to.id).copied().unwrap_or(0);
                if from_layer >= to_layer {
                    continue;
                }
            }
            candidates.push((from.id.clone(), to.id.clone()));
        }
    }
    candidates
}

pub(crate) fn removable_edges(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    direction: EdgeDirection,
) -> Vec<String> {
    genome
        .synapses
        .iter()
        .filter(|s| match direction {
            EdgeDirection::Any => true,
            EdgeDirection::In => is_input(ctx, &s.from),
            EdgeDirection::Out => is_output(ctx, &s.to),
        })
        .map(|s| s.id.clone())
        .collect()
}

/// Splice candidates: non-recurrent edges in the directional subset. A
/// self-loop cannot be split into A -> N -> A without changing meaning.
pub(crate) fn spliceable_edges(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    direction: EdgeDirection,
) -> Vec<String> {
    genome
        .synapses
        .iter()
        .filter(|s| !s.recurrent)
        .filter(|s| match direction {
            EdgeDirection::Any => true,
            EdgeDirection::In => is_input(ctx, &s.from),
            EdgeDirection::Out => is_output(ctx, &s.to),
        })
        .map(|s| s.id.clone())
        .collect()
}

/// Hidden neurons only; input and output neurons are protected.
pub(crate) fn removable_neurons(genome: &Genome, ctx: &MutationContext<'_>) -> Vec<String> {
    genome
        .neurons
        .iter()
        .filter(|n| !is_input(ctx, &n.id) && !is_output(ctx, &n.id))
        .map(|n| n.id.clone())
        .collect()
}

pub(crate) fn add_synapse(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
    direction: EdgeDirection,
) -> MutationResult<MutationOutcome> {
    if genome.neurons.is_empty() {
        return Err(MutationError::NoNeurons);
    }
    let candidates = addable_edges(genome, ctx, direction);
    let (from, to) = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();
    let mut child = genome.clone();
    let weight = nonzero_delta(rng, ctx.max_weight_delta);
    let synapse = Synapse::connect(from.clone(), to.clone(), weight);
    let synapse_id = synapse.id.clone();
    child.add_synapse(synapse)?;
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([
            format!("synapse:{synapse_id}"),
            format!("neuron:{from}"),
            format!("neuron:{to}"),
        ]),
    })
}

pub(crate) fn remove_synapse(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
    direction: EdgeDirection,
) -> MutationResult<MutationOutcome> {
    if genome.synapses.is_empty() {
        return Err(MutationError::NoSynapses);
    }
    let candidates = removable_edges(genome, ctx, direction);
    let id = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();
    let mut child = genome.clone();
    let removed = child.remove_synapse(&id)?;
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([
            format!("synapse:{}", removed.id),
            format!("neuron:{}", removed.from),
            format!("neuron:{}", removed.to),
        ]),
    })
}

/// Splits a synapse A -> B into A -> N -> B: fresh neuron N with an
/// activation drawn from the configured set, weight 1 into N, the original
/// weight out of it.
pub(crate) fn splice(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
    direction: EdgeDirection,
) -> MutationResult<MutationOutcome> {
    if genome.synapses.is_empty() {
        return Err(MutationError::NoSynapses);
    }
    let candidates = spliceable_edges(genome, ctx, direction);
    let id = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();

    let mut child = genome.clone();
    let removed = child.remove_synapse(&id)?;

    let activation = ctx
        .activations
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| "tanh".to_string());
    let neuron_id = child.fresh_neuron_id(&format!("g{}", ctx.generation));
    child.add_neuron(Neuron::new(neuron_id.clone(), activation, ctx.generation))?;

    let inbound = Synapse::connect(removed.from.clone(), neuron_id.clone(), 1.0);
    let outbound = Synapse::connect(neuron_id.clone(), removed.to.clone(), removed.weight);
    let inbound_id = inbound.id.clone();
    let outbound_id = outbound.id.clone();
    child.add_synapse(inbound)?;
    child.add_synapse(outbound)?;

    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([
            format!("synapse:{}", removed.id),
            format!("synapse:{inbound_id}"),
            format!("synapse:{outbound_id}"),
            format!("neuron:{}", removed.from),
            format!("neuron:{}", removed.to),
            format!("neuron:{neuron_id}"),
        ]),
    })
}

pub(crate) fn remove_neuron(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    if genome.neurons.is_empty() {
        return Err(MutationError::NoNeurons);
    }
    let candidates = removable_neurons(genome, ctx);
    let id = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();

    let mut child = genome.clone();
    let mut touched = BTreeSet::from([format!("neuron:{id}")]);
    // Collect endpoints before the cascade removes the synapses.
    for synapse in child.synapses.iter().filter(|s| s.from == id || s.to == id) {
        touched.insert(format!("synapse:{}", synapse.id));
        touched.insert(format!("neuron:{}", synapse.from));
        touched.insert(format!("neuron:{}", synapse.to));
    }
    child.remove_neuron(&id)?;
    Ok(MutationOutcome { genome: child, touched })
}
