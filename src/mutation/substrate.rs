//! Substrate (hypercube configuration) operators.
//!
//! All of these require a substrate block; genomes without one report
//! `NoMutationChoice` so the monitor simply draws another operator.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{MutationError, MutationResult};
use crate::genome::{Genome, SubstrateConfig};
use crate::mutation::{nonzero_delta, MutationContext, MutationOutcome};

fn substrate_outcome(genome: Genome) -> MutationOutcome {
    MutationOutcome {
        genome,
        touched: BTreeSet::from(["substrate".to_string()]),
    }
}

fn substrate_of(genome: &Genome) -> MutationResult<&SubstrateConfig> {
    genome.substrate.as_ref().ok_or(MutationError::NoMutationChoice)
}

/// Registry names not yet present in the cpp/cep pool.
pub(crate) fn addable_names(genome: &Genome, registry: &[String], cpp: bool) -> Option<String> {
    let substrate = genome.substrate.as_ref()?;
    let (active, pool) = if cpp {
        (&substrate.cpp_name, &substrate.cpp_ids)
    } else {
        (&substrate.cep_name, &substrate.cep_ids)
    };
    registry
        .iter()
        .find(|name| *name != active && !pool.contains(name))
        .cloned()
}

pub(crate) fn deletable_node(genome: &Genome) -> bool {
    match &genome.substrate {
        Some(s) => s.dimensions.iter().any(|&d| d >= 2) || s.dimensions.len() >= 2,
        None => false,
    }
}

fn pick_addable(genome: &Genome, registry: &[String], rng: &mut StdRng, cpp: bool) -> Option<String> {
    let substrate = genome.substrate.as_ref()?;
    let (active, pool) = if cpp {
        (&substrate.cpp_name, &substrate.cpp_ids)
    } else {
        (&substrate.cep_name, &substrate.cep_ids)
    };
    let candidates: Vec<&String> = registry
        .iter()
        .filter(|name| *name != active && !pool.contains(name))
        .collect();
    candidates.choose(rng).map(|n| (*n).clone())
}

/// Appends a registered coordinate pre/post-processor name to the pool.
pub(crate) fn add_name(
    genome: &Genome,
    registry: &[String],
    rng: &mut StdRng,
    cpp: bool,
) -> MutationResult<MutationOutcome> {
    substrate_of(genome)?;
    let name = pick_addable(genome, registry, rng, cpp).ok_or(MutationError::NoMutationChoice)?;
    let mut child = genome.clone();
    let substrate = child.substrate.as_mut().expect("checked above");
    if cpp {
        substrate.cpp_ids.push(name);
    } else {
        substrate.cep_ids.push(name);
    }
    Ok(substrate_outcome(child))
}

pub(crate) fn remove_name(
    genome: &Genome,
    rng: &mut StdRng,
    cpp: bool,
) -> MutationResult<MutationOutcome> {
    let substrate = substrate_of(genome)?;
    let pool = if cpp { &substrate.cpp_ids } else { &substrate.cep_ids };
    if pool.is_empty() {
        return Err(MutationError::NoMutationChoice);
    }
    let index = rng.gen_range(0..pool.len());
    let mut child = genome.clone();
    let substrate = child.substrate.as_mut().expect("checked above");
    if cpp {
        substrate.cpp_ids.remove(index);
    } else {
        substrate.cep_ids.remove(index);
    }
    Ok(substrate_outcome(child))
}

fn refresh_weight_count(substrate: &mut SubstrateConfig) {
    substrate.weight_count = substrate.dimensions.iter().product();
}

pub(crate) fn add_circuit_node(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    let substrate = substrate_of(genome)?;
    if substrate.dimensions.is_empty() {
        return Err(MutationError::NoMutationChoice);
    }
    let layer = rng.gen_range(0..substrate.dimensions.len());
    let mut child = genome.clone();
    let substrate = child.substrate.as_mut().expect("checked above");
    substrate.dimensions[layer] += 1;
    refresh_weight_count(substrate);
    Ok(substrate_outcome(child))
}

pub(crate) fn add_circuit_layer(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    substrate_of(genome)?;
    let mut child = genome.clone();
    let substrate = child.substrate.as_mut().expect("checked above");
    let position = rng.gen_range(0..=substrate.dimensions.len());
    substrate.dimensions.insert(position, 1);
    refresh_weight_count(substrate);
    Ok(substrate_outcome(child))
}

/// Shrinks a layer by one node; a width-1 layer collapses entirely unless
/// it is the last one.
pub(crate) fn delete_circuit_node(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    let substrate = substrate_of(genome)?;
    let candidates: Vec<usize> = substrate
        .dimensions
        .iter()
        .enumerate()
        .filter(|(_, &width)| width >= 2)
        .map(|(i, _)| i)
        .chain(
            // Width-1 layers are deletable wholesale when another layer remains.
            substrate
                .dimensions
                .iter()
                .enumerate()
                .filter(|(_, &width)| width == 1 && substrate.dimensions.len() >= 2)
                .map(|(i, _)| i),
        )
        .collect();
    let layer = *candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?;
    let mut child = genome.clone();
    let substrate = child.substrate.as_mut().expect("checked above");
    if substrate.dimensions[layer] >= 2 {
        substrate.dimensions[layer] -= 1;
    } else {
        substrate.dimensions.remove(layer);
    }
    refresh_weight_count(substrate);
    Ok(substrate_outcome(child))
}

pub(crate) fn perturb_parameter(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    let substrate = substrate_of(genome)?;
    let keys: Vec<&String> = substrate.parameters.keys().collect();
    let key = (*keys.choose(rng).ok_or(MutationError::NoMutationChoice)?).clone();
    let mut child = genome.clone();
    let substrate = child.substrate.as_mut().expect("checked above");
    let delta = nonzero_delta(rng, ctx.max_weight_delta);
    if let Some(value) = substrate.parameters.get_mut(&key) {
        *value += delta;
    }
    Ok(substrate_outcome(child))
}
