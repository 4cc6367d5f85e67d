//! Search-parameter operators: swap one field of the genome's strategy
//! block for a different value from the configured set. A genome without a
//! strategy block starts from the defaults before the swap.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::errors::{MutationError, MutationResult};
use crate::genome::{Genome, StrategyConfig};
use crate::mutation::MutationOutcome;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Field {
    TuningSelection,
    TopologicalMode,
    HeredityType,
}

fn current_strategy(genome: &Genome) -> StrategyConfig {
    genome.strategy.clone().unwrap_or_default()
}

pub(crate) fn has_alternative(
    genome: &Genome,
    set: &[String],
    read: impl Fn(&StrategyConfig) -> &String,
) -> bool {
    let strategy = current_strategy(genome);
    set.iter().any(|v| v != read(&strategy))
}

pub(crate) fn has_annealing_alternative(genome: &Genome, set: &[f64]) -> bool {
    let strategy = current_strategy(genome);
    set.iter().any(|v| *v > 0.0 && *v != strategy.annealing_factor)
}

pub(crate) fn mutate_field(
    genome: &Genome,
    set: &[String],
    rng: &mut StdRng,
    field: Field,
) -> MutationResult<MutationOutcome> {
    let mut strategy = current_strategy(genome);
    let current = match field {
        Field::TuningSelection => strategy.tuning_selection.clone(),
        Field::TopologicalMode => strategy.topological_mode.clone(),
        Field::HeredityType => strategy.heredity_type.clone(),
    };
    let alternatives: Vec<&String> = set.iter().filter(|v| **v != current).collect();
    let choice = (*alternatives.choose(rng).ok_or(MutationError::NoMutationChoice)?).clone();
    match field {
        Field::TuningSelection => strategy.tuning_selection = choice,
        Field::TopologicalMode => strategy.topological_mode = choice,
        Field::HeredityType => strategy.heredity_type = choice,
    }
    let mut child = genome.clone();
    child.strategy = Some(strategy);
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from(["strategy".to_string()]),
    })
}

/// Annealing factors must stay strictly positive; non-positive entries in
/// the configured set are ignored.
pub(crate) fn mutate_annealing(
    genome: &Genome,
    set: &[f64],
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    let mut strategy = current_strategy(genome);
    let alternatives: Vec<f64> = set
        .iter()
        .copied()
        .filter(|v| *v > 0.0 && *v != strategy.annealing_factor)
        .collect();
    let choice = *alternatives.choose(rng).ok_or(MutationError::NoMutationChoice)?;
    strategy.annealing_factor = choice;
    let mut child = genome.clone();
    child.strategy = Some(strategy);
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from(["strategy".to_string()]),
    })
}
