//! Sensor/actuator boundary operators.
//!
//! Add operators draw from the morphology registry resolved under the
//! current scape; remove/cut operators keep the boundary-link counters in
//! sync with the explicit link lists. A cut never orphans a port: only
//! links whose port retains at least one other link are candidates.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{MutationError, MutationResult};
use crate::genome::Genome;
use crate::mutation::{MutationContext, MutationOutcome};

pub(crate) fn addable_sensors(genome: &Genome, ctx: &MutationContext<'_>) -> Vec<String> {
    ctx.morphology
        .resolve_sensors(ctx.scape_name)
        .into_iter()
        .filter(|id| !genome.sensor_ids.contains(id))
        .collect()
}

pub(crate) fn addable_actuators(genome: &Genome, ctx: &MutationContext<'_>) -> Vec<String> {
    ctx.morphology
        .resolve_actuators(ctx.scape_name)
        .into_iter()
        .filter(|id| !genome.actuator_ids.contains(id))
        .collect()
}

pub(crate) fn addable_sensor_links(genome: &Genome) -> Vec<(String, String)> {
    let mut candidates = Vec::new();
    for sensor in &genome.sensor_ids {
        for neuron in &genome.neurons {
            let exists = genome
                .sensor_neuron_links
                .iter()
                .any(|l| l.sensor == *sensor && l.neuron == neuron.id);
            if !exists {
                candidates.push((sensor.clone(), neuron.id.clone()));
            }
        }
    }
    candidates
}

pub(crate) fn addable_actuator_links(genome: &Genome) -> Vec<(String, String)> {
    let mut candidates = Vec::new();
    for actuator in &genome.actuator_ids {
        for neuron in &genome.neurons {
            let exists = genome
                .neuron_actuator_links
                .iter()
                .any(|l| l.actuator == *actuator && l.neuron == neuron.id);
            if !exists {
                candidates.push((neuron.id.clone(), actuator.clone()));
            }
        }
    }
    candidates
}

pub(crate) fn cuttable_sensor_links(genome: &Genome) -> Vec<usize> {
    genome
        .sensor_neuron_links
        .iter()
        .enumerate()
        .filter(|(_, link)| {
            genome
                .sensor_neuron_links
                .iter()
                .filter(|l| l.sensor == link.sensor)
                .count()
                >= 2
        })
        .map(|(i, _)| i)
        .collect()
}

pub(crate) fn cuttable_actuator_links(genome: &Genome) -> Vec<usize> {
    genome
        .neuron_actuator_links
        .iter()
        .enumerate()
        .filter(|(_, link)| {
            genome
                .neuron_actuator_links
                .iter()
                .filter(|l| l.actuator == link.actuator)
                .count()
                >= 2
        })
        .map(|(i, _)| i)
        .collect()
}

/// Adds a compatible sensor from the registry and wires it to a random
/// neuron.
pub(crate) fn add_sensor(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    if genome.neurons.is_empty() {
        return Err(MutationError::NoNeurons);
    }
    let candidates = addable_sensors(genome, ctx);
    let sensor = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();
    let neuron = genome.neurons[rng.gen_range(0..genome.neurons.len())].id.clone();

    let mut child = genome.clone();
    child.sensor_ids.push(sensor.clone());
    child.add_sensor_link(&sensor, &neuron);
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([
            format!("sensor:{sensor}"),
            format!("link:{sensor}->{neuron}"),
        ]),
    })
}

/// Adds a compatible actuator, wires a random neuron to it, and stamps the
/// actuator bookkeeping maps.
pub(crate) fn add_actuator(
    genome: &Genome,
    ctx: &MutationContext<'_>,
    rng: &mut StdRng,
) -> MutationResult<MutationOutcome> {
    if genome.neurons.is_empty() {
        return Err(MutationError::NoNeurons);
    }
    let candidates = addable_actuators(genome, ctx);
    let actuator = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();
    let neuron = genome.neurons[rng.gen_range(0..genome.neurons.len())].id.clone();

    let mut child = genome.clone();
    child.actuator_ids.push(actuator.clone());
    child.add_actuator_link(&neuron, &actuator);
    child.actuator_generations.insert(actuator.clone(), ctx.generation);
    child.actuator_tunables.insert(actuator.clone(), 0.0);
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([
            format!("actuator:{actuator}"),
            format!("link:{neuron}->{actuator}"),
        ]),
    })
}

pub(crate) fn add_sensor_link(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    let candidates = addable_sensor_links(genome);
    let (sensor, neuron) = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();
    let mut child = genome.clone();
    child.add_sensor_link(&sensor, &neuron);
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([format!("link:{sensor}->{neuron}")]),
    })
}

pub(crate) fn add_actuator_link(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    let candidates = addable_actuator_links(genome);
    let (neuron, actuator) = candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?.clone();
    let mut child = genome.clone();
    child.add_actuator_link(&neuron, &actuator);
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([format!("link:{neuron}->{actuator}")]),
    })
}

/// Drops a sensor and every boundary link that references it. At least two
/// sensors must remain beforehand so the genome keeps an input surface.
pub(crate) fn remove_sensor(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    if genome.sensor_ids.len() < 2 {
        return Err(MutationError::NoMutationChoice);
    }
    let index = rng.gen_range(0..genome.sensor_ids.len());
    let sensor = genome.sensor_ids[index].clone();

    let mut child = genome.clone();
    let mut touched = BTreeSet::from([format!("sensor:{sensor}")]);
    for link in child.sensor_neuron_links.iter().filter(|l| l.sensor == sensor) {
        touched.insert(format!("link:{}->{}", link.sensor, link.neuron));
    }
    child.sensor_ids.remove(index);
    child.drop_sensor_links(&sensor);
    Ok(MutationOutcome { genome: child, touched })
}

pub(crate) fn remove_actuator(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    if genome.actuator_ids.len() < 2 {
        return Err(MutationError::NoMutationChoice);
    }
    let index = rng.gen_range(0..genome.actuator_ids.len());
    let actuator = genome.actuator_ids[index].clone();

    let mut child = genome.clone();
    let mut touched = BTreeSet::from([format!("actuator:{actuator}")]);
    for link in child.neuron_actuator_links.iter().filter(|l| l.actuator == actuator) {
        touched.insert(format!("link:{}->{}", link.neuron, link.actuator));
    }
    child.actuator_ids.remove(index);
    child.drop_actuator_links(&actuator);
    child.actuator_generations.remove(&actuator);
    child.actuator_tunables.remove(&actuator);
    Ok(MutationOutcome { genome: child, touched })
}

pub(crate) fn cut_sensor_link(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    let candidates = cuttable_sensor_links(genome);
    let index = *candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?;
    let mut child = genome.clone();
    let link = child.sensor_neuron_links.remove(index);
    child.sensor_links = child.sensor_neuron_links.len();
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([format!("link:{}->{}", link.sensor, link.neuron)]),
    })
}

pub(crate) fn cut_actuator_link(genome: &Genome, rng: &mut StdRng) -> MutationResult<MutationOutcome> {
    let candidates = cuttable_actuator_links(genome);
    let index = *candidates.choose(rng).ok_or(MutationError::NoMutationChoice)?;
    let mut child = genome.clone();
    let link = child.neuron_actuator_links.remove(index);
    child.actuator_links = child.neuron_actuator_links.len();
    Ok(MutationOutcome {
        genome: child,
        touched: BTreeSet::from([format!("link:{}->{}", link.neuron, link.actuator)]),
    })
}
