//! Generation diagnostics, species history records, and step-trace
//! emission.
//!
//! The trace window accumulates across generations until the total
//! evaluation counter crosses the configured step boundary, then a `step`
//! update goes out through the hook and the window resets. `print_trace`
//! emits the current window out of band; `completed` fires once on loop
//! exit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::monitor::{PopulationMonitor, ScoredGenome};
use crate::genome::signature::fingerprint;
use crate::scape::OpMode;
use crate::species::{SpeciationStats, SpeciesGeneration, SpeciesMetrics};
use crate::tuning::TuningStats;

/// Per-generation summary embedded in the run result and in trace updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationDiagnostics {
    pub generation: u64,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub min_fitness: f64,
    pub species_count: usize,
    pub fingerprint_diversity: usize,
    pub threshold: f64,
    pub target_species_count: usize,
    pub mean_species_size: f64,
    pub largest_species_size: usize,
    pub tuning: TuningStats,
}

/// Per-species block of a trace update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpeciesMetrics {
    pub key: String,
    pub size: usize,
    pub mean_fitness: f64,
    pub std_fitness: f64,
    pub best_fitness: f64,
    pub min_fitness: f64,
    pub neuron_mean: f64,
    pub neuron_std: f64,
    pub diversity: usize,
    pub evaluations: u64,
    pub champion_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_fitness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_fitness: Option<f64>,
}

/// JSON-ready payload delivered through the trace hook. Field names are
/// part of the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceUpdate {
    pub reason: String,
    pub total_evaluations: u64,
    pub goal_reached: bool,
    pub step_evaluations: u64,
    pub step_cycles: u64,
    pub step_time: f64,
    pub species_evaluations: BTreeMap<String, u64>,
    pub species: Vec<TraceSpeciesMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<GenerationDiagnostics>,
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

pub(crate) fn build_generation_diagnostics(
    generation: u64,
    ranked: &[ScoredGenome],
    stats: &SpeciationStats,
    tuning: TuningStats,
) -> GenerationDiagnostics {
    let fitnesses: Vec<f64> = ranked.iter().map(|s| s.fitness).collect();
    let (mean, _) = mean_and_std(&fitnesses);
    let distinct: BTreeSet<String> = ranked.iter().map(|s| fingerprint(&s.genome)).collect();
    GenerationDiagnostics {
        generation,
        best_fitness: fitnesses.first().copied().unwrap_or(0.0),
        mean_fitness: mean,
        min_fitness: fitnesses.last().copied().unwrap_or(0.0),
        species_count: stats.species_count,
        fingerprint_diversity: distinct.len(),
        threshold: stats.threshold,
        target_species_count: stats.target_species_count,
        mean_species_size: stats.mean_species_size,
        largest_species_size: stats.largest_species_size,
        tuning,
    }
}

pub(crate) fn build_species_generation(
    generation: u64,
    ranked: &[ScoredGenome],
    species_by_genome_id: &BTreeMap<String, String>,
    previous_keys: &BTreeSet<String>,
) -> SpeciesGeneration {
    let mut fitness_by_species: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for scored in ranked {
        if let Some(key) = species_by_genome_id.get(&scored.genome.id) {
            fitness_by_species.entry(key.clone()).or_default().push(scored.fitness);
        }
    }
    let species: Vec<SpeciesMetrics> = fitness_by_species
        .iter()
        .map(|(key, fitnesses)| SpeciesMetrics {
            key: key.clone(),
            size: fitnesses.len(),
            mean_fitness: fitnesses.iter().sum::<f64>() / fitnesses.len() as f64,
            best_fitness: fitnesses.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
        .collect();
    let current_keys: BTreeSet<String> = fitness_by_species.keys().cloned().collect();
    SpeciesGeneration {
        generation,
        species,
        new_keys: current_keys.difference(previous_keys).cloned().collect(),
        extinct_keys: previous_keys.difference(&current_keys).cloned().collect(),
    }
}

struct WindowSnapshot {
    ranked: Vec<ScoredGenome>,
    assignment: BTreeMap<String, String>,
}

/// Step-trace accumulation across generations.
#[derive(Default)]
pub(crate) struct TraceWindow {
    step_evaluations: u64,
    step_cycles: u64,
    step_time: f64,
    species_evaluations: BTreeMap<String, u64>,
    snapshot: Option<WindowSnapshot>,
}

impl TraceWindow {
    /// Folds one evaluated generation into the window. Cycle and time
    /// figures come from the well-known `"cycles"`/`"time"` trace keys.
    pub(crate) fn absorb(
        &mut self,
        ranked: &[ScoredGenome],
        assignment: &BTreeMap<String, String>,
        counted_evaluations: u64,
    ) {
        self.step_evaluations += counted_evaluations;
        for scored in ranked {
            if let Some(cycles) = scored.trace.get("cycles").and_then(|v| v.as_f64()) {
                self.step_cycles += cycles.max(0.0) as u64;
            }
            if let Some(time) = scored.trace.get("time").and_then(|v| v.as_f64()) {
                self.step_time += time;
            }
            if let Some(key) = assignment.get(&scored.genome.id) {
                *self.species_evaluations.entry(key.clone()).or_insert(0) += 1;
            }
        }
        self.snapshot = Some(WindowSnapshot {
            ranked: ranked.to_vec(),
            assignment: assignment.clone(),
        });
    }

    /// Clears the counters; the latest snapshot stays so out-of-band
    /// updates after a reset still describe the population.
    fn reset(&mut self) {
        self.step_evaluations = 0;
        self.step_cycles = 0;
        self.step_time = 0.0;
        self.species_evaluations.clear();
    }
}

impl PopulationMonitor {
    /// Re-evaluates a champion genome in a probe mode. Probe failures are
    /// reported and ignored; they never abort the run.
    fn probe_champion(&self, genome: &crate::genome::Genome, mode: OpMode) -> Option<f64> {
        let mut cortex = match self.builder.build(genome) {
            Ok(cortex) => cortex,
            Err(error) => {
                warn!(genome = %genome.id, %mode, %error, "champion probe build failed");
                return None;
            }
        };
        match self.scape.evaluate(cortex.as_mut(), mode) {
            Ok(evaluation) => Some(evaluation.fitness),
            Err(error) => {
                warn!(genome = %genome.id, %mode, %error, "champion probe failed");
                None
            }
        }
    }

    fn window_species_metrics(&self) -> Vec<TraceSpeciesMetrics> {
        let Some(snapshot) = &self.window.snapshot else {
            return Vec::new();
        };
        let mut members_by_species: BTreeMap<&String, Vec<&ScoredGenome>> = BTreeMap::new();
        for scored in &snapshot.ranked {
            if let Some(key) = snapshot.assignment.get(&scored.genome.id) {
                members_by_species.entry(key).or_default().push(scored);
            }
        }

        members_by_species
            .into_iter()
            .map(|(key, members)| {
                let fitnesses: Vec<f64> = members.iter().map(|m| m.fitness).collect();
                let neuron_counts: Vec<f64> =
                    members.iter().map(|m| m.genome.neurons.len() as f64).collect();
                let (mean_fitness, std_fitness) = mean_and_std(&fitnesses);
                let (neuron_mean, neuron_std) = mean_and_std(&neuron_counts);
                let distinct: BTreeSet<String> =
                    members.iter().map(|m| fingerprint(&m.genome)).collect();
                // Members arrive in rank order, so the champion leads.
                let champion = members[0];
                let validation_fitness = if self.cfg.validation_probe {
                    self.probe_champion(&champion.genome, OpMode::Validation)
                } else {
                    None
                };
                let test_fitness = if self.cfg.test_probe {
                    self.probe_champion(&champion.genome, OpMode::Test)
                } else {
                    None
                };
                TraceSpeciesMetrics {
                    key: key.clone(),
                    size: members.len(),
                    mean_fitness,
                    std_fitness,
                    best_fitness: fitnesses.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    min_fitness: fitnesses.iter().copied().fold(f64::INFINITY, f64::min),
                    neuron_mean,
                    neuron_std,
                    diversity: distinct.len(),
                    evaluations: self
                        .window
                        .species_evaluations
                        .get(key)
                        .copied()
                        .unwrap_or(0),
                    champion_id: champion.genome.id.clone(),
                    validation_fitness,
                    test_fitness,
                }
            })
            .collect()
    }

    /// Builds and delivers a trace update for the current window.
    pub(crate) fn emit_window_update(&mut self, reason: &str) {
        if self.trace_hook.is_none() {
            return;
        }
        let update = TraceUpdate {
            reason: reason.to_string(),
            total_evaluations: self.total_evaluations,
            goal_reached: self.goal_reached,
            step_evaluations: self.window.step_evaluations,
            step_cycles: self.window.step_cycles,
            step_time: self.window.step_time,
            species_evaluations: self.window.species_evaluations.clone(),
            species: self.window_species_metrics(),
            diagnostics: self.last_diagnostics.clone(),
        };
        if let Some(hook) = &self.trace_hook {
            hook(&update);
        }
    }

    /// Emits a `step` update when the evaluation counter crossed the step
    /// boundary, then advances the boundary past the counter.
    pub(crate) fn emit_step_traces(&mut self) -> crate::errors::EvoResult<()> {
        let mut crossed = false;
        while self.total_evaluations >= self.next_trace_at {
            crossed = true;
            self.next_trace_at += self.trace_step_size;
        }
        if crossed {
            self.emit_window_update("step");
            self.window.reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;
    use crate::scape::Trace;

    fn scored(id: &str, fitness: f64) -> ScoredGenome {
        let inputs = vec!["i1".to_string()];
        let outputs = vec!["o1".to_string()];
        ScoredGenome {
            genome: Genome::linear(id, &inputs, &outputs, fitness),
            fitness,
            trace: Trace::new(),
        }
    }

    #[test]
    fn species_generation_tracks_churn() {
        let ranked = vec![scored("a", 2.0), scored("b", 1.0)];
        let mut assignment = BTreeMap::new();
        assignment.insert("a".to_string(), "s0".to_string());
        assignment.insert("b".to_string(), "s1".to_string());
        let previous: BTreeSet<String> = ["s0".to_string(), "s9".to_string()].into();
        let record = build_species_generation(3, &ranked, &assignment, &previous);
        assert_eq!(record.generation, 3);
        assert_eq!(record.species.len(), 2);
        assert_eq!(record.new_keys, vec!["s1".to_string()]);
        assert_eq!(record.extinct_keys, vec!["s9".to_string()]);
    }

    #[test]
    fn trace_update_serializes_with_wire_field_names() {
        let update = TraceUpdate {
            reason: "step".to_string(),
            total_evaluations: 500,
            goal_reached: false,
            step_evaluations: 500,
            step_cycles: 12,
            step_time: 0.25,
            species_evaluations: BTreeMap::new(),
            species: Vec::new(),
            diagnostics: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        for field in [
            "reason",
            "total_evaluations",
            "goal_reached",
            "step_evaluations",
            "step_cycles",
            "step_time",
            "species_evaluations",
            "species",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn window_accumulates_cycles_and_time() {
        let mut window = TraceWindow::default();
        let mut entry = scored("a", 1.0);
        entry.trace.insert("cycles".to_string(), serde_json::json!(10));
        entry.trace.insert("time".to_string(), serde_json::json!(0.5));
        let mut assignment = BTreeMap::new();
        assignment.insert("a".to_string(), "s0".to_string());
        window.absorb(&[entry], &assignment, 1);
        assert_eq!(window.step_evaluations, 1);
        assert_eq!(window.step_cycles, 10);
        assert!((window.step_time - 0.5).abs() < 1e-12);
        assert_eq!(window.species_evaluations["s0"], 1);
    }
}
