//! Shared fixtures: a small feed-forward runtime, deterministic scapes,
//! and population builders.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ndarray::{array, Array1};

use evoscape::genome::Genome;
use evoscape::monitor::MonitorConfig;
use evoscape::mutation::MutationOp;
use evoscape::scape::{Cortex, CortexBuilder, Evaluation, OpMode, Scape, Trace};

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Minimal feed-forward interpreter over a genome: neurons evaluate in
/// inferred layer order, enough to run the linear fixtures the tests use.
pub struct TinyCortex {
    genome: Genome,
    input_ids: Vec<String>,
    output_ids: Vec<String>,
    order: Vec<String>,
}

fn activate(name: &str, x: f64) -> f64 {
    match name {
        "relu" => x.max(0.0),
        "tanh" => x.tanh(),
        "sigmoid" => 1.0 / (1.0 + (-x).exp()),
        _ => x,
    }
}

impl TinyCortex {
    pub fn new(genome: Genome, input_ids: Vec<String>, output_ids: Vec<String>) -> Self {
        let layers = genome.infer_layers(&input_ids);
        let mut order: Vec<String> = genome.neurons.iter().map(|n| n.id.clone()).collect();
        order.sort_by_key(|id| layers.get(id).copied().unwrap_or(0));
        Self { genome, input_ids, output_ids, order }
    }
}

impl Cortex for TinyCortex {
    fn step(&mut self, input: &Array1<f64>) -> anyhow::Result<Array1<f64>> {
        let mut values: BTreeMap<&str, f64> = BTreeMap::new();
        for (position, id) in self.input_ids.iter().enumerate() {
            values.insert(id.as_str(), input[position]);
        }
        for id in &self.order {
            if values.contains_key(id.as_str()) {
                continue;
            }
            let neuron = self
                .genome
                .neuron(id)
                .ok_or_else(|| anyhow::anyhow!("unknown neuron {id}"))?;
            let mut sum = neuron.bias;
            for synapse in self.genome.synapses.iter().filter(|s| s.to == *id && s.enabled) {
                sum += synapse.weight * values.get(synapse.from.as_str()).copied().unwrap_or(0.0);
            }
            values.insert(id.as_str(), activate(&neuron.activation, sum));
        }
        Ok(Array1::from_iter(
            self.output_ids
                .iter()
                .map(|id| values.get(id.as_str()).copied().unwrap_or(0.0)),
        ))
    }

    fn genome(&self) -> Option<&Genome> {
        Some(&self.genome)
    }
}

#[derive(Clone)]
pub struct TinyBuilder {
    pub input_ids: Vec<String>,
    pub output_ids: Vec<String>,
}

impl TinyBuilder {
    pub fn new(input_ids: &[&str], output_ids: &[&str]) -> Self {
        Self { input_ids: strings(input_ids), output_ids: strings(output_ids) }
    }
}

impl CortexBuilder for TinyBuilder {
    fn build(&self, genome: &Genome) -> anyhow::Result<Box<dyn Cortex>> {
        Ok(Box::new(TinyCortex::new(
            genome.clone(),
            self.input_ids.clone(),
            self.output_ids.clone(),
        )))
    }
}

/// One-dimensional regression scape: drives the cortex with input 1.0 and
/// scores `1 - (y - 1)^2`. Deterministic; traces carry cycle/time figures.
pub struct TargetScape;

impl Scape for TargetScape {
    fn name(&self) -> &str {
        "target"
    }

    fn evaluate(&self, cortex: &mut dyn Cortex, _mode: OpMode) -> anyhow::Result<Evaluation> {
        let output = cortex.step(&array![1.0])?;
        let y = output.first().copied().unwrap_or(0.0);
        let mse = (y - 1.0) * (y - 1.0);
        let mut trace = Trace::new();
        trace.insert("cycles".to_string(), serde_json::json!(1));
        trace.insert("time".to_string(), serde_json::json!(0.001));
        Ok(Evaluation { fitness: 1.0 - mse, trace })
    }
}

/// Scape that sleeps per evaluation; used by cancellation tests.
pub struct SlowScape {
    pub delay: Duration,
}

impl Scape for SlowScape {
    fn name(&self) -> &str {
        "slow"
    }

    fn evaluate(&self, cortex: &mut dyn Cortex, _mode: OpMode) -> anyhow::Result<Evaluation> {
        std::thread::sleep(self.delay);
        let output = cortex.step(&array![1.0])?;
        Ok(Evaluation::new(output.first().copied().unwrap_or(0.0)))
    }
}

/// Population of single-synapse identity networks with the given weights.
pub fn linear_population(weights: &[f64]) -> Vec<Genome> {
    weights
        .iter()
        .enumerate()
        .map(|(index, &weight)| {
            Genome::linear(
                format!("seed{index}"),
                &strings(&["i1"]),
                &strings(&["o1"]),
                weight,
            )
        })
        .collect()
}

/// Baseline config around `TargetScape`: single-input single-output linear
/// genomes, deterministic weight-step mutation.
pub fn target_config(population: usize, generations: u64) -> MonitorConfig {
    MonitorConfig {
        scape: Some(Arc::new(TargetScape)),
        cortex_builder: Some(Arc::new(TinyBuilder::new(&["i1"], &["o1"]))),
        mutation: Some(MutationOp::perturb_weight_at(0, Some(0.2))),
        population_size: population,
        generations,
        seed: 1,
        input_neuron_ids: strings(&["i1"]),
        output_neuron_ids: strings(&["o1"]),
        ..MonitorConfig::default()
    }
}
