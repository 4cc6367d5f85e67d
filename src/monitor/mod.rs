//! Population monitor: the top-level evolutionary loop.
//!
//! One monitor owns the rng, the lineage, the speciation state, and the
//! trace window; everything mutable lives on the main thread. Evaluation
//! fans out to a bounded worker pool (see `evaluate`), reproduction and
//! diagnostics run sequentially between generations.

mod diagnostics;
mod evaluate;
mod reproduce;

pub use diagnostics::{GenerationDiagnostics, TraceSpeciesMetrics, TraceUpdate};
pub use reproduce::build_species_offspring_plan;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{EvoError, EvoResult};
use crate::genome::signature::{fingerprint, summarize};
use crate::genome::Genome;
use crate::lineage::{EvoHistoryEvent, LineageRecord};
use crate::mutation::policy::{MutationPolicy, MutationPolicyEntry, TopologicalMutations};
use crate::mutation::{
    MutationOp, DEFAULT_ACTIVATIONS, DEFAULT_AGGREGATORS, DEFAULT_ANNEALING_FACTORS,
    DEFAULT_HEREDITY_TYPES, DEFAULT_MAX_WEIGHT_DELTA, DEFAULT_PLASTICITY_RULES,
    DEFAULT_TOPOLOGICAL_MODES, DEFAULT_TUNING_SELECTIONS,
};
use crate::postprocess::FitnessPostprocessor;
use crate::scape::{CancelToken, CortexBuilder, Morphology, OpMode, PermissiveMorphology, Scape, Trace};
use crate::selection::{Elite, Selector};
use crate::species::{
    AdaptiveSpeciation, Speciation, SpeciationMode, SpeciesGeneration,
};
use crate::tuning::{AttemptPolicy, Tuner};

use diagnostics::TraceWindow;

/// One evaluated genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredGenome {
    pub genome: Genome,
    pub fitness: f64,
    pub trace: Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionType {
    #[default]
    Generational,
    SteadyState,
}

/// External control commands (wire strings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Continue,
    Stop,
    GoalReached,
    PrintTrace,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Continue => "continue",
            ControlCommand::Stop => "stop",
            ControlCommand::GoalReached => "goal_reached",
            ControlCommand::PrintTrace => "print_trace",
        }
    }
}

impl FromStr for ControlCommand {
    type Err = EvoError;

    fn from_str(s: &str) -> EvoResult<Self> {
        match s {
            "pause" => Ok(ControlCommand::Pause),
            "continue" => Ok(ControlCommand::Continue),
            "stop" => Ok(ControlCommand::Stop),
            "goal_reached" => Ok(ControlCommand::GoalReached),
            "print_trace" => Ok(ControlCommand::PrintTrace),
            other => Err(EvoError::Config(format!("unknown control command {other:?}"))),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TraceHook = Box<dyn Fn(&TraceUpdate) + Send>;

/// Bounded command queue for external control. The monitor consumes the
/// receiver non-blockingly during evaluation and blockingly while paused.
pub fn control_channel() -> (crossbeam_channel::Sender<ControlCommand>, Receiver<ControlCommand>) {
    crossbeam_channel::bounded(16)
}

/// Monitor configuration. Every field has a usable default except the
/// scape, the cortex builder, the population/generation sizes, and (in GT
/// mode) a mutation source.
pub struct MonitorConfig {
    pub scape: Option<Arc<dyn Scape>>,
    pub cortex_builder: Option<Arc<dyn CortexBuilder>>,
    pub morphology: Option<Arc<dyn Morphology>>,
    pub op_mode: OpMode,
    pub evolution_type: EvolutionType,
    pub speciation_mode: SpeciationMode,
    pub adaptive_speciation: AdaptiveSpeciation,
    /// Single fallback operator.
    pub mutation: Option<MutationOp>,
    /// Weighted operator pool; wins over `mutation` for regular draws.
    pub mutation_policy: Option<MutationPolicy>,
    pub selector: Option<Arc<dyn Selector>>,
    pub postprocessor: FitnessPostprocessor,
    pub topological_mutations: TopologicalMutations,
    pub population_size: usize,
    /// 0 derives `ceil(survival_percentage * population_size)`, floored at 1.
    pub elite_count: usize,
    pub survival_percentage: f64,
    /// 0 disables per-species parent-pool trimming.
    pub specie_size_limit: usize,
    pub generations: u64,
    pub generation_offset: u64,
    /// 0 disables the goal.
    pub fitness_goal: f64,
    /// 0 disables the budget.
    pub evaluations_limit: u64,
    pub workers: usize,
    pub seed: i64,
    pub input_neuron_ids: Vec<String>,
    pub output_neuron_ids: Vec<String>,
    pub feedforward_only: bool,
    pub max_weight_delta: f64,
    pub activations: Vec<String>,
    pub aggregators: Vec<String>,
    pub plasticity_rules: Vec<String>,
    pub tuning_selections: Vec<String>,
    pub annealing_factors: Vec<f64>,
    pub topological_modes: Vec<String>,
    pub heredity_types: Vec<String>,
    pub cpp_names: Vec<String>,
    pub cep_names: Vec<String>,
    pub tuner: Option<Arc<dyn Tuner>>,
    pub tune_attempts: u64,
    pub tune_attempt_policy: AttemptPolicy,
    pub validation_probe: bool,
    pub test_probe: bool,
    pub control: Option<Receiver<ControlCommand>>,
    /// 0 means the default of 500 evaluations per trace step.
    pub trace_step_size: u64,
    pub trace_update_hook: Option<TraceHook>,
}

pub const DEFAULT_TRACE_STEP_SIZE: u64 = 500;

impl Default for MonitorConfig {
    fn default() -> Self {
        let strings = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            scape: None,
            cortex_builder: None,
            morphology: None,
            op_mode: OpMode::Gt,
            evolution_type: EvolutionType::Generational,
            speciation_mode: SpeciationMode::Adaptive,
            adaptive_speciation: AdaptiveSpeciation::default(),
            mutation: None,
            mutation_policy: None,
            selector: None,
            postprocessor: FitnessPostprocessor::None,
            topological_mutations: TopologicalMutations::default(),
            population_size: 0,
            elite_count: 0,
            survival_percentage: 0.5,
            specie_size_limit: 0,
            generations: 0,
            generation_offset: 0,
            fitness_goal: 0.0,
            evaluations_limit: 0,
            workers: 1,
            seed: 0,
            input_neuron_ids: Vec::new(),
            output_neuron_ids: Vec::new(),
            feedforward_only: false,
            max_weight_delta: DEFAULT_MAX_WEIGHT_DELTA,
            activations: strings(&DEFAULT_ACTIVATIONS),
            aggregators: strings(&DEFAULT_AGGREGATORS),
            plasticity_rules: strings(&DEFAULT_PLASTICITY_RULES),
            tuning_selections: strings(&DEFAULT_TUNING_SELECTIONS),
            annealing_factors: DEFAULT_ANNEALING_FACTORS.to_vec(),
            topological_modes: strings(&DEFAULT_TOPOLOGICAL_MODES),
            heredity_types: strings(&DEFAULT_HEREDITY_TYPES),
            cpp_names: Vec::new(),
            cep_names: Vec::new(),
            tuner: None,
            tune_attempts: 0,
            tune_attempt_policy: AttemptPolicy::Fixed,
            validation_probe: false,
            test_probe: false,
            control: None,
            trace_step_size: 0,
            trace_update_hook: None,
        }
    }
}

/// Value returned to the caller after a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub best_by_generation: Vec<f64>,
    pub generation_diagnostics: Vec<GenerationDiagnostics>,
    pub species_history: Vec<SpeciesGeneration>,
    pub final_population: Vec<ScoredGenome>,
    pub lineage: Vec<LineageRecord>,
}

impl RunResult {
    /// Highest-fitness member of the final population.
    pub fn best(&self) -> Option<&ScoredGenome> {
        self.final_population
            .iter()
            .max_by(|a, b| a.fitness.partial_cmp(&b.fitness).unwrap_or(Ordering::Equal))
    }
}

pub struct PopulationMonitor {
    pub(crate) cfg: MonitorConfig,
    pub(crate) scape: Arc<dyn Scape>,
    pub(crate) builder: Arc<dyn CortexBuilder>,
    pub(crate) morphology: Arc<dyn Morphology>,
    pub(crate) selector: Arc<dyn Selector>,
    pub(crate) tuner: Option<Arc<dyn Tuner>>,
    pub(crate) policy: Option<MutationPolicy>,
    pub(crate) elite_count: usize,
    pub(crate) trace_step_size: u64,
    pub(crate) rng: StdRng,
    pub(crate) lineage: Vec<LineageRecord>,
    /// Genome id -> flattened list of ancestor mutation operations.
    /// Rebuilt append-only each generation so parent and child histories
    /// never alias.
    pub(crate) histories: BTreeMap<String, Vec<String>>,
    pub(crate) speciation: Speciation,
    pub(crate) window: TraceWindow,
    pub(crate) next_trace_at: u64,
    pub(crate) total_evaluations: u64,
    pub(crate) goal_reached: bool,
    pub(crate) stop_requested: bool,
    pub(crate) paused: bool,
    pub(crate) control: Option<Receiver<ControlCommand>>,
    pub(crate) trace_hook: Option<TraceHook>,
    pub(crate) last_diagnostics: Option<GenerationDiagnostics>,
}

impl PopulationMonitor {
    /// Validates the configuration and builds the monitor. Errors here are
    /// configuration errors: the caller never gets a runnable monitor from
    /// a bad config.
    pub fn new(mut cfg: MonitorConfig) -> EvoResult<Self> {
        let scape = cfg
            .scape
            .take()
            .ok_or_else(|| EvoError::Config("scape is required".to_string()))?;
        let builder = cfg
            .cortex_builder
            .take()
            .ok_or_else(|| EvoError::Config("cortex builder is required".to_string()))?;
        let morphology = cfg
            .morphology
            .take()
            .unwrap_or_else(|| Arc::new(PermissiveMorphology));
        let selector = cfg.selector.take().unwrap_or_else(|| Arc::new(Elite));
        let tuner = cfg.tuner.take();

        if cfg.population_size == 0 {
            return Err(EvoError::Config("population size must be positive".to_string()));
        }
        if cfg.generations == 0 {
            return Err(EvoError::Config("generations must be positive".to_string()));
        }
        if cfg.workers == 0 {
            return Err(EvoError::Config("at least one worker is required".to_string()));
        }
        if !(0.0..=1.0).contains(&cfg.survival_percentage) {
            return Err(EvoError::Config(
                "survival percentage must be within [0, 1]".to_string(),
            ));
        }
        if cfg.input_neuron_ids.is_empty() {
            return Err(EvoError::Config("input neuron ids must not be empty".to_string()));
        }
        if cfg.output_neuron_ids.is_empty() {
            return Err(EvoError::Config("output neuron ids must not be empty".to_string()));
        }
        if cfg.fitness_goal < 0.0 {
            return Err(EvoError::Config("fitness goal must not be negative".to_string()));
        }
        if cfg.annealing_factors.iter().any(|f| *f <= 0.0) {
            return Err(EvoError::Config(
                "annealing factors must be strictly positive".to_string(),
            ));
        }

        let policy = match (cfg.mutation_policy.take(), cfg.mutation.clone()) {
            (Some(policy), _) => Some(policy),
            (None, Some(op)) => Some(MutationPolicy::new(vec![MutationPolicyEntry {
                op,
                weight: 1.0,
            }])?),
            (None, None) => None,
        };
        if cfg.op_mode == OpMode::Gt && policy.is_none() {
            return Err(EvoError::Config(
                "gt mode needs a mutation or a mutation policy".to_string(),
            ));
        }

        let elite_count = if cfg.elite_count == 0 {
            ((cfg.survival_percentage * cfg.population_size as f64).ceil() as usize).max(1)
        } else {
            cfg.elite_count
        };
        if elite_count > cfg.population_size {
            return Err(EvoError::Config(format!(
                "elite count {} exceeds population size {}",
                elite_count, cfg.population_size
            )));
        }

        let trace_step_size = if cfg.trace_step_size == 0 {
            DEFAULT_TRACE_STEP_SIZE
        } else {
            cfg.trace_step_size
        };

        if let Some(tuner) = &tuner {
            if cfg.fitness_goal > 0.0 {
                tuner.set_goal_fitness(cfg.fitness_goal);
            }
        }

        let rng = StdRng::seed_from_u64(cfg.seed as u64);
        let speciation = Speciation::new(cfg.speciation_mode, cfg.adaptive_speciation.clone());
        let control = cfg.control.take();
        let trace_hook = cfg.trace_update_hook.take();

        Ok(Self {
            cfg,
            scape,
            builder,
            morphology,
            selector,
            tuner,
            policy,
            elite_count,
            trace_step_size,
            rng,
            lineage: Vec::new(),
            histories: BTreeMap::new(),
            speciation,
            window: TraceWindow::default(),
            next_trace_at: trace_step_size,
            total_evaluations: 0,
            goal_reached: false,
            stop_requested: false,
            paused: false,
            control,
            trace_hook,
            last_diagnostics: None,
        })
    }

    pub fn elite_count(&self) -> usize {
        self.elite_count
    }

    /// Runs the evolutionary loop over `initial`.
    pub fn run(&mut self, ctx: &CancelToken, initial: Vec<Genome>) -> EvoResult<RunResult> {
        ctx.check()?;
        if initial.len() != self.cfg.population_size {
            return Err(EvoError::Config(format!(
                "initial population has {} genomes, expected {}",
                initial.len(),
                self.cfg.population_size
            )));
        }

        let seed_operation = if self.cfg.generation_offset > 0 {
            "continue_seed"
        } else {
            "seed"
        };
        for genome in &initial {
            self.stamp_lineage(genome, None, self.cfg.generation_offset, seed_operation, Vec::new());
            self.histories.insert(genome.id.clone(), Vec::new());
        }

        info!(
            population = initial.len(),
            generations = self.cfg.generations,
            scape = self.scape.name(),
            "starting run"
        );

        let mut population = initial;
        let mut best_by_generation = Vec::new();
        let mut diagnostics_history: Vec<GenerationDiagnostics> = Vec::new();
        let mut species_history: Vec<SpeciesGeneration> = Vec::new();
        let mut previous_keys: BTreeSet<String> = BTreeSet::new();
        let mut final_population: Vec<ScoredGenome> = Vec::new();

        for g in 0..self.cfg.generations {
            let generation = self.cfg.generation_offset + g;
            self.handle_control(ctx)?;
            if self.stop_requested {
                break;
            }
            ctx.check()?;

            let outcome = self.evaluate_population(ctx, &population, g)?;
            let processed = if self.cfg.op_mode == OpMode::Gt {
                self.cfg.postprocessor.apply(&outcome.scored)
            } else {
                outcome.scored.clone()
            };
            let mut ranked = processed;
            ranked.sort_by(|a, b| b.fitness.partial_cmp(&a.fitness).unwrap_or(Ordering::Equal));
            self.total_evaluations += outcome.counted_evaluations;

            let (assignment, stats) = self.speciation.assign(&ranked, &self.histories);
            let generation_diagnostics = diagnostics::build_generation_diagnostics(
                generation,
                &ranked,
                &stats,
                outcome.tuning,
            );
            debug!(
                generation,
                best = generation_diagnostics.best_fitness,
                species = generation_diagnostics.species_count,
                evaluations = self.total_evaluations,
                "generation evaluated"
            );

            best_by_generation.push(generation_diagnostics.best_fitness);
            self.window.absorb(&ranked, &assignment, outcome.counted_evaluations);
            self.last_diagnostics = Some(generation_diagnostics.clone());
            self.emit_step_traces()?;

            let record = diagnostics::build_species_generation(
                generation,
                &ranked,
                &assignment,
                &previous_keys,
            );
            previous_keys = record.species.iter().map(|m| m.key.clone()).collect();
            species_history.push(record);
            diagnostics_history.push(generation_diagnostics);
            final_population = ranked.clone();

            let limit_hit = self.cfg.evaluations_limit > 0
                && self.total_evaluations >= self.cfg.evaluations_limit;
            let last_generation = g + 1 == self.cfg.generations;
            if self.cfg.op_mode != OpMode::Gt
                || self.goal_reached
                || limit_hit
                || self.stop_requested
                || last_generation
            {
                if limit_hit {
                    debug!(total = self.total_evaluations, "evaluation budget reached");
                }
                break;
            }

            population = match self.cfg.evolution_type {
                EvolutionType::Generational => self.next_generation(g, &ranked, &assignment)?,
                EvolutionType::SteadyState => {
                    self.next_generation_steady_state(g, population, &ranked, &assignment)?
                }
            };
        }

        self.emit_window_update("completed");
        info!(
            total_evaluations = self.total_evaluations,
            goal_reached = self.goal_reached,
            "run finished"
        );

        Ok(RunResult {
            best_by_generation,
            generation_diagnostics: diagnostics_history,
            species_history,
            final_population,
            lineage: self.lineage.clone(),
        })
    }

    /// Appends a lineage record for `genome`.
    pub(crate) fn stamp_lineage(
        &mut self,
        genome: &Genome,
        parent_id: Option<String>,
        generation: u64,
        operation: &str,
        events: Vec<EvoHistoryEvent>,
    ) {
        self.lineage.push(LineageRecord {
            genome_id: genome.id.clone(),
            parent_id,
            generation,
            operation: operation.to_string(),
            events,
            fingerprint: fingerprint(genome),
            summary: summarize(genome),
        });
    }

    fn apply_command(&mut self, command: ControlCommand) {
        debug!(command = command.as_str(), "control command");
        match command {
            ControlCommand::Pause => self.paused = true,
            ControlCommand::Continue => self.paused = false,
            ControlCommand::Stop => {
                self.stop_requested = true;
                self.paused = false;
            }
            ControlCommand::GoalReached => {
                // Must not deadlock a paused loop.
                self.goal_reached = true;
                self.paused = false;
            }
            ControlCommand::PrintTrace => self.emit_window_update("print_trace"),
        }
    }

    /// Drains pending control commands without blocking, then blocks while
    /// paused (still watching for cancellation).
    fn handle_control(&mut self, ctx: &CancelToken) -> EvoResult<()> {
        loop {
            let received = match &self.control {
                Some(channel) => channel.try_recv(),
                None => return Ok(()),
            };
            match received {
                Ok(command) => self.apply_command(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.control = None;
                    return Ok(());
                }
            }
        }

        while self.paused && !self.stop_requested {
            ctx.check()?;
            let received = match &self.control {
                Some(channel) => channel.recv_timeout(Duration::from_millis(25)),
                None => {
                    self.paused = false;
                    break;
                }
            };
            match received {
                Ok(command) => self.apply_command(command),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("control channel closed while paused; continuing");
                    self.control = None;
                    self.paused = false;
                }
            }
        }
        Ok(())
    }

    /// Reacts to a command that arrived while evaluation results were being
    /// drained. Pause is deferred to the end of the generation.
    pub(crate) fn apply_command_during_evaluation(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Continue => self.paused = false,
            other => self.apply_command(other),
        }
    }
}
