//! Optional per-genome local search ("tuning") run before scape evaluation.
//!
//! The three historical tuner contracts are collapsed into one trait:
//! implement `tune` and you have a working tuner (the monitor synthesises
//! the report); override `tune_with_report` for real accounting; flip
//! `supports_runtime` and implement `tune_runtime_with_report` to own the
//! runtime agent across attempts.

use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::scape::{CancelToken, Cortex, Evaluation, OpMode};

/// Evaluator closure handed to genome-level tuning: rebuilds a cortex from
/// the genome and scores it under the monitor's op mode.
pub type GenomeEvaluator<'a> = dyn FnMut(&Genome) -> anyhow::Result<Evaluation> + 'a;

/// Evaluator closure handed to runtime tuning: runs the given cortex under
/// the given mode without rebuilding.
pub type RuntimeEvaluator<'a> = dyn FnMut(&mut dyn Cortex, OpMode) -> anyhow::Result<Evaluation> + 'a;

/// Accounting for one tuner invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TuneReport {
    pub planned_attempts: u64,
    pub executed_attempts: u64,
    pub candidate_evaluations: u64,
    pub accepted_candidates: u64,
    pub rejected_candidates: u64,
    pub goal_hits: u64,
}

impl TuneReport {
    /// The synthesised report used for tuners that only implement `tune`.
    pub fn fixed(attempts: u64) -> Self {
        Self {
            planned_attempts: attempts,
            executed_attempts: attempts,
            ..Self::default()
        }
    }
}

/// Result of the runtime tuning path. `evaluation` may be `None` when the
/// tuner never scored the final genome; the monitor then evaluates once.
pub struct RuntimeTuneOutcome {
    pub genome: Genome,
    pub evaluation: Option<Evaluation>,
    pub report: TuneReport,
}

pub trait Tuner: Send + Sync {
    /// Legacy path: local search over the genome, returning the tuned
    /// genome.
    fn tune(
        &self,
        ctx: &CancelToken,
        genome: &Genome,
        attempts: u64,
        evaluate: &mut GenomeEvaluator<'_>,
    ) -> anyhow::Result<Genome>;

    /// Reporting path. Defaults to `tune` plus a synthesised
    /// planned == executed report.
    fn tune_with_report(
        &self,
        ctx: &CancelToken,
        genome: &Genome,
        attempts: u64,
        evaluate: &mut GenomeEvaluator<'_>,
    ) -> anyhow::Result<(Genome, TuneReport)> {
        let tuned = self.tune(ctx, genome, attempts, evaluate)?;
        Ok((tuned, TuneReport::fixed(attempts)))
    }

    /// Whether this tuner owns a runtime agent across attempts. When true
    /// (and the genome has synapses) the monitor builds the cortex and
    /// calls `tune_runtime_with_report` instead of the genome paths.
    fn supports_runtime(&self) -> bool {
        false
    }

    /// Runtime path. Only called when `supports_runtime` returns true.
    fn tune_runtime_with_report(
        &self,
        _ctx: &CancelToken,
        _cortex: Box<dyn Cortex>,
        genome: &Genome,
        _attempts: u64,
        _mode: OpMode,
        _evaluate: &mut RuntimeEvaluator<'_>,
    ) -> anyhow::Result<RuntimeTuneOutcome> {
        anyhow::bail!("tuner does not support runtime tuning for genome {}", genome.id)
    }

    /// Goal hook: the monitor injects the configured fitness goal once at
    /// construction so tuners can stop early.
    fn set_goal_fitness(&self, _goal: f64) {}
}

/// How many tuning attempts a genome receives in a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPolicy {
    /// Base attempts, unchanged.
    #[default]
    Fixed,
    /// Linear interpolation from the base at generation 0 down to `floor`
    /// at the final generation.
    LinearDecay { floor: u64 },
}

impl AttemptPolicy {
    pub fn attempts(
        &self,
        base: u64,
        generation: u64,
        total_generations: u64,
        _genome: &Genome,
    ) -> u64 {
        match self {
            AttemptPolicy::Fixed => base,
            AttemptPolicy::LinearDecay { floor } => {
                if base <= *floor || total_generations <= 1 {
                    return base.max(*floor);
                }
                let span = (base - floor) as f64;
                let progress = generation.min(total_generations - 1) as f64
                    / (total_generations - 1) as f64;
                let decayed = base as f64 - span * progress;
                (decayed.round() as u64).max(*floor)
            }
        }
    }
}

/// Per-generation tuning statistics accumulated over all workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningStats {
    pub invocations: u64,
    pub planned_attempts: u64,
    pub executed_attempts: u64,
    pub candidate_evaluations: u64,
    pub accepted_candidates: u64,
    pub rejected_candidates: u64,
    pub goal_hits: u64,
    pub accept_rate: f64,
    pub evals_per_attempt: f64,
}

impl TuningStats {
    pub fn absorb(&mut self, report: &TuneReport) {
        self.invocations += 1;
        self.planned_attempts += report.planned_attempts;
        self.executed_attempts += report.executed_attempts;
        self.candidate_evaluations += report.candidate_evaluations;
        self.accepted_candidates += report.accepted_candidates;
        self.rejected_candidates += report.rejected_candidates;
        self.goal_hits += report.goal_hits;
        self.refresh_ratios();
    }

    fn refresh_ratios(&mut self) {
        let judged = self.accepted_candidates + self.rejected_candidates;
        self.accept_rate = if judged == 0 {
            0.0
        } else {
            self.accepted_candidates as f64 / judged as f64
        };
        self.evals_per_attempt = if self.executed_attempts == 0 {
            0.0
        } else {
            self.candidate_evaluations as f64 / self.executed_attempts as f64
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_is_identity() {
        let genome = Genome::empty("g");
        assert_eq!(AttemptPolicy::Fixed.attempts(7, 3, 10, &genome), 7);
    }

    #[test]
    fn linear_decay_reaches_the_floor() {
        let genome = Genome::empty("g");
        let policy = AttemptPolicy::LinearDecay { floor: 2 };
        assert_eq!(policy.attempts(10, 0, 5, &genome), 10);
        assert_eq!(policy.attempts(10, 4, 5, &genome), 2);
        let mid = policy.attempts(10, 2, 5, &genome);
        assert!((2..=10).contains(&mid));
        // Past the end it stays at the floor.
        assert_eq!(policy.attempts(10, 9, 5, &genome), 2);
    }

    #[test]
    fn stats_derive_ratios() {
        let mut stats = TuningStats::default();
        stats.absorb(&TuneReport {
            planned_attempts: 4,
            executed_attempts: 4,
            candidate_evaluations: 8,
            accepted_candidates: 1,
            rejected_candidates: 3,
            goal_hits: 0,
        });
        assert_eq!(stats.invocations, 1);
        assert!((stats.accept_rate - 0.25).abs() < 1e-12);
        assert!((stats.evals_per_attempt - 2.0).abs() < 1e-12);
    }
}
