//! Parallel population evaluation.
//!
//! Genomes are dispatched to `min(workers, N)` scoped threads over a job
//! channel; results come back indexed so the assembled vector is
//! independent of completion order. The main thread drains the control
//! channel while it waits and stops counting evaluations once the goal
//! flag is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use tracing::trace;

use crate::errors::{EvoError, EvoResult};
use crate::genome::Genome;
use crate::monitor::{PopulationMonitor, ScoredGenome};
use crate::scape::{CancelToken, Cortex, CortexBuilder, Evaluation, OpMode, Scape};
use crate::tuning::{TuneReport, Tuner, TuningStats};

pub(crate) struct EvalOutcome {
    /// Index-aligned with the input population.
    pub scored: Vec<ScoredGenome>,
    /// Evaluations not elided by a goal-reached event.
    pub counted_evaluations: u64,
    pub tuning: TuningStats,
}

struct EvalJob {
    index: usize,
    genome: Genome,
    attempts: u64,
}

struct WorkerOk {
    index: usize,
    scored: ScoredGenome,
    report: Option<TuneReport>,
}

fn evaluation_error(genome_id: &str, source: anyhow::Error) -> EvoError {
    EvoError::Evaluation { genome_id: genome_id.to_string(), source }
}

fn evaluate_one(
    job: EvalJob,
    scape: &dyn Scape,
    builder: &dyn CortexBuilder,
    tuner: Option<&dyn Tuner>,
    mode: OpMode,
    ctx: &CancelToken,
) -> Result<WorkerOk, EvoError> {
    ctx.check()?;
    let EvalJob { index, mut genome, attempts } = job;
    let mut report: Option<TuneReport> = None;
    let mut evaluation: Option<Evaluation> = None;

    if let Some(tuner) = tuner {
        if tuner.supports_runtime() && !genome.synapses.is_empty() {
            // Runtime path: the tuner owns the agent across attempts.
            let cortex = builder
                .build(&genome)
                .map_err(|e| evaluation_error(&genome.id, e))?;
            let mut evaluate =
                |cortex: &mut dyn Cortex, mode: OpMode| scape.evaluate(cortex, mode);
            let outcome = tuner
                .tune_runtime_with_report(ctx, cortex, &genome, attempts, mode, &mut evaluate)
                .map_err(|e| EvoError::Tuner { genome_id: genome.id.clone(), source: e })?;
            genome = outcome.genome;
            evaluation = outcome.evaluation;
            report = Some(outcome.report);
        } else {
            // Genome path: the evaluator rebuilds a cortex per call.
            let mut evaluate = |candidate: &Genome| -> anyhow::Result<Evaluation> {
                let mut cortex = builder.build(candidate)?;
                scape.evaluate(cortex.as_mut(), mode)
            };
            let (tuned, tune_report) = tuner
                .tune_with_report(ctx, &genome, attempts, &mut evaluate)
                .map_err(|e| EvoError::Tuner { genome_id: genome.id.clone(), source: e })?;
            genome = tuned;
            report = Some(tune_report);
        }
    }

    let evaluation = match evaluation {
        Some(evaluation) => evaluation,
        None => {
            ctx.check()?;
            let mut cortex = builder
                .build(&genome)
                .map_err(|e| evaluation_error(&genome.id, e))?;
            scape
                .evaluate(cortex.as_mut(), mode)
                .map_err(|e| evaluation_error(&genome.id, e))?
        }
    };
    trace!(genome = %genome.id, fitness = evaluation.fitness, "evaluated");

    Ok(WorkerOk {
        index,
        scored: ScoredGenome {
            genome,
            fitness: evaluation.fitness,
            trace: evaluation.trace,
        },
        report,
    })
}

impl PopulationMonitor {
    pub(crate) fn evaluate_population(
        &mut self,
        ctx: &CancelToken,
        genomes: &[Genome],
        relative_generation: u64,
    ) -> EvoResult<EvalOutcome> {
        let n = genomes.len();
        let worker_count = self.cfg.workers.min(n).max(1);
        let tuning_enabled = self.cfg.op_mode == OpMode::Gt && self.tuner.is_some();

        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded::<EvalJob>();
        let (results_tx, results_rx) =
            crossbeam_channel::unbounded::<Result<WorkerOk, EvoError>>();
        for (index, genome) in genomes.iter().enumerate() {
            let attempts = self.cfg.tune_attempt_policy.attempts(
                self.cfg.tune_attempts,
                relative_generation,
                self.cfg.generations,
                genome,
            );
            let job = EvalJob { index, genome: genome.clone(), attempts };
            jobs_tx.send(job).expect("job channel open");
        }
        drop(jobs_tx);

        let abort = Arc::new(AtomicBool::new(false));
        let mut scored: Vec<Option<ScoredGenome>> = (0..n).map(|_| None).collect();
        let mut tuning = TuningStats::default();
        let mut counted = 0u64;
        let mut first_error: Option<EvoError> = None;

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let jobs_rx = jobs_rx.clone();
                let results_tx = results_tx.clone();
                let scape = Arc::clone(&self.scape);
                let builder = Arc::clone(&self.builder);
                let tuner = if tuning_enabled { self.tuner.clone() } else { None };
                let abort = Arc::clone(&abort);
                let worker_ctx = ctx.clone();
                let mode = self.cfg.op_mode;
                scope.spawn(move || {
                    for job in jobs_rx.iter() {
                        if abort.load(Ordering::SeqCst) || worker_ctx.is_cancelled() {
                            let _ = results_tx.send(Err(EvoError::Cancelled));
                            continue;
                        }
                        let result = evaluate_one(
                            job,
                            scape.as_ref(),
                            builder.as_ref(),
                            tuner.as_deref(),
                            mode,
                            &worker_ctx,
                        );
                        if results_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(jobs_rx);
            drop(results_tx);

            let mut received = 0usize;
            while received < n {
                if ctx.is_cancelled() {
                    abort.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(EvoError::Cancelled);
                    break;
                }
                // React to print_trace/stop while evaluations are in flight.
                loop {
                    let command = match &self.control {
                        Some(channel) => channel.try_recv(),
                        None => break,
                    };
                    match command {
                        Ok(command) => self.apply_command_during_evaluation(command),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            self.control = None;
                            break;
                        }
                    }
                }

                match results_rx.recv_timeout(Duration::from_millis(10)) {
                    Ok(Ok(ok)) => {
                        received += 1;
                        if let Some(report) = &ok.report {
                            tuning.absorb(report);
                        }
                        if !self.goal_reached {
                            counted += 1;
                        }
                        if self.cfg.fitness_goal > 0.0
                            && ok.scored.fitness >= self.cfg.fitness_goal
                        {
                            self.goal_reached = true;
                        }
                        scored[ok.index] = Some(ok.scored);
                    }
                    Ok(Err(error)) => {
                        received += 1;
                        abort.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(error);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        if let Some(error) = first_error {
            return Err(error);
        }
        let scored: Vec<ScoredGenome> = scored
            .into_iter()
            .map(|entry| entry.expect("every index produced a result"))
            .collect();
        Ok(EvalOutcome { scored, counted_evaluations: counted, tuning })
    }
}
